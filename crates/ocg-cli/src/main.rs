mod commands;
mod config;

use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use commands::{Cli, Command, GatewayCommand, RatelimitCommand, TaskCommand};
use ocg_scheduler::{RateLimiter, TaskStatus, TaskStore};
use ocg_supervisor::{ReadinessProbe, ServiceKind, ServiceStatus, Supervisor, SupervisorError};
use tracing::error;

const EXIT_OK: u8 = 0;
const EXIT_INVARIANT: u8 = 1;
const EXIT_MISSING_DEPENDENCY: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "ocg=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref());

    match run(cli.command, &cfg).await {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(CliError::Invariant(msg)) => {
            error!("{msg}");
            ExitCode::from(EXIT_INVARIANT)
        }
        Err(CliError::MissingDependency(msg)) => {
            error!("{msg}");
            ExitCode::from(EXIT_MISSING_DEPENDENCY)
        }
    }
}

enum CliError {
    Invariant(String),
    MissingDependency(String),
}

impl From<SupervisorError> for CliError {
    fn from(e: SupervisorError) -> Self {
        match e {
            SupervisorError::SpawnFailed(_, _) => CliError::MissingDependency(e.to_string()),
            other => CliError::Invariant(other.to_string()),
        }
    }
}

impl From<ocg_scheduler::SchedulerError> for CliError {
    fn from(e: ocg_scheduler::SchedulerError) -> Self {
        CliError::Invariant(e.to_string())
    }
}

impl From<rusqlite::Error> for CliError {
    fn from(e: rusqlite::Error) -> Self {
        CliError::Invariant(e.to_string())
    }
}

async fn run(command: Command, cfg: &config::CliConfig) -> Result<(), CliError> {
    match command {
        Command::Start => start_all(cfg).await,
        Command::Stop => stop_all(cfg).await,
        Command::Status => {
            print_status(cfg);
            Ok(())
        }
        Command::Restart => {
            stop_all(cfg).await.ok();
            start_all(cfg).await
        }
        Command::Agent => {
            println!("interactive chat is served over the agent<->gateway RPC socket; connect a client to {}",
                cfg.pid_dir.join("agent.sock").display());
            Ok(())
        }
        Command::Ratelimit(sub) => ratelimit_command(cfg, sub),
        Command::Task(sub) => task_command(cfg, sub),
        Command::Llmhealth { action } => {
            println!("llmhealth action={action}: query the gateway's /health endpoint for live provider status");
            Ok(())
        }
        Command::Hooks => {
            println!("hook events are rows in the `events` table with event_type='hook'; see `ocg task list` for an analogous view");
            Ok(())
        }
        Command::Webhook => {
            println!("webhook endpoints are configured under [webhooks] in ocg.toml");
            Ok(())
        }
        Command::Gateway(sub) => gateway_command(cfg, sub).await,
    }
}

fn supervisor(cfg: &config::CliConfig) -> Supervisor {
    Supervisor::new(&cfg.pid_dir)
}

async fn start_all(cfg: &config::CliConfig) -> Result<(), CliError> {
    let sup = supervisor(cfg);
    for service in ServiceKind::START_ORDER {
        let (bin, probe) = service_launch(cfg, service);
        let command = std::process::Command::new(bin);
        sup.start(service, command, probe, Duration::from_secs(30)).await?;
        println!("{service}: started");
    }
    Ok(())
}

async fn stop_all(cfg: &config::CliConfig) -> Result<(), CliError> {
    let sup = supervisor(cfg);
    // Reverse order: embedding and gateway depend on agent being last to go down.
    for service in ServiceKind::START_ORDER.iter().rev() {
        match sup.stop(*service).await {
            Ok(()) => println!("{service}: stopped"),
            Err(SupervisorError::NotRunning(_)) => println!("{service}: already stopped"),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn print_status(cfg: &config::CliConfig) {
    let sup = supervisor(cfg);
    for service in ServiceKind::START_ORDER {
        match sup.status(service) {
            ServiceStatus::Stopped => println!("{service}: stopped"),
            ServiceStatus::Running { pid } => println!("{service}: running (pid {pid})"),
            ServiceStatus::Stale { pid } => println!("{service}: stale pid file (pid {pid} not alive)"),
        }
    }
}

fn service_launch(cfg: &config::CliConfig, service: ServiceKind) -> (&'static str, ReadinessProbe) {
    match service {
        ServiceKind::Agent => ("ocg-agent", ReadinessProbe::SocketConnect(
            cfg.pid_dir.join("agent.sock").to_string_lossy().into_owned(),
        )),
        ServiceKind::Gateway => ("ocg-gateway", ReadinessProbe::HttpHealth(
            format!("http://{}:{}/health", cfg.host, cfg.port),
        )),
        ServiceKind::Embedding => ("ocg-embedding", ReadinessProbe::HttpHealth(
            format!("http://{}:{}/health", cfg.host, cfg.port + 1),
        )),
    }
}

fn open_scheduler_conn(cfg: &config::CliConfig) -> Result<Arc<Mutex<rusqlite::Connection>>, CliError> {
    let conn = rusqlite::Connection::open(&cfg.db_path)?;
    ocg_scheduler::db::init_db(&conn)?;
    Ok(Arc::new(Mutex::new(conn)))
}

fn ratelimit_command(cfg: &config::CliConfig, sub: RatelimitCommand) -> Result<(), CliError> {
    let limiter = RateLimiter::new(open_scheduler_conn(cfg)?);
    match sub {
        RatelimitCommand::Set(args) => {
            limiter.set_limit(&args.endpoint, &args.key, args.max_requests)?;
            println!("set {}:{} max_requests={}", args.endpoint, args.key, args.max_requests);
        }
        RatelimitCommand::List => {
            for row in limiter.list()? {
                println!(
                    "{} {} requests={} max={} window_start={}",
                    row.endpoint, row.key, row.requests, row.max_requests, row.window_start
                );
            }
        }
        RatelimitCommand::Delete { endpoint, key } => {
            if limiter.delete(&endpoint, &key)? {
                println!("deleted {endpoint}:{key}");
            } else {
                return Err(CliError::Invariant(format!("no rate limit for {endpoint}:{key}")));
            }
        }
        RatelimitCommand::Check { endpoint, key } => {
            // A bare check never admits without a configured ceiling; report
            // the current counters rather than mutating state.
            let row = limiter
                .list()?
                .into_iter()
                .find(|r| r.endpoint == endpoint && r.key == key);
            match row {
                Some(r) => println!("{} {} requests={}/{}", r.endpoint, r.key, r.requests, r.max_requests),
                None => println!("{endpoint} {key}: no limit configured (unlimited)"),
            }
        }
    }
    Ok(())
}

fn task_command(cfg: &config::CliConfig, sub: TaskCommand) -> Result<(), CliError> {
    let store = TaskStore::new(open_scheduler_conn(cfg)?);
    match sub {
        TaskCommand::Create { title, subtasks } => {
            let task = store.create_task(&title, &subtasks)?;
            println!("created task {} ({} subtasks)", task.id, task.total);
        }
        TaskCommand::List => {
            for task in store.list_tasks()? {
                println!(
                    "{} [{:?}] {} ({}/{})",
                    task.id, task.status, task.title, task.completed, task.total
                );
            }
        }
        TaskCommand::Status { id } => match store.get_task(&id)? {
            Some(task) => println!(
                "{} [{:?}] {} ({}/{}) created={} updated={}",
                task.id, task.status, task.title, task.completed, task.total, task.created_at, task.updated_at
            ),
            None => return Err(CliError::Invariant(format!("no such task: {id}"))),
        },
        TaskCommand::Retry { id } => {
            let task = store.retry_task(&id)?;
            println!("retried task {} -> [{:?}]", task.id, task.status);
        }
    }
    Ok(())
}

async fn gateway_command(cfg: &config::CliConfig, sub: GatewayCommand) -> Result<(), CliError> {
    let base = format!("http://{}:{}", cfg.host, cfg.port);
    let client = reqwest::Client::new();
    let result = match sub {
        GatewayCommand::ConfigGet => client.get(format!("{base}/v1/config")).send().await,
        GatewayCommand::ConfigApply { path } => {
            let body = std::fs::read_to_string(&path)
                .map_err(|e| CliError::Invariant(format!("cannot read {path}: {e}")))?;
            client.post(format!("{base}/v1/config")).body(body).send().await
        }
        GatewayCommand::ConfigPatch { patch } => {
            client.patch(format!("{base}/v1/config")).body(patch).send().await
        }
        GatewayCommand::Status => client.get(format!("{base}/health")).send().await,
    };

    match result {
        Ok(resp) => {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            println!("{status}: {body}");
            if status.is_success() {
                Ok(())
            } else {
                Err(CliError::Invariant(format!("gateway returned {status}")))
            }
        }
        Err(e) => Err(CliError::MissingDependency(format!("gateway unreachable at {base}: {e}"))),
    }
}
