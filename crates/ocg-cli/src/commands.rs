use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ocg", about = "Supervises and drives the OCG agent runtime")]
pub struct Cli {
    /// Path to the flat KEY=VALUE config file (falls back to OCG_CONFIG / ~/.ocg/ocg.conf).
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start agent, gateway, and embedding in order.
    Start,
    /// Stop all running services.
    Stop,
    /// Report PID/liveness for each service.
    Status,
    /// Stop then start all services.
    Restart,
    /// Open an interactive chat session against the running agent.
    Agent,
    #[command(subcommand)]
    Ratelimit(RatelimitCommand),
    #[command(subcommand)]
    Task(TaskCommand),
    /// Check provider health.
    Llmhealth {
        #[arg(long)]
        action: String,
    },
    /// List or replay recent hook events.
    Hooks,
    /// Inspect configured webhook endpoints.
    Webhook,
    #[command(subcommand)]
    Gateway(GatewayCommand),
}

#[derive(Subcommand, Debug)]
pub enum RatelimitCommand {
    Set(RatelimitSetArgs),
    List,
    Delete { endpoint: String, key: String },
    Check { endpoint: String, key: String },
}

#[derive(Args, Debug)]
pub struct RatelimitSetArgs {
    pub endpoint: String,
    pub key: String,
    pub max_requests: i64,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    Create {
        title: String,
        #[arg(long, value_delimiter = ',')]
        subtasks: Vec<String>,
    },
    List,
    Status { id: String },
    Retry { id: String },
}

#[derive(Subcommand, Debug)]
pub enum GatewayCommand {
    ConfigGet,
    ConfigApply { path: String },
    ConfigPatch { patch: String },
    Status,
}
