use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::error::{Result, SupervisorError};
use crate::pidfile::{self, is_alive};
use crate::types::{PidRecord, ReadinessProbe, ServiceKind, ServiceStatus};

/// How long to wait, per escalation step, for the process to exit.
const ESCALATION_STEP: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Start/stop/status across `agent -> gateway -> embedding`.
///
/// Command invocations are serial: the supervisor is driven by one CLI
/// command at a time, so no internal locking is required.
pub struct Supervisor {
    pid_dir: PathBuf,
}

impl Supervisor {
    pub fn new(pid_dir: impl Into<PathBuf>) -> Self {
        Self { pid_dir: pid_dir.into() }
    }

    pub fn status(&self, service: ServiceKind) -> ServiceStatus {
        pidfile::status(&self.pid_dir, service)
    }

    /// Spawns `command` as `service`, writes its PID file, and polls `probe`
    /// until it succeeds or `timeout` elapses.
    #[instrument(skip(self, command), fields(service = %service))]
    pub async fn start(
        &self,
        service: ServiceKind,
        mut command: std::process::Command,
        probe: ReadinessProbe,
        timeout: Duration,
    ) -> Result<()> {
        if let ServiceStatus::Running { pid } = self.status(service) {
            return Err(SupervisorError::AlreadyRunning(service.to_string(), pid));
        }

        let log_path = pidfile::log_path(&self.pid_dir, service);
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log_file = std::fs::File::create(&log_path)?;
        command
            .stdout(log_file.try_clone()?)
            .stderr(log_file);

        let child = command
            .spawn()
            .map_err(|e| SupervisorError::SpawnFailed(service.to_string(), e.to_string()))?;

        let record = PidRecord { pid: child.id() as i32, start_epoch: Utc::now().timestamp() };
        pidfile::write_pid_file(&self.pid_dir, service, record)?;
        info!(pid = record.pid, "spawned service");

        self.wait_ready(service, &probe, timeout).await
    }

    async fn wait_ready(&self, service: ServiceKind, probe: &ReadinessProbe, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if probe_once(probe).await {
                info!(service = %service, "readiness probe succeeded");
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SupervisorError::ProbeFailed(
                    service.to_string(),
                    format!("not ready within {timeout:?}"),
                ));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Escalates `SIGTERM -> SIGINT -> SIGKILL` with bounded waits between
    /// each, removing the PID file once the process is confirmed gone.
    /// Non-POSIX platforms use the native terminate primitive at every step.
    #[instrument(skip(self), fields(service = %service))]
    pub async fn stop(&self, service: ServiceKind) -> Result<()> {
        let pid = match self.status(service) {
            ServiceStatus::Stopped => return Err(SupervisorError::NotRunning(service.to_string())),
            ServiceStatus::Stale { .. } => {
                pidfile::remove_pid_file(&self.pid_dir, service)?;
                return Ok(());
            }
            ServiceStatus::Running { pid } => pid,
        };

        for step in escalation_steps() {
            send_signal(pid, step);
            if self.wait_exit(pid, ESCALATION_STEP).await {
                pidfile::remove_pid_file(&self.pid_dir, service)?;
                info!(pid, step = ?step, "service stopped");
                return Ok(());
            }
            warn!(pid, step = ?step, "process still alive after escalation step");
        }

        Err(SupervisorError::ProbeFailed(service.to_string(), "process did not exit".into()))
    }

    async fn wait_exit(&self, pid: i32, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if !is_alive(pid) {
                return true;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        !is_alive(pid)
    }

    pub async fn restart(
        &self,
        service: ServiceKind,
        command: std::process::Command,
        probe: ReadinessProbe,
        timeout: Duration,
    ) -> Result<()> {
        if matches!(self.status(service), ServiceStatus::Running { .. }) {
            self.stop(service).await?;
        }
        self.start(service, command, probe, timeout).await
    }
}

#[derive(Debug, Clone, Copy)]
enum EscalationStep {
    Term,
    Interrupt,
    Kill,
}

fn escalation_steps() -> [EscalationStep; 3] {
    [EscalationStep::Term, EscalationStep::Interrupt, EscalationStep::Kill]
}

#[cfg(unix)]
fn send_signal(pid: i32, step: EscalationStep) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;
    let sig = match step {
        EscalationStep::Term => Signal::SIGTERM,
        EscalationStep::Interrupt => Signal::SIGINT,
        EscalationStep::Kill => Signal::SIGKILL,
    };
    let _ = kill(Pid::from_raw(pid), sig);
}

#[cfg(not(unix))]
fn send_signal(pid: i32, _step: EscalationStep) {
    // No portable TERM/INT/KILL distinction outside POSIX; every escalation
    // step collapses to the same unconditional terminate.
    let _ = std::process::Command::new("taskkill")
        .args(["/PID", &pid.to_string(), "/F"])
        .status();
}

async fn probe_once(probe: &ReadinessProbe) -> bool {
    match probe {
        ReadinessProbe::HttpHealth(url) => reqwest::get(url)
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false),
        #[cfg(unix)]
        ReadinessProbe::SocketConnect(path) => tokio::net::UnixStream::connect(path).await.is_ok(),
        #[cfg(not(unix))]
        ReadinessProbe::SocketConnect(_) => false,
    }
}
