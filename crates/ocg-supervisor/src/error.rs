use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("service '{0}' is not running")]
    NotRunning(String),

    #[error("service '{0}' is already running (pid {1})")]
    AlreadyRunning(String, i32),

    #[error("pid file error: {0}")]
    PidFile(#[from] std::io::Error),

    #[error("readiness probe for '{0}' failed: {1}")]
    ProbeFailed(String, String),

    #[error("failed to spawn '{0}': {1}")]
    SpawnFailed(String, String),

    #[error("unsupported platform operation: {0}")]
    Unsupported(String),
}

impl SupervisorError {
    pub fn code(&self) -> &'static str {
        match self {
            SupervisorError::NotRunning(_) => "NOT_FOUND_ERROR",
            SupervisorError::AlreadyRunning(_, _) => "CONFLICT_ERROR",
            SupervisorError::PidFile(_) => "STORE_ERROR",
            SupervisorError::ProbeFailed(_, _) => "TRANSIENT_ERROR",
            SupervisorError::SpawnFailed(_, _) => "PROVIDER_ERROR",
            SupervisorError::Unsupported(_) => "CAPABILITY_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
