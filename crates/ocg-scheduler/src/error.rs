use thiserror::Error;

/// Errors that can occur within the cron/event/rate-limit subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("Job not found: {id}")]
    JobNotFound { id: String },

    #[error("Task not found: {id}")]
    TaskNotFound { id: String },

    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl SchedulerError {
    /// Stable error-kind code for wire responses (§7 ERROR HANDLING DESIGN).
    pub fn code(&self) -> &'static str {
        match self {
            SchedulerError::Database(_) => "STORE_ERROR",
            SchedulerError::InvalidSchedule(_) => "VALIDATION_ERROR",
            SchedulerError::JobNotFound { .. } => "NOT_FOUND_ERROR",
            SchedulerError::TaskNotFound { .. } => "NOT_FOUND_ERROR",
            SchedulerError::LimitExceeded(_) => "PERMISSION_ERROR",
            SchedulerError::Serde(_) => "VALIDATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
