use thiserror::Error;

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The requested session does not exist in the database.
    #[error("session not found: {key}")]
    NotFound { key: String },

    /// A SQLite operation failed.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The provided session key string is malformed.
    ///
    /// Expected format: `user:{user_id}:agent:{agent_id}:{name}`
    #[error("invalid session key: {0}")]
    InvalidKey(String),

    /// The user has reached the maximum allowed number of sessions.
    #[error("session limit exceeded for user {user_id}: max {limit}")]
    LimitExceeded { user_id: String, limit: usize },

    /// A conversation-history read/write against the memory store failed.
    #[error("memory store error: {0}")]
    Memory(#[from] ocg_memory::MemoryError),

    /// A task-marker lookup against the scheduler's task store failed.
    #[error("task store error: {0}")]
    TaskStore(#[from] ocg_scheduler::SchedulerError),
}

impl SessionError {
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::NotFound { .. } => "NOT_FOUND_ERROR",
            SessionError::Database(_) | SessionError::Memory(_) | SessionError::TaskStore(_) => "STORE_ERROR",
            SessionError::InvalidKey(_) => "VALIDATION_ERROR",
            SessionError::LimitExceeded { .. } => "PERMISSION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
