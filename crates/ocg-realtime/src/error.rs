use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("session is not connected")]
    NotConnected,

    #[error("session already connected")]
    AlreadyConnected,

    #[error("vendor transport error: {0}")]
    Transport(String),

    #[error("unsupported modality directive: {0}")]
    UnsupportedModality(String),
}

impl RealtimeError {
    pub fn code(&self) -> &'static str {
        match self {
            RealtimeError::NotConnected | RealtimeError::AlreadyConnected => "VALIDATION_ERROR",
            RealtimeError::Transport(_) => "TRANSIENT_ERROR",
            RealtimeError::UnsupportedModality(_) => "CAPABILITY_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, RealtimeError>;
