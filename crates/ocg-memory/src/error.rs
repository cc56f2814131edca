use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("memory not found: {category}/{key}")]
    NotFound { category: String, key: String },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("vector record not found: {0}")]
    VectorNotFound(i64),

    #[error("embedding error: {0}")]
    Embedding(String),

    #[error("index error: {0}")]
    Index(String),
}

impl MemoryError {
    pub fn code(&self) -> &'static str {
        match self {
            MemoryError::Database(_) => "STORE_ERROR",
            MemoryError::NotFound { .. } | MemoryError::VectorNotFound(_) => "NOT_FOUND_ERROR",
            MemoryError::Serialization(_) => "VALIDATION_ERROR",
            MemoryError::Embedding(_) => "EMBEDDING_ERROR",
            MemoryError::Index(_) => "STORE_ERROR",
        }
    }
}
