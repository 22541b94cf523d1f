use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] r2d2::Error),

    #[error("Database execution error: {0}")]
    Rusqlite(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("Serialization/Deserialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Optimistic concurrency conflict on deal {0}")]
    Conflict(uuid::Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

pub type StoreResult<T> = Result<T, StoreError>;
