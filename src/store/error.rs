use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("background task join error: {0}")]
    TaskJoin(String),

    #[error("session not found: {0}")]
    SessionNotFound(i64),

    #[error("resumable task not found: {0}")]
    TaskNotFound(i64),
}

pub type StoreResult<T> = Result<T, StoreError>;
