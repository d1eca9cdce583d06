use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt task row {id}: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("store connection is closed")]
    Closed,

    #[error("{0}")]
    Other(String),
}
