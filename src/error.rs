#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("{0}")]
    General(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding provider unavailable: {0}")]
    Provider(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Watcher error: {0}")]
    Watcher(String),
}

impl AppError {
    /// True for failures the caller can clear and retry (occupied restore
    /// path, vanished undo target) as opposed to hard faults.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, AppError::NotFound(_) | AppError::Conflict(_))
    }
}
