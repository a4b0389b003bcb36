use thiserror::Error;

/// HikiBridge application errors
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration file errors and missing settings
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (path, size, etc.)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Export file could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Start-at-login registration errors
    #[error("Autostart error: {0}")]
    Autostart(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV reader errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// HTTP client errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Filesystem notification errors
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),

    /// Mutex poison error
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl<T> From<std::sync::PoisonError<T>> for BridgeError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        BridgeError::LockPoisoned(err.to_string())
    }
}
