use skycast_core::UserMessage;
use thiserror::Error;

/// Errors raised by a key-value store engine.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage quota exceeded: {used} of {quota} bytes in use")]
    QuotaExceeded { used: u64, quota: u64 },

    #[error("Storage task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    /// Create an unavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}

impl UserMessage for StoreError {
    fn user_message(&self) -> &'static str {
        match self {
            StoreError::Sqlite(_) => "Unable to access local data. Try restarting the app.",
            StoreError::Unavailable(_) => "Offline storage is unavailable.",
            StoreError::QuotaExceeded { .. } => "Offline storage is full.",
            StoreError::Join(_) => "A data operation failed. Please try again.",
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
