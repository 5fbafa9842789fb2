use skycast_core::UserMessage;
use skycast_store::StoreError;
use thiserror::Error;

/// Errors raised by the background sync manager.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Sync task not found: {0}")]
    NotFound(String),

    /// The task exhausted its attempts or hit a permanent failure.
    #[error("Sync task {id} failed after {attempts} attempts: {reason}")]
    TaskFailed {
        id: String,
        attempts: u32,
        reason: String,
    },

    #[error("Sync task {0} has not finished")]
    NotFinished(String),

    #[error("Cannot plan request: {0}")]
    Planning(String),

    #[error("Sync queue storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Sync queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    pub fn planning(message: impl Into<String>) -> Self {
        Self::Planning(message.into())
    }
}

impl UserMessage for SyncError {
    fn user_message(&self) -> &'static str {
        match self {
            SyncError::NotFound(_) => "That update is no longer queued.",
            SyncError::TaskFailed { .. } => "An update could not be completed. You can retry it.",
            SyncError::NotFinished(_) => "An update is still pending.",
            SyncError::Planning(_) => "The request could not be prepared.",
            SyncError::Storage(_) | SyncError::Serialization(_) => {
                "Unable to save pending updates."
            }
        }
    }
}

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;
