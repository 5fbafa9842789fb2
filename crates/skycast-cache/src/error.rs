use skycast_core::UserMessage;
use skycast_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    /// No evictable space remains for the write.
    #[error("Cache capacity exceeded: {needed} bytes requested, budget {budget} bytes")]
    CapacityExceeded { needed: u64, budget: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),
}

impl CacheError {
    pub fn is_capacity_exceeded(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

impl UserMessage for CacheError {
    fn user_message(&self) -> &'static str {
        match self {
            CacheError::CapacityExceeded { .. } => "Offline storage is full; results were not saved.",
            CacheError::Storage(_) => "Offline data could not be saved for later.",
            CacheError::Serialization(_) | CacheError::Compression(_) => {
                "Cached data could not be read."
            }
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
