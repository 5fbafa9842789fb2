//! Top-level error type for code that talks to more than one Skycast crate.

use skycast_cache::CacheError;
use skycast_core::{ConfigError, UserMessage};
use skycast_net::NetworkError;
use skycast_store::StoreError;
use skycast_sync::SyncError;
use skycast_weather::WeatherError;
use thiserror::Error;

/// Every crate error converts into this type.
/// Use `user_message()` to get a UI-appropriate message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("Weather service error: {0}")]
    Weather(#[from] WeatherError),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Transient failures are worth showing with a "saved data" banner
    /// rather than as a hard error.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::Network(e) if e.is_transient())
    }
}

impl UserMessage for AppError {
    fn user_message(&self) -> &'static str {
        match self {
            AppError::Config(e) => e.user_message(),
            AppError::Store(e) => e.user_message(),
            AppError::Cache(e) => e.user_message(),
            AppError::Network(e) => e.user_message(),
            AppError::Sync(e) => e.user_message(),
            AppError::Weather(e) => e.user_message(),
            AppError::Other(_) => "An unexpected error occurred. Please try again.",
        }
    }
}
