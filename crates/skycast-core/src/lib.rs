//! Shared foundations for the Skycast offline layer: configuration, time,
//! priorities and error plumbing.

pub mod clock;
pub mod config;
pub mod error;
pub mod priority;

pub use clock::{Clock, ManualClock, Millis, SharedClock, SystemClock};
pub use config::{
    CacheConfig, Config, ResilienceConfig, StorageConfig, StorageEngine, SyncConfig,
    TemperatureUnit, ValidationResult, WeatherConfig,
};
pub use error::{ConfigError, UserMessage};
pub use priority::Priority;

use anyhow::Result;

/// Initialize logging for the process.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::info!("Skycast core initialized");
    Ok(())
}
