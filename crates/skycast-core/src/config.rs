use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Persistent store settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Smart cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Network resilience settings
    #[serde(default)]
    pub resilience: ResilienceConfig,

    /// Background sync settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Upstream weather/geocoding endpoints
    #[serde(default)]
    pub weather: WeatherConfig,
}

/// Which engine backs the persistent key-value store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageEngine {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Storage engine (sqlite or memory)
    #[serde(default)]
    pub engine: StorageEngine,

    /// Database file name, relative to `config_dir` unless absolute
    #[serde(default = "default_database_file")]
    pub database_file: String,
}

fn default_database_file() -> String {
    "skycast.db".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: StorageEngine::default(),
            database_file: default_database_file(),
        }
    }
}

impl StorageConfig {
    /// Resolve the database path against the config directory.
    pub fn database_path(&self, config_dir: &Path) -> PathBuf {
        let path = PathBuf::from(&self.database_file);
        if path.is_absolute() {
            path
        } else {
            config_dir.join(path)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of resident entries
    pub max_entries: usize,

    /// Memory budget across all entries, in bytes
    pub max_memory_bytes: u64,

    /// TTL used when a write does not specify one
    pub default_ttl_secs: u64,

    /// Serialized values larger than this are compressed
    pub compression_threshold_bytes: usize,

    /// Maximum number of victims selected per eviction pass
    pub eviction_batch_size: usize,

    /// Interval between expired-entry sweeps
    pub cleanup_interval_secs: u64,

    /// How strongly access frequency protects an entry from eviction
    #[serde(default = "default_frequency_weight")]
    pub frequency_weight: f64,

    /// Storage namespace holding cache records
    #[serde(default = "default_cache_namespace")]
    pub namespace: String,
}

fn default_frequency_weight() -> f64 {
    0.5
}

fn default_cache_namespace() -> String {
    "cache_entries".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            max_memory_bytes: 50 * 1024 * 1024,
            default_ttl_secs: 30 * 60,
            compression_threshold_bytes: 1024,
            eviction_batch_size: 10,
            cleanup_interval_secs: 5 * 60,
            frequency_weight: default_frequency_weight(),
            namespace: default_cache_namespace(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Consecutive failures before a circuit opens
    pub failure_threshold: u32,

    /// Time an open circuit waits before allowing a trial call
    pub cooldown_secs: u64,

    /// Delay before the first retry (doubles each attempt)
    pub base_delay_ms: u64,

    /// Upper bound on retry delay
    pub max_delay_ms: u64,

    /// Default retries after the first attempt
    pub max_retries: u32,

    /// Default per-attempt timeout
    pub timeout_ms: u64,

    /// Concurrent in-flight requests; 0 disables the limit
    pub max_concurrent: usize,

    /// User agent sent upstream
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_user_agent() -> String {
    format!("Skycast/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown_secs: 30,
            base_delay_ms: 1_000,
            max_delay_ms: 16_000,
            max_retries: 3,
            timeout_ms: 10_000,
            max_concurrent: 6,
            user_agent: default_user_agent(),
        }
    }
}

impl ResilienceConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Interval between periodic queue drains
    pub drain_interval_secs: u64,

    /// Attempts before a task is marked failed
    pub max_attempts: u32,

    /// How long finished tasks are kept before being purged
    pub retention_hours: u64,

    /// Storage namespace holding queued tasks
    #[serde(default = "default_sync_namespace")]
    pub namespace: String,
}

fn default_sync_namespace() -> String {
    "sync_queue".to_string()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            drain_interval_secs: 30,
            max_attempts: 5,
            retention_hours: 24,
            namespace: default_sync_namespace(),
        }
    }
}

impl SyncConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_hours * 3600)
    }
}

/// Temperature unit preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    #[default]
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherConfig {
    /// Open-Meteo forecast endpoint
    pub forecast_url: String,

    /// Open-Meteo geocoding search endpoint
    pub geocoding_url: String,

    /// Nominatim reverse geocoding endpoint
    pub reverse_geocode_url: String,

    /// Temperature unit requested upstream
    #[serde(default)]
    pub temperature_unit: TemperatureUnit,

    /// How long fetched weather stays fresh, in minutes
    pub refresh_minutes: u32,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            forecast_url: "https://api.open-meteo.com/v1/forecast".to_string(),
            geocoding_url: "https://geocoding-api.open-meteo.com/v1/search".to_string(),
            reverse_geocode_url: "https://nominatim.openstreetmap.org/reverse".to_string(),
            temperature_unit: TemperatureUnit::default(),
            refresh_minutes: 30,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("skycast");

        Self {
            config_dir,
            storage: StorageConfig::default(),
            cache: CacheConfig::default(),
            resilience: ResilienceConfig::default(),
            sync: SyncConfig::default(),
            weather: WeatherConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit file path, writing defaults if missing
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        for warning in &validation.warnings {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    ///
    /// Returns a ValidationResult containing any errors or warnings.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        // Cache budgets
        if self.cache.max_entries == 0 {
            result.add_error("cache.max_entries", "Cache must allow at least one entry");
        }
        if self.cache.max_memory_bytes == 0 {
            result.add_error("cache.max_memory_bytes", "Memory budget must be greater than 0");
        }
        if self.cache.eviction_batch_size == 0 {
            result.add_error(
                "cache.eviction_batch_size",
                "Eviction batch size must be greater than 0",
            );
        }
        if self.cache.cleanup_interval_secs == 0 {
            result.add_warning("cache.cleanup_interval_secs", "Periodic cleanup disabled");
        }
        if !(0.0..=10.0).contains(&self.cache.frequency_weight) {
            result.add_warning(
                "cache.frequency_weight",
                "Frequency weight outside 0..=10 makes eviction ignore recency",
            );
        }

        // Resilience
        if self.resilience.failure_threshold == 0 {
            result.add_error(
                "resilience.failure_threshold",
                "Failure threshold must be greater than 0",
            );
        }
        if self.resilience.base_delay_ms > self.resilience.max_delay_ms {
            result.add_error(
                "resilience.base_delay_ms",
                "Base delay must not exceed max delay",
            );
        }
        if self.resilience.timeout_ms == 0 {
            result.add_error("resilience.timeout_ms", "Timeout must be greater than 0");
        }
        if self.resilience.max_concurrent == 0 {
            result.add_warning("resilience.max_concurrent", "Concurrency limit disabled");
        }

        // Sync
        if self.sync.max_attempts == 0 {
            result.add_error("sync.max_attempts", "Tasks need at least one attempt");
        }
        if self.sync.drain_interval_secs == 0 {
            result.add_warning("sync.drain_interval_secs", "Periodic drain disabled");
        }

        // Upstream URLs
        self.validate_url(&self.weather.forecast_url, "weather.forecast_url", &mut result);
        self.validate_url(&self.weather.geocoding_url, "weather.geocoding_url", &mut result);
        self.validate_url(
            &self.weather.reverse_geocode_url,
            "weather.reverse_geocode_url",
            &mut result,
        );

        if self.weather.refresh_minutes == 0 {
            result.add_warning(
                "weather.refresh_minutes",
                "Weather results expire immediately (0 minutes)",
            );
        } else if self.weather.refresh_minutes > 1440 {
            result.add_warning(
                "weather.refresh_minutes",
                "Weather refresh interval is more than 24 hours",
            );
        }

        result
    }

    /// Validate a URL field
    fn validate_url(&self, url_str: &str, field_name: &str, result: &mut ValidationResult) {
        match Url::parse(url_str) {
            Ok(url) => {
                if url.scheme() != "http" && url.scheme() != "https" {
                    result.add_error(
                        field_name,
                        format!("URL must use http or https scheme, got: {}", url.scheme()),
                    );
                }

                if url.host().is_none() {
                    result.add_error(field_name, "URL must have a host");
                }

                if url.port() == Some(0) {
                    result.add_error(field_name, "Port cannot be 0");
                }
            }
            Err(e) => {
                result.add_error(field_name, format!("Invalid URL: {}", e));
            }
        }
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    /// Save configuration to an explicit file path
    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("skycast");

        Ok(config_dir.join("config.toml"))
    }
}
