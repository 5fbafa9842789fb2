use serde::{Deserialize, Serialize};
use skycast_core::{Millis, Priority};

/// Lifecycle of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InFlight,
    Succeeded,
    Failed,
}

impl TaskStatus {
    /// Succeeded and Failed tasks are never picked up by a drain again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

/// What a task should fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum SyncPayload {
    FetchWeather { latitude: f64, longitude: f64 },
    SearchLocation { query: String },
    ReverseGeocode { latitude: f64, longitude: f64 },
}

impl SyncPayload {
    /// Stable identity of the payload, also used as its cache key.
    ///
    /// Coordinates are rounded to two decimals (about 1 km) and queries are
    /// trimmed, lowercased and whitespace-collapsed, so near-identical
    /// requests share one task and one cache entry.
    pub fn key(&self) -> String {
        match self {
            Self::FetchWeather { latitude, longitude } => {
                format!("weather:{:.2},{:.2}", latitude, longitude)
            }
            Self::SearchLocation { query } => format!("search:{}", normalize_query(query)),
            Self::ReverseGeocode { latitude, longitude } => {
                format!("place:{:.2},{:.2}", latitude, longitude)
            }
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::FetchWeather { .. } => "fetch_weather",
            Self::SearchLocation { .. } => "search_location",
            Self::ReverseGeocode { .. } => "reverse_geocode",
        }
    }
}

/// Lowercase, trim and collapse runs of whitespace.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Request to queue a task.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub payload: SyncPayload,
    pub priority: Priority,
    /// Falls back to the configured default.
    pub max_attempts: Option<u32>,
}

impl NewTask {
    pub fn new(payload: SyncPayload) -> Self {
        Self {
            payload,
            priority: Priority::default(),
            max_attempts: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }
}

/// A persisted unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncTask {
    pub id: String,
    /// Insertion order, used for FIFO within a priority.
    pub seq: u64,
    pub priority: Priority,
    pub payload: SyncPayload,
    pub attempt: u32,
    pub max_attempts: u32,
    pub next_attempt_at: Millis,
    pub status: TaskStatus,
    pub created_at: Millis,
    pub updated_at: Millis,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Cache key the result was written under.
    #[serde(default)]
    pub cache_key: Option<String>,
}

impl SyncTask {
    pub fn is_due(&self, now: Millis) -> bool {
        self.status == TaskStatus::Pending && self.next_attempt_at <= now
    }

    /// Drain order: higher priority first, then insertion order.
    pub fn drain_order(a: &SyncTask, b: &SyncTask) -> std::cmp::Ordering {
        b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq))
    }
}
