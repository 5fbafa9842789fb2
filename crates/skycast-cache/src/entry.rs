use serde::{Deserialize, Serialize};
use skycast_core::Millis;
use std::time::Duration;

/// Eviction weight of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CachePriority {
    /// Never evicted automatically; only `invalidate`/`clear` remove it.
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl CachePriority {
    /// Order in which tiers are drained by eviction (lower goes first).
    pub fn eviction_rank(self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn is_evictable(self) -> bool {
        !matches!(self, Self::Critical)
    }
}

/// Options for [`crate::SmartCache::set`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SetOptions {
    /// Falls back to the cache's configured default TTL.
    pub ttl: Option<Duration>,
    pub priority: CachePriority,
}

impl SetOptions {
    pub fn new(ttl: Duration, priority: CachePriority) -> Self {
        Self {
            ttl: Some(ttl),
            priority,
        }
    }

    pub fn with_priority(priority: CachePriority) -> Self {
        Self {
            ttl: None,
            priority,
        }
    }
}

/// A resident cache record, persisted as JSON under its key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheEntry {
    pub key: String,
    /// Serialized payload, gzip-compressed when `compressed` is set.
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
    pub created_at: Millis,
    pub last_accessed_at: Millis,
    pub ttl_ms: u64,
    pub priority: CachePriority,
    pub size_bytes: u64,
    pub access_count: u64,
    pub compressed: bool,
    /// Logical access clock; breaks recency ties between equal timestamps.
    #[serde(default)]
    pub access_seq: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Millis) -> bool {
        let ttl_ms = i64::try_from(self.ttl_ms).unwrap_or(i64::MAX);
        now.saturating_sub(self.created_at) > ttl_ms
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
