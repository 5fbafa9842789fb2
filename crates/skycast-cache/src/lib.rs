//! Offline-first cache for weather and location lookups.
//!
//! [`SmartCache`] keeps typed values with a TTL and an eviction priority,
//! compresses large payloads, and writes through to a
//! [`skycast_store::KeyValueStore`] namespace so entries survive restarts.

pub mod compression;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod manager;
pub mod stats;

pub use entry::{CacheEntry, CachePriority, SetOptions};
pub use error::{CacheError, CacheResult};
pub use manager::SmartCache;
pub use stats::CacheStats;
