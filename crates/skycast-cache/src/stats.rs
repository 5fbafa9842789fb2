use serde::Serialize;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hit_count: u64,
    pub miss_count: u64,
    /// Hits over lookups, 0.0 before the first lookup.
    pub hit_rate: f64,
    pub entry_count: usize,
    pub total_bytes: u64,
    pub eviction_count: u64,
    pub expired_count: u64,
    pub compressed_entries: usize,
    /// True once a storage failure moved the cache to memory-only mode.
    pub storage_degraded: bool,
}

/// Running counters kept alongside the resident entries.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl Counters {
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }
}
