//! Smart cache manager.
//!
//! Resident entries live in memory under a single lock; every mutation is
//! written through to the key-value store so the cache survives restarts.
//! Eviction and insertion happen inside the same lock section, so a write
//! is either fully admitted or rejected.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use skycast_core::{CacheConfig, Millis, SharedClock};
use skycast_store::{StoreError, StoreHandle};

use crate::compression;
use crate::entry::{CacheEntry, SetOptions};
use crate::error::{CacheError, CacheResult};
use crate::eviction::{plan_eviction, EvictionPolicy};
use crate::stats::{CacheStats, Counters};

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    total_bytes: u64,
    next_seq: u64,
    counters: Counters,
}

impl CacheState {
    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.total_bytes -= entry.size_bytes;
        Some(entry)
    }

    /// Evict whatever the policy requires, then insert. Returns evicted keys.
    fn admit(
        &mut self,
        entry: CacheEntry,
        policy: &EvictionPolicy,
        now: Millis,
    ) -> CacheResult<Vec<String>> {
        let victims = plan_eviction(
            &self.entries,
            self.total_bytes,
            &entry.key,
            entry.size_bytes,
            policy,
            now,
        )?;
        for key in &victims {
            self.remove(key);
        }
        self.counters.evictions += victims.len() as u64;

        self.remove(&entry.key);
        self.total_bytes += entry.size_bytes;
        self.entries.insert(entry.key.clone(), entry);
        Ok(victims)
    }
}

enum Lookup<T> {
    Hit(T),
    Miss,
    Dropped,
}

struct Inner {
    config: CacheConfig,
    clock: SharedClock,
    store: Option<StoreHandle>,
    degraded: AtomicBool,
    state: Mutex<CacheState>,
}

/// TTL cache with priority-aware LRU eviction over values of type `T`.
///
/// Cloning is cheap and yields another handle to the same cache.
pub struct SmartCache<T> {
    inner: Arc<Inner>,
    _payload: PhantomData<fn() -> T>,
}

impl<T> Clone for SmartCache<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for SmartCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmartCache")
            .field("namespace", &self.inner.config.namespace)
            .field("entries", &self.inner.state.lock().entries.len())
            .finish()
    }
}

impl<T> SmartCache<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Memory-only cache.
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        Self::build(config, clock, None)
    }

    /// Cache that writes through to `store`. Call [`SmartCache::load`] to hydrate it.
    pub fn with_store(config: CacheConfig, clock: SharedClock, store: StoreHandle) -> Self {
        Self::build(config, clock, Some(store))
    }

    /// Create a store-backed cache and hydrate it from storage.
    ///
    /// A storage failure during hydration leaves an empty, memory-only cache
    /// rather than failing startup.
    pub async fn open(config: CacheConfig, clock: SharedClock, store: StoreHandle) -> Self {
        let cache = Self::with_store(config, clock, store);
        if let Err(e) = cache.load().await {
            tracing::warn!("Starting with an empty cache: {}", e);
        }
        cache
    }

    fn build(config: CacheConfig, clock: SharedClock, store: Option<StoreHandle>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                clock,
                store,
                degraded: AtomicBool::new(false),
                state: Mutex::new(CacheState::default()),
            }),
            _payload: PhantomData,
        }
    }

    fn policy(&self) -> EvictionPolicy {
        let config = &self.inner.config;
        EvictionPolicy {
            max_entries: config.max_entries,
            max_memory_bytes: config.max_memory_bytes,
            batch_size: config.eviction_batch_size,
            frequency_weight: config.frequency_weight,
        }
    }

    /// Look up a value. Expired entries are removed and reported as a miss.
    pub async fn get(&self, key: &str) -> Option<T> {
        let now = self.inner.clock.now_ms();

        let lookup = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let seq = state.bump_seq();

            let lookup = match state.entries.get_mut(key) {
                None => Lookup::Miss,
                Some(entry) if entry.is_expired(now) => {
                    state.counters.expirations += 1;
                    Lookup::Dropped
                }
                Some(entry) => match decode::<T>(entry) {
                    Ok(value) => {
                        entry.last_accessed_at = now;
                        entry.access_count += 1;
                        entry.access_seq = seq;
                        Lookup::Hit(value)
                    }
                    Err(e) => {
                        tracing::warn!(key, "Dropping unreadable cache entry: {}", e);
                        Lookup::Dropped
                    }
                },
            };

            match lookup {
                Lookup::Hit(_) => state.counters.hits += 1,
                Lookup::Miss => state.counters.misses += 1,
                Lookup::Dropped => {
                    state.counters.misses += 1;
                    state.remove(key);
                }
            }
            lookup
        };

        match lookup {
            Lookup::Hit(value) => Some(value),
            Lookup::Miss => None,
            Lookup::Dropped => {
                self.persist_removals(&[key.to_string()]).await;
                None
            }
        }
    }

    /// Insert or overwrite a value, evicting lower-value entries first if needed.
    ///
    /// After `Ok(())` the entry is resident. Fails with
    /// [`CacheError::CapacityExceeded`] when the value alone exceeds the
    /// memory budget or only Critical entries would be left to evict.
    pub async fn set(&self, key: &str, value: &T, options: SetOptions) -> CacheResult<()> {
        let config = &self.inner.config;
        let serialized = serde_json::to_vec(value)?;
        let (payload, compressed) =
            compression::maybe_compress(serialized, config.compression_threshold_bytes)?;
        let size_bytes = payload.len() as u64;

        if size_bytes > config.max_memory_bytes {
            tracing::warn!(key, size_bytes, "Value larger than the whole cache budget");
            return Err(CacheError::CapacityExceeded {
                needed: size_bytes,
                budget: config.max_memory_bytes,
            });
        }

        let now = self.inner.clock.now_ms();
        let ttl = options.ttl.unwrap_or_else(|| config.default_ttl());
        let policy = self.policy();

        let (record, victims) = {
            let mut state = self.inner.state.lock();
            let entry = CacheEntry {
                key: key.to_string(),
                value: payload,
                created_at: now,
                last_accessed_at: now,
                ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
                priority: options.priority,
                size_bytes,
                access_count: 0,
                compressed,
                access_seq: state.bump_seq(),
            };
            let victims = state.admit(entry.clone(), &policy, now).map_err(|e| {
                tracing::warn!(key, "Cache write rejected: {}", e);
                e
            })?;
            (entry, victims)
        };

        if !victims.is_empty() {
            tracing::debug!(key, evicted = victims.len(), "Evicted entries to make room");
            self.persist_removals(&victims).await;
        }
        self.persist_entry(&record).await;
        Ok(())
    }

    /// Remove a single entry. Returns whether it was resident.
    pub async fn invalidate(&self, key: &str) -> bool {
        let removed = self.inner.state.lock().remove(key).is_some();
        self.persist_removals(&[key.to_string()]).await;
        removed
    }

    /// Remove every entry, Critical ones included.
    pub async fn clear(&self) {
        {
            let mut state = self.inner.state.lock();
            state.entries.clear();
            state.total_bytes = 0;
        }

        if let Some(store) = self.active_store() {
            if let Err(e) = store.clear(&self.inner.config.namespace).await {
                self.note_storage_failure("clear", &e);
            }
        }
    }

    /// Whether a live (non-expired) entry exists. Does not count as an access.
    pub fn contains(&self, key: &str) -> bool {
        let now = self.inner.clock.now_ms();
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.state.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            hit_count: state.counters.hits,
            miss_count: state.counters.misses,
            hit_rate: state.counters.hit_rate(),
            entry_count: state.entries.len(),
            total_bytes: state.total_bytes,
            eviction_count: state.counters.evictions,
            expired_count: state.counters.expirations,
            compressed_entries: state.entries.values().filter(|e| e.compressed).count(),
            storage_degraded: self.is_degraded(),
        }
    }

    /// Whether a storage failure has switched the cache to memory-only mode.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    /// Remove every TTL-expired entry. Returns how many were removed.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.inner.clock.now_ms();

        let expired: Vec<String> = {
            let mut state = self.inner.state.lock();
            let keys: Vec<String> = state
                .entries
                .values()
                .filter(|e| e.is_expired(now))
                .map(|e| e.key.clone())
                .collect();
            for key in &keys {
                state.remove(key);
            }
            state.counters.expirations += keys.len() as u64;
            keys
        };

        if !expired.is_empty() {
            tracing::debug!(removed = expired.len(), "Swept expired cache entries");
            self.persist_removals(&expired).await;
        }
        expired.len()
    }

    /// Hydrate resident entries from storage.
    ///
    /// Expired or unreadable records are deleted; budgets are re-applied in
    /// access order. Returns the number of resident entries afterwards.
    pub async fn load(&self) -> CacheResult<usize> {
        let Some(store) = self.inner.store.as_ref() else {
            return Ok(self.len());
        };
        let namespace = &self.inner.config.namespace;

        let records = store.entries(namespace).await.map_err(|e| {
            self.note_storage_failure("load", &e);
            e
        })?;

        let now = self.inner.clock.now_ms();
        let mut discard = Vec::new();
        let mut loaded = Vec::new();

        for (key, bytes) in records {
            match serde_json::from_slice::<CacheEntry>(&bytes) {
                Ok(entry) if entry.key == key && !entry.is_expired(now) => loaded.push(entry),
                Ok(_) => discard.push(key),
                Err(e) => {
                    tracing::warn!(key, "Dropping unreadable cache record: {}", e);
                    discard.push(key);
                }
            }
        }
        loaded.sort_by_key(|e| e.access_seq);

        let policy = self.policy();
        let resident = {
            let mut state = self.inner.state.lock();
            for entry in loaded {
                state.next_seq = state.next_seq.max(entry.access_seq);
                let key = entry.key.clone();
                match state.admit(entry, &policy, now) {
                    Ok(victims) => discard.extend(victims),
                    Err(_) => discard.push(key),
                }
            }
            state.entries.len()
        };

        for key in &discard {
            store.delete(namespace, key).await.map_err(|e| {
                self.note_storage_failure("load", &e);
                e
            })?;
        }

        tracing::info!(
            resident,
            discarded = discard.len(),
            namespace = %namespace,
            "Loaded cache from storage"
        );
        Ok(resident)
    }

    /// Persist the access metadata of every resident entry.
    pub async fn flush(&self) -> CacheResult<()> {
        let Some(store) = self.active_store() else {
            return Ok(());
        };

        let snapshot: Vec<CacheEntry> = self.inner.state.lock().entries.values().cloned().collect();
        for entry in &snapshot {
            let bytes = serde_json::to_vec(entry)?;
            store
                .set(&self.inner.config.namespace, &entry.key, bytes)
                .await
                .map_err(|e| {
                    self.note_storage_failure("flush", &e);
                    CacheError::Storage(e)
                })?;
        }
        tracing::debug!(entries = snapshot.len(), "Flushed cache metadata");
        Ok(())
    }

    /// Run [`SmartCache::cleanup_expired`] every `period` until `token` is cancelled.
    pub fn spawn_cleanup(&self, period: Duration, token: CancellationToken) -> JoinHandle<()>
    where
        T: 'static,
    {
        if period.is_zero() {
            return tokio::spawn(async move { token.cancelled().await });
        }

        let cache = self.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Cache cleanup stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        cache.cleanup_expired().await;
                    }
                }
            }
        })
    }

    fn active_store(&self) -> Option<&StoreHandle> {
        if self.is_degraded() {
            None
        } else {
            self.inner.store.as_ref()
        }
    }

    async fn persist_entry(&self, entry: &CacheEntry) {
        let Some(store) = self.active_store() else {
            return;
        };
        let bytes = match serde_json::to_vec(entry) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key = %entry.key, "Failed to encode cache record: {}", e);
                return;
            }
        };
        if let Err(e) = store.set(&self.inner.config.namespace, &entry.key, bytes).await {
            self.note_storage_failure("set", &e);
        }
    }

    async fn persist_removals(&self, keys: &[String]) {
        let Some(store) = self.active_store() else {
            return;
        };
        for key in keys {
            if let Err(e) = store.delete(&self.inner.config.namespace, key).await {
                self.note_storage_failure("delete", &e);
                return;
            }
        }
    }

    fn note_storage_failure(&self, operation: &str, error: &StoreError) {
        if !self.inner.degraded.swap(true, Ordering::SeqCst) {
            tracing::warn!(
                operation,
                "Cache storage failed, continuing in memory only: {}",
                error
            );
        } else {
            tracing::debug!(operation, "Cache storage still failing: {}", error);
        }
    }
}

fn decode<T: DeserializeOwned>(entry: &CacheEntry) -> CacheResult<T> {
    if entry.compressed {
        let raw = compression::decompress(&entry.value)?;
        Ok(serde_json::from_slice(&raw)?)
    } else {
        Ok(serde_json::from_slice(&entry.value)?)
    }
}
