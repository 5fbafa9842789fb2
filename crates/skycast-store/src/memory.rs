//! In-memory key-value store.
//!
//! Used for tests, for `storage.engine = "memory"`, and as the shape of the
//! session-only fallback. An optional byte quota and an availability switch
//! let callers exercise quota-exceeded and unavailable-storage paths.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{StoreError, StoreResult};
use crate::store::KeyValueStore;

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>,
    quota_bytes: Option<u64>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that rejects writes once `quota_bytes` would be exceeded across all namespaces.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes: Some(quota_bytes),
            ..Self::default()
        }
    }

    /// Toggle whether every operation fails with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable("memory store switched off"));
        }
        Ok(())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables.get(namespace).and_then(|t| t.get(key)).cloned())
    }

    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> StoreResult<()> {
        self.check_available()?;
        let mut tables = self.tables.lock();

        if let Some(quota) = self.quota_bytes {
            let used: u64 = tables
                .values()
                .flat_map(|t| t.values())
                .map(|v| v.len() as u64)
                .sum();
            let replaced = tables
                .get(namespace)
                .and_then(|t| t.get(key))
                .map_or(0, |v| v.len() as u64);
            let projected = used - replaced + value.len() as u64;
            if projected > quota {
                return Err(StoreError::QuotaExceeded { used, quota });
            }
        }

        tables
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        self.check_available()?;
        let mut tables = self.tables.lock();
        Ok(tables
            .get_mut(namespace)
            .and_then(|t| t.remove(key))
            .is_some())
    }

    fn keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .get(namespace)
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn entries(&self, namespace: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .get(namespace)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    fn size_bytes(&self, namespace: &str) -> StoreResult<u64> {
        self.check_available()?;
        let tables = self.tables.lock();
        Ok(tables
            .get(namespace)
            .map(|t| t.values().map(|v| v.len() as u64).sum())
            .unwrap_or(0))
    }

    fn clear(&self, namespace: &str) -> StoreResult<()> {
        self.check_available()?;
        self.tables.lock().remove(namespace);
        Ok(())
    }
}
