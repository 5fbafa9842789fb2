//! Key-value store trait and its async handle.

use std::sync::Arc;

use crate::error::StoreResult;

/// A namespaced byte store.
///
/// Namespaces play the role of logical tables (`cache_entries`,
/// `sync_queue`). Implementations are blocking; use [`StoreHandle`] from
/// async code so storage I/O runs off the runtime's worker threads.
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or replace a value.
    fn set(&self, namespace: &str, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Delete a value. Returns whether it existed.
    fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool>;

    /// All keys in a namespace, in key order.
    fn keys(&self, namespace: &str) -> StoreResult<Vec<String>>;

    /// All key/value pairs in a namespace, in key order.
    fn entries(&self, namespace: &str) -> StoreResult<Vec<(String, Vec<u8>)>>;

    /// Total stored value bytes in a namespace.
    fn size_bytes(&self, namespace: &str) -> StoreResult<u64>;

    /// Remove every value in a namespace.
    fn clear(&self, namespace: &str) -> StoreResult<()>;
}

/// Cloneable async wrapper around a shared [`KeyValueStore`].
#[derive(Clone)]
pub struct StoreHandle {
    inner: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle").finish_non_exhaustive()
    }
}

impl StoreHandle {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            inner: Arc::new(store),
        }
    }

    pub fn from_arc(store: Arc<dyn KeyValueStore>) -> Self {
        Self { inner: store }
    }

    /// Run a blocking store call on the blocking thread pool.
    async fn run<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn KeyValueStore) -> StoreResult<T> + Send + 'static,
    {
        let store = self.inner.clone();
        tokio::task::spawn_blocking(move || f(store.as_ref())).await?
    }

    pub async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.run(move |s| s.get(&namespace, &key)).await
    }

    pub async fn set(&self, namespace: &str, key: &str, value: Vec<u8>) -> StoreResult<()> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.run(move |s| s.set(&namespace, &key, &value)).await
    }

    pub async fn delete(&self, namespace: &str, key: &str) -> StoreResult<bool> {
        let (namespace, key) = (namespace.to_string(), key.to_string());
        self.run(move |s| s.delete(&namespace, &key)).await
    }

    pub async fn keys(&self, namespace: &str) -> StoreResult<Vec<String>> {
        let namespace = namespace.to_string();
        self.run(move |s| s.keys(&namespace)).await
    }

    pub async fn entries(&self, namespace: &str) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let namespace = namespace.to_string();
        self.run(move |s| s.entries(&namespace)).await
    }

    pub async fn size_bytes(&self, namespace: &str) -> StoreResult<u64> {
        let namespace = namespace.to_string();
        self.run(move |s| s.size_bytes(&namespace)).await
    }

    pub async fn clear(&self, namespace: &str) -> StoreResult<()> {
        let namespace = namespace.to_string();
        self.run(move |s| s.clear(&namespace)).await
    }
}
