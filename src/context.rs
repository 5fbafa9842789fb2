use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use skycast_cache::SmartCache;
use skycast_core::{Config, Priority, SharedClock, StorageEngine, SystemClock};
use skycast_net::{ExecuteOptions, NetworkError, ResilienceManager};
use skycast_store::{MemoryStore, SqliteStore, StoreHandle};
use skycast_sync::{NewTask, RequestPlanner, SyncManager, SyncPayload};
use skycast_weather::OpenMeteoPlanner;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;

/// Snapshot of the offline layer for a status banner.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfflineStatus {
    pub online: bool,
    pub cached_entries: usize,
    pub pending_tasks: usize,
    pub failed_tasks: usize,
    pub hit_rate: f64,
}

/// Where a [`AppContext::lookup`] result came from.
#[derive(Debug, Clone)]
pub enum LookupOutcome {
    /// Served from the cache without touching the network.
    Cached(Value),
    /// Fetched now and written to the cache.
    Fetched(Value),
    /// The network failed transiently; a background task will fill the cache.
    Queued { task_id: String, reason: NetworkError },
}

impl LookupOutcome {
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Cached(value) | Self::Fetched(value) => Some(value),
            Self::Queued { .. } => None,
        }
    }
}

/// Wires the store, cache, resilience and sync managers together.
///
/// Cheap to clone; every clone shares the same managers and background tasks.
#[derive(Clone)]
pub struct AppContext {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    cache: SmartCache<Value>,
    resilience: ResilienceManager,
    sync: SyncManager,
    planner: Arc<OpenMeteoPlanner>,
    token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config_dir", &self.inner.config.config_dir)
            .field("cache", &self.inner.cache)
            .field("sync", &self.inner.sync)
            .finish()
    }
}

impl AppContext {
    /// Build the context on the system clock.
    pub async fn open(config: Config) -> Result<Self> {
        Self::with_clock(config, SystemClock::shared()).await
    }

    /// Build the context, hydrating the cache and the sync queue from storage.
    /// Background loops are not started until [`AppContext::start`].
    pub async fn with_clock(config: Config, clock: SharedClock) -> Result<Self> {
        let store = open_store(&config);
        let planner = Arc::new(
            OpenMeteoPlanner::new(&config.weather).context("Invalid weather endpoint")?,
        );
        let resilience = ResilienceManager::with_reqwest(&config.resilience, clock.clone())
            .context("Failed to build HTTP transport")?;
        let cache = SmartCache::open(config.cache.clone(), clock.clone(), store.clone()).await;
        let sync = SyncManager::open(
            &config.sync,
            store,
            resilience.clone(),
            cache.clone(),
            planner.clone(),
            clock,
        )
        .await
        .context("Failed to load sync queue")?;

        tracing::info!(
            cached = cache.len(),
            pending = sync.pending_count(),
            "Offline layer ready"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                cache,
                resilience,
                sync,
                planner,
                token: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        })
    }

    /// Start the cache sweeper and the sync drain loop.
    pub fn start(&self) {
        let mut tasks = self.inner.tasks.lock();
        if !tasks.is_empty() {
            return;
        }
        let config = &self.inner.config;
        tasks.push(
            self.inner
                .cache
                .spawn_cleanup(config.cache.cleanup_interval(), self.inner.token.child_token()),
        );
        tasks.push(
            self.inner
                .sync
                .spawn(config.sync.drain_interval(), self.inner.token.child_token()),
        );
        tracing::debug!("Background tasks started");
    }

    /// Stop background tasks and persist cache metadata.
    pub async fn shutdown(&self) -> Result<()> {
        self.inner.token.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
        self.inner
            .cache
            .flush()
            .await
            .context("Failed to flush cache")?;
        tracing::info!("Offline layer shut down");
        Ok(())
    }

    /// Serve `payload` from the cache, else fetch it now, else queue it.
    ///
    /// Permanent failures (4xx, invalid input) are returned as errors and
    /// nothing is queued.
    pub async fn lookup(
        &self,
        payload: SyncPayload,
        priority: Priority,
    ) -> Result<LookupOutcome, AppError> {
        let planned = self.inner.planner.plan(&payload)?;
        if let Some(value) = self.inner.cache.get(&planned.cache_key).await {
            return Ok(LookupOutcome::Cached(value));
        }

        let options = ExecuteOptions::with_priority(priority);
        match self.inner.resilience.execute(planned.request, options).await {
            Ok(response) => {
                let value = response
                    .json_value()
                    .context("Upstream returned an invalid body")?;
                if let Err(e) = self
                    .inner
                    .cache
                    .set(&planned.cache_key, &value, planned.cache_options)
                    .await
                {
                    tracing::warn!(key = %planned.cache_key, "Lookup result not cached: {}", e);
                }
                Ok(LookupOutcome::Fetched(value))
            }
            Err(reason) if reason.is_transient() => {
                let task_id = self
                    .inner
                    .sync
                    .enqueue(NewTask::new(payload).with_priority(priority))
                    .await?;
                tracing::info!(task = %task_id, "Lookup queued for background sync: {}", reason);
                Ok(LookupOutcome::Queued { task_id, reason })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Flip the connectivity flag. Going online wakes the sync loop.
    pub fn set_online(&self, online: bool) {
        self.inner.resilience.set_online(online);
    }

    pub fn offline_status(&self) -> OfflineStatus {
        let stats = self.inner.cache.stats();
        OfflineStatus {
            online: self.inner.resilience.is_online(),
            cached_entries: stats.entry_count,
            pending_tasks: self.inner.sync.pending_count(),
            failed_tasks: self.inner.sync.failed_count(),
            hit_rate: stats.hit_rate,
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn cache(&self) -> &SmartCache<Value> {
        &self.inner.cache
    }

    pub fn resilience(&self) -> &ResilienceManager {
        &self.inner.resilience
    }

    pub fn sync(&self) -> &SyncManager {
        &self.inner.sync
    }
}

/// Open the configured store, falling back to memory if SQLite is unusable.
fn open_store(config: &Config) -> StoreHandle {
    match config.storage.engine {
        StorageEngine::Memory => StoreHandle::new(MemoryStore::new()),
        StorageEngine::Sqlite => match open_sqlite(config) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!("Falling back to in-memory storage: {:#}", e);
                StoreHandle::new(MemoryStore::new())
            }
        },
    }
}

fn open_sqlite(config: &Config) -> Result<StoreHandle> {
    let path = config.storage.database_path(&config.config_dir);
    let store = SqliteStore::new(&path)
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(StoreHandle::new(store))
}
