//! Background sync manager.
//!
//! Owns the persisted task queue and drains it through the resilience
//! manager, writing successful results into the shared cache.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use skycast_cache::SmartCache;
use skycast_core::{Millis, SharedClock, SyncConfig};
use skycast_net::{ExecuteOptions, NetworkError, ResilienceManager};
use skycast_store::StoreHandle;

use crate::error::{SyncError, SyncResult};
use crate::planner::RequestPlanner;
use crate::queue::TaskQueue;
use crate::task::{NewTask, SyncTask, TaskStatus};

const MIN_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Tasks picked up by this pass.
    pub attempted: usize,
    pub succeeded: usize,
    /// Failed this time but scheduled for another attempt.
    pub retried: usize,
    /// Reached Failed during this pass.
    pub failed: usize,
    /// Put back without using an attempt (offline or open circuit).
    pub deferred: usize,
    /// Tasks whose bookkeeping could not be saved.
    pub errors: usize,
    /// The pass stopped early because the network is offline.
    pub offline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Retrying,
    Failed,
    Deferred,
}

impl DrainReport {
    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded => self.succeeded += 1,
            TaskOutcome::Retrying => self.retried += 1,
            TaskOutcome::Failed => self.failed += 1,
            TaskOutcome::Deferred => self.deferred += 1,
        }
    }
}

struct Inner {
    queue: TaskQueue,
    resilience: ResilienceManager,
    cache: SmartCache<serde_json::Value>,
    planner: Arc<dyn RequestPlanner>,
    clock: SharedClock,
    max_attempts: u32,
    retention: Duration,
    drain_lock: tokio::sync::Mutex<()>,
    wake: Notify,
}

/// Cloneable handle to the background sync queue.
#[derive(Clone)]
pub struct SyncManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("tasks", &self.inner.queue.len())
            .field("max_attempts", &self.inner.max_attempts)
            .finish()
    }
}

impl SyncManager {
    /// Load the persisted queue and recover tasks interrupted mid-flight.
    pub async fn open(
        config: &SyncConfig,
        store: StoreHandle,
        resilience: ResilienceManager,
        cache: SmartCache<serde_json::Value>,
        planner: Arc<dyn RequestPlanner>,
        clock: SharedClock,
    ) -> SyncResult<Self> {
        let queue = TaskQueue::open(store, config.namespace.clone(), clock.now_ms()).await?;
        tracing::info!(tasks = queue.len(), "Sync queue loaded");

        Ok(Self {
            inner: Arc::new(Inner {
                queue,
                resilience,
                cache,
                planner,
                clock,
                max_attempts: config.max_attempts.max(1),
                retention: config.retention(),
                drain_lock: tokio::sync::Mutex::new(()),
                wake: Notify::new(),
            }),
        })
    }

    /// Queue a task and return its id.
    ///
    /// If a Pending or InFlight task already exists for the same payload,
    /// its id is returned and nothing is queued.
    pub async fn enqueue(&self, new: NewTask) -> SyncResult<String> {
        let key = new.payload.key();
        if let Some(existing) = self.inner.queue.find_active(&key) {
            tracing::debug!(task = %existing, key = %key, "Task already queued");
            return Ok(existing);
        }

        let now = self.inner.clock.now_ms();
        let task = SyncTask {
            id: uuid::Uuid::new_v4().to_string(),
            seq: self.inner.queue.next_seq(),
            priority: new.priority,
            payload: new.payload,
            attempt: 0,
            max_attempts: new.max_attempts.unwrap_or(self.inner.max_attempts).max(1),
            next_attempt_at: now,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            last_error: None,
            cache_key: None,
        };
        let id = task.id.clone();
        self.inner.queue.insert(task).await?;

        tracing::info!(task = %id, key = %key, "Sync task queued");
        Ok(id)
    }

    /// Run every due Pending task once, highest priority first and FIFO
    /// within a priority. Concurrent calls are serialised.
    pub async fn drain(&self) -> DrainReport {
        let _guard = self.inner.drain_lock.lock().await;
        let mut report = DrainReport::default();
        if self.inner.queue.unsaved_count() > 0 {
            if let Err(e) = self.inner.queue.flush().await {
                tracing::warn!("Sync task changes still unsaved: {}", e);
            }
        }
        if !self.inner.resilience.is_online() {
            report.offline = true;
            return report;
        }

        let due = self.inner.queue.due(self.inner.clock.now_ms());
        for task in due {
            if !self.inner.resilience.is_online() {
                report.offline = true;
                break;
            }
            // Cancelled or retried since the snapshot was taken.
            let still_pending = self
                .inner
                .queue
                .get(&task.id)
                .is_some_and(|t| t.status == TaskStatus::Pending);
            if !still_pending {
                continue;
            }

            report.attempted += 1;
            let id = task.id.clone();
            match self.run_task(task).await {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    tracing::warn!(task = %id, "Sync task bookkeeping failed: {}", e);
                    report.errors += 1;
                }
            }
        }

        if report.attempted > 0 {
            tracing::info!(
                attempted = report.attempted,
                succeeded = report.succeeded,
                retried = report.retried,
                failed = report.failed,
                "Sync drain finished"
            );
        }
        report
    }

    async fn run_task(&self, task: SyncTask) -> SyncResult<TaskOutcome> {
        let id = task.id;
        let planned = match self.inner.planner.plan(&task.payload) {
            Ok(planned) => planned,
            Err(e) => {
                self.fail_permanently(&id, e.to_string()).await?;
                return Ok(TaskOutcome::Failed);
            }
        };

        let started = self.inner.clock.now_ms();
        self.inner
            .queue
            .update(&id, |t| {
                t.status = TaskStatus::InFlight;
                t.updated_at = started;
            })
            .await?;

        let options = ExecuteOptions::with_priority(task.priority);
        let response = match self.inner.resilience.execute(planned.request, options).await {
            Ok(response) => response,
            Err(NetworkError::Offline) => {
                self.defer(&id, None).await?;
                return Ok(TaskOutcome::Deferred);
            }
            Err(NetworkError::CircuitOpen { retry_after_ms, .. }) => {
                self.defer(&id, Some(retry_after_ms)).await?;
                return Ok(TaskOutcome::Deferred);
            }
            Err(e) => return self.record_failure(&id, &e).await,
        };

        let value = match response.json_value() {
            Ok(value) => value,
            Err(e) => {
                self.fail_permanently(&id, format!("Invalid response body: {}", e))
                    .await?;
                return Ok(TaskOutcome::Failed);
            }
        };

        // A result that cannot be cached still counts as fetched.
        let cache_key = match self
            .inner
            .cache
            .set(&planned.cache_key, &value, planned.cache_options)
            .await
        {
            Ok(()) => Some(planned.cache_key),
            Err(e) => {
                tracing::warn!(task = %id, "Sync result not cached: {}", e);
                None
            }
        };

        let now = self.inner.clock.now_ms();
        self.inner
            .queue
            .commit(&id, |t| {
                t.status = TaskStatus::Succeeded;
                t.last_error = None;
                t.cache_key = cache_key;
                t.updated_at = now;
            })
            .await?;
        tracing::debug!(task = %id, "Sync task succeeded");
        Ok(TaskOutcome::Succeeded)
    }

    async fn record_failure(&self, id: &str, err: &NetworkError) -> SyncResult<TaskOutcome> {
        let now = self.inner.clock.now_ms();
        let permanent = !err.is_transient();
        let retry = self.inner.resilience.retry_policy();

        let task = self
            .inner
            .queue
            .commit(id, |t| {
                t.attempt = (t.attempt + 1).min(t.max_attempts);
                t.last_error = Some(err.to_string());
                t.updated_at = now;
                if permanent || t.attempt >= t.max_attempts {
                    t.status = TaskStatus::Failed;
                } else {
                    t.status = TaskStatus::Pending;
                    let delay = retry.delay_before_attempt(t.attempt + 1);
                    t.next_attempt_at = now + delay.as_millis() as Millis;
                }
            })
            .await?;

        if task.status == TaskStatus::Failed {
            tracing::error!(
                task = %id,
                attempts = task.attempt,
                "Sync task failed: {}",
                err
            );
            Ok(TaskOutcome::Failed)
        } else {
            tracing::warn!(
                task = %id,
                attempt = task.attempt,
                max_attempts = task.max_attempts,
                next_attempt_at = task.next_attempt_at,
                "Sync task will retry: {}",
                err
            );
            Ok(TaskOutcome::Retrying)
        }
    }

    async fn fail_permanently(&self, id: &str, reason: String) -> SyncResult<()> {
        let now = self.inner.clock.now_ms();
        tracing::error!(task = %id, "Sync task failed: {}", reason);
        self.inner
            .queue
            .commit(id, |t| {
                t.attempt = (t.attempt + 1).min(t.max_attempts);
                t.status = TaskStatus::Failed;
                t.last_error = Some(reason);
                t.updated_at = now;
            })
            .await?;
        Ok(())
    }

    /// Put a task back to Pending without spending an attempt.
    async fn defer(&self, id: &str, delay_ms: Option<u64>) -> SyncResult<()> {
        let now = self.inner.clock.now_ms();
        self.inner
            .queue
            .commit(id, |t| {
                t.status = TaskStatus::Pending;
                t.updated_at = now;
                if let Some(delay_ms) = delay_ms {
                    t.next_attempt_at = now + delay_ms as Millis;
                }
            })
            .await?;
        Ok(())
    }

    pub fn get_task_status(&self, id: &str) -> SyncResult<SyncTask> {
        self.inner
            .queue
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.to_string()))
    }

    /// The task if it succeeded; [`SyncError::TaskFailed`] if it failed.
    pub fn ensure_succeeded(&self, id: &str) -> SyncResult<SyncTask> {
        let task = self.get_task_status(id)?;
        match task.status {
            TaskStatus::Succeeded => Ok(task),
            TaskStatus::Failed => Err(SyncError::TaskFailed {
                id: task.id,
                attempts: task.attempt,
                reason: task.last_error.unwrap_or_default(),
            }),
            TaskStatus::Pending | TaskStatus::InFlight => Err(SyncError::NotFinished(task.id)),
        }
    }

    /// Give a task a fresh set of attempts, due immediately.
    ///
    /// Tasks that are in flight or already succeeded are returned unchanged.
    pub async fn retry(&self, id: &str) -> SyncResult<SyncTask> {
        let task = self.get_task_status(id)?;
        if matches!(task.status, TaskStatus::InFlight | TaskStatus::Succeeded) {
            return Ok(task);
        }

        let now = self.inner.clock.now_ms();
        let task = self
            .inner
            .queue
            .update(id, |t| {
                t.attempt = 0;
                t.status = TaskStatus::Pending;
                t.next_attempt_at = now;
                t.last_error = None;
                t.updated_at = now;
            })
            .await?;
        tracing::info!(task = %id, "Sync task reset for retry");
        self.inner.wake.notify_one();
        Ok(task)
    }

    /// Mark a task Failed so it is never attempted again. Terminal tasks
    /// are returned unchanged.
    pub async fn cancel(&self, id: &str) -> SyncResult<SyncTask> {
        let task = self.get_task_status(id)?;
        if task.status.is_terminal() {
            return Ok(task);
        }

        let now = self.inner.clock.now_ms();
        let task = self
            .inner
            .queue
            .update(id, |t| {
                t.status = TaskStatus::Failed;
                t.last_error = Some("Cancelled".to_string());
                t.updated_at = now;
            })
            .await?;
        tracing::info!(task = %id, "Sync task cancelled");
        Ok(task)
    }

    /// Remove a Succeeded or Failed task once the caller has seen it.
    pub async fn acknowledge(&self, id: &str) -> SyncResult<SyncTask> {
        let task = self.get_task_status(id)?;
        if task.status.is_active() {
            return Err(SyncError::NotFinished(task.id));
        }
        self.inner.queue.remove(id).await?;
        Ok(task)
    }

    /// Remove terminal tasks untouched for longer than the retention window.
    pub async fn purge_expired(&self) -> SyncResult<usize> {
        let cutoff = self.inner.clock.now_ms() - self.inner.retention.as_millis() as Millis;
        let expired: Vec<String> = self
            .inner
            .queue
            .list()
            .into_iter()
            .filter(|t| t.status.is_terminal() && t.updated_at <= cutoff)
            .map(|t| t.id)
            .collect();

        for id in &expired {
            self.inner.queue.remove(id).await?;
        }
        if !expired.is_empty() {
            tracing::info!(count = expired.len(), "Purged finished sync tasks");
        }
        Ok(expired.len())
    }

    pub fn pending_count(&self) -> usize {
        self.inner.queue.count(TaskStatus::Pending) + self.inner.queue.count(TaskStatus::InFlight)
    }

    pub fn failed_count(&self) -> usize {
        self.inner.queue.count(TaskStatus::Failed)
    }

    /// Every task in drain order.
    pub fn list(&self) -> Vec<SyncTask> {
        self.inner.queue.list()
    }

    /// Ask the background loop to drain now.
    pub fn notify_online(&self) {
        self.inner.wake.notify_one();
    }

    /// Drain every `period`, on [`SyncManager::notify_online`], and whenever
    /// the resilience manager goes back online, until `token` is cancelled.
    pub fn spawn(&self, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        let manager = self.clone();
        let mut online = self.inner.resilience.subscribe_online();
        let period = period.max(MIN_DRAIN_INTERVAL);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut watching = true;

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("Sync loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {}
                    _ = manager.inner.wake.notified() => {
                        tracing::debug!("Sync drain requested");
                    }
                    changed = online.changed(), if watching => {
                        if changed.is_err() {
                            watching = false;
                            continue;
                        }
                        if !*online.borrow_and_update() {
                            continue;
                        }
                        tracing::info!("Connectivity restored, draining sync queue");
                    }
                }

                manager.drain().await;
                if let Err(e) = manager.purge_expired().await {
                    tracing::warn!("Failed to purge sync tasks: {}", e);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlannedRequest;
    use crate::task::SyncPayload;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use skycast_cache::SetOptions;
    use skycast_core::{CacheConfig, Clock, ManualClock, Priority, ResilienceConfig};
    use skycast_net::{ApiRequest, ApiResponse, Transport};
    use skycast_store::MemoryStore;
    use std::collections::VecDeque;
    use url::Url;

    /// Replays canned statuses and records each request URL.
    #[derive(Default)]
    struct FakeUpstream {
        statuses: Mutex<VecDeque<u16>>,
        seen: Mutex<Vec<String>>,
    }

    impl FakeUpstream {
        fn new(statuses: &[u16]) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                ..Self::default()
            })
        }

        fn set(&self, statuses: &[u16]) {
            *self.statuses.lock() = statuses.iter().copied().collect();
        }

        fn calls(&self) -> usize {
            self.seen.lock().len()
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeUpstream {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, NetworkError> {
            self.seen.lock().push(request.url.path().trim_start_matches('/').to_string());
            let mut statuses = self.statuses.lock();
            let status = if statuses.len() > 1 {
                statuses.pop_front().unwrap_or(200)
            } else {
                statuses.front().copied().unwrap_or(200)
            };
            let body = if status < 400 {
                br#"{"temperature": 12.5}"#.to_vec()
            } else {
                Vec::new()
            };
            Ok(ApiResponse::new(status, body))
        }
    }

    /// Sends every payload to `https://upstream.test/<payload key>`.
    struct KeyPlanner;

    impl RequestPlanner for KeyPlanner {
        fn plan(&self, payload: &SyncPayload) -> SyncResult<PlannedRequest> {
            let key = payload.key();
            let url = Url::parse(&format!("https://upstream.test/{}", key))
                .map_err(|e| SyncError::planning(e.to_string()))?;
            Ok(PlannedRequest {
                request: ApiRequest::get("upstream", url),
                cache_key: key,
                cache_options: SetOptions::default(),
            })
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        upstream: Arc<FakeUpstream>,
        store: StoreHandle,
        resilience: ResilienceManager,
        cache: SmartCache<serde_json::Value>,
        sync: SyncManager,
    }

    impl Harness {
        async fn new(statuses: &[u16]) -> Self {
            let clock = ManualClock::new(1_000_000);
            let upstream = FakeUpstream::new(statuses);
            let store = StoreHandle::new(MemoryStore::new());
            let resilience = ResilienceManager::new(
                &ResilienceConfig {
                    max_retries: 0,
                    ..ResilienceConfig::default()
                },
                upstream.clone(),
                clock.clone(),
            );
            let cache = SmartCache::new(CacheConfig::default(), clock.clone());
            let sync = Self::open_sync(&store, &resilience, &cache, &clock).await;
            Self {
                clock,
                upstream,
                store,
                resilience,
                cache,
                sync,
            }
        }

        async fn open_sync(
            store: &StoreHandle,
            resilience: &ResilienceManager,
            cache: &SmartCache<serde_json::Value>,
            clock: &Arc<ManualClock>,
        ) -> SyncManager {
            SyncManager::open(
                &SyncConfig::default(),
                store.clone(),
                resilience.clone(),
                cache.clone(),
                Arc::new(KeyPlanner),
                clock.clone(),
            )
            .await
            .unwrap()
        }

        async fn reopen(&self) -> SyncManager {
            Self::open_sync(&self.store, &self.resilience, &self.cache, &self.clock).await
        }
    }

    fn weather(latitude: f64, longitude: f64) -> NewTask {
        NewTask::new(SyncPayload::FetchWeather {
            latitude,
            longitude,
        })
    }

    fn search(query: &str) -> NewTask {
        NewTask::new(SyncPayload::SearchLocation {
            query: query.to_string(),
        })
    }

    #[tokio::test]
    async fn test_drain_success_populates_cache() {
        let h = Harness::new(&[200]).await;
        let id = h.sync.enqueue(weather(40.71, -74.0)).await.unwrap();

        let report = h.sync.drain().await;

        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        let task = h.sync.get_task_status(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.cache_key.as_deref(), Some("weather:40.71,-74.00"));

        let cached = h.cache.get("weather:40.71,-74.00").await.unwrap();
        assert_eq!(cached["temperature"], 12.5);
        assert!(h.sync.ensure_succeeded(&id).is_ok());
    }

    #[tokio::test]
    async fn test_enqueue_deduplicates_active_payloads() {
        let h = Harness::new(&[200]).await;

        let first = h.sync.enqueue(search("New York")).await.unwrap();
        let again = h.sync.enqueue(search("  new york ")).await.unwrap();
        let other = h.sync.enqueue(search("Boston")).await.unwrap();

        assert_eq!(first, again);
        assert_ne!(first, other);
        assert_eq!(h.sync.pending_count(), 2);

        h.sync.drain().await;
        let fresh = h.sync.enqueue(search("New York")).await.unwrap();
        assert_ne!(fresh, first);
    }

    #[tokio::test]
    async fn test_retries_with_backoff_until_failed() {
        let h = Harness::new(&[503]).await;
        let id = h.sync.enqueue(weather(1.0, 2.0).with_max_attempts(3)).await.unwrap();

        let report = h.sync.drain().await;
        assert_eq!(report.retried, 1);
        let task = h.sync.get_task_status(&id).unwrap();
        assert_eq!(task.attempt, 1);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.next_attempt_at, h.clock.now_ms() + 1_000);

        // Not due yet.
        assert_eq!(h.sync.drain().await.attempted, 0);

        h.clock.advance(1_000);
        h.sync.drain().await;
        let task = h.sync.get_task_status(&id).unwrap();
        assert_eq!(task.attempt, 2);
        assert_eq!(task.next_attempt_at, h.clock.now_ms() + 2_000);

        h.clock.advance(2_000);
        let report = h.sync.drain().await;
        assert_eq!(report.failed, 1);
        let task = h.sync.get_task_status(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempt, 3);
        assert!(task.last_error.is_some());

        // A fourth drain leaves the failed task alone.
        h.clock.advance(60_000);
        assert_eq!(h.sync.drain().await.attempted, 0);
        assert_eq!(h.upstream.calls(), 3);
        assert_eq!(h.sync.failed_count(), 1);

        let err = h.sync.ensure_succeeded(&id).unwrap_err();
        assert!(matches!(err, SyncError::TaskFailed { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_client_error_fails_immediately() {
        let h = Harness::new(&[404]).await;
        let id = h.sync.enqueue(search("nowhere")).await.unwrap();

        let report = h.sync.drain().await;

        assert_eq!(report.failed, 1);
        let task = h.sync.get_task_status(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempt, 1);
    }

    #[tokio::test]
    async fn test_drain_order_is_priority_then_fifo() {
        let h = Harness::new(&[200]).await;
        h.sync.enqueue(search("low").with_priority(Priority::Low)).await.unwrap();
        h.sync.enqueue(search("medium-1")).await.unwrap();
        h.sync.enqueue(search("high").with_priority(Priority::High)).await.unwrap();
        h.sync.enqueue(search("medium-2")).await.unwrap();

        h.sync.drain().await;

        assert_eq!(
            h.upstream.seen(),
            vec!["search:high", "search:medium-1", "search:medium-2", "search:low"]
        );
    }

    #[tokio::test]
    async fn test_manual_retry_resets_attempts() {
        let h = Harness::new(&[500]).await;
        let id = h.sync.enqueue(weather(5.0, 5.0).with_max_attempts(1)).await.unwrap();
        h.sync.drain().await;
        assert_eq!(h.sync.get_task_status(&id).unwrap().status, TaskStatus::Failed);

        h.upstream.set(&[200]);
        let task = h.sync.retry(&id).await.unwrap();
        assert_eq!(task.attempt, 0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.last_error.is_none());

        h.sync.drain().await;
        assert_eq!(h.sync.get_task_status(&id).unwrap().status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_retry_leaves_succeeded_task_alone() {
        let h = Harness::new(&[200]).await;
        let id = h.sync.enqueue(search("Madrid")).await.unwrap();
        h.sync.drain().await;

        let task = h.sync.retry(&id).await.unwrap();

        assert_eq!(task.status, TaskStatus::Succeeded);
        assert_eq!(task.attempt, 0);
        assert_eq!(h.sync.drain().await.attempted, 0);
        assert_eq!(h.upstream.calls(), 1);
    }

    /// Answers with `status` after taking the store offline mid-request.
    struct StoreOutageUpstream {
        memory: Arc<MemoryStore>,
        status: u16,
    }

    #[async_trait]
    impl Transport for StoreOutageUpstream {
        async fn send(&self, _request: &ApiRequest) -> Result<ApiResponse, NetworkError> {
            self.memory.set_available(false);
            let body = if self.status < 400 {
                br#"{"temperature": 3.0}"#.to_vec()
            } else {
                Vec::new()
            };
            Ok(ApiResponse::new(self.status, body))
        }
    }

    async fn outage_harness(status: u16) -> (Arc<ManualClock>, Arc<MemoryStore>, StoreHandle, SyncManager) {
        let clock = ManualClock::new(1_000_000);
        let memory = Arc::new(MemoryStore::new());
        let store = StoreHandle::from_arc(memory.clone());
        let upstream = Arc::new(StoreOutageUpstream {
            memory: memory.clone(),
            status,
        });
        let resilience = ResilienceManager::new(
            &ResilienceConfig {
                max_retries: 0,
                ..ResilienceConfig::default()
            },
            upstream,
            clock.clone(),
        );
        let cache = SmartCache::new(CacheConfig::default(), clock.clone());
        let sync = Harness::open_sync(&store, &resilience, &cache, &clock).await;
        (clock, memory, store, sync)
    }

    #[tokio::test]
    async fn test_store_outage_after_success_does_not_strand_task() {
        let (_clock, memory, store, sync) = outage_harness(200).await;
        let id = sync.enqueue(search("Lisbon")).await.unwrap();

        let report = sync.drain().await;

        assert_eq!(report.attempted, 1);
        assert_eq!(report.errors, 1);
        assert_eq!(sync.get_task_status(&id).unwrap().status, TaskStatus::Succeeded);
        assert_eq!(sync.pending_count(), 0);

        memory.set_available(true);
        let raw = store.get("sync_queue", &id).await.unwrap().unwrap();
        let persisted: SyncTask = serde_json::from_slice(&raw).unwrap();
        assert_eq!(persisted.status, TaskStatus::InFlight);

        // No active task left to deduplicate onto.
        let fresh = sync.enqueue(search("Lisbon")).await.unwrap();
        assert_ne!(fresh, id);
        sync.cancel(&fresh).await.unwrap();

        // The next pass writes the outcome back.
        sync.drain().await;
        let raw = store.get("sync_queue", &id).await.unwrap().unwrap();
        let persisted: SyncTask = serde_json::from_slice(&raw).unwrap();
        assert_eq!(persisted.status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_store_outage_after_failure_keeps_task_retryable() {
        let (clock, memory, _store, sync) = outage_harness(503).await;
        let id = sync.enqueue(weather(9.0, 9.0)).await.unwrap();

        let report = sync.drain().await;

        assert_eq!(report.errors, 1);
        let task = sync.get_task_status(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt, 1);

        memory.set_available(true);
        clock.advance(10 * 60 * 1000);
        assert_eq!(sync.drain().await.attempted, 1);
        assert_eq!(sync.get_task_status(&id).unwrap().attempt, 2);

        memory.set_available(true);
        let task = sync.retry(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt, 0);
    }

    #[tokio::test]
    async fn test_queue_survives_restart() {
        let h = Harness::new(&[200]).await;
        let id = h
            .sync
            .enqueue(search("Paris").with_priority(Priority::High))
            .await
            .unwrap();

        let reopened = h.reopen().await;
        let task = reopened.get_task_status(&id).unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, Priority::High);
        assert_eq!(
            task.payload,
            SyncPayload::SearchLocation {
                query: "Paris".into()
            }
        );

        reopened.drain().await;
        assert_eq!(reopened.get_task_status(&id).unwrap().status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn test_offline_drain_spends_no_attempts() {
        let h = Harness::new(&[200]).await;
        let id = h.sync.enqueue(weather(3.0, 4.0)).await.unwrap();
        h.resilience.set_online(false);

        let report = h.sync.drain().await;

        assert!(report.offline);
        assert_eq!(report.attempted, 0);
        let task = h.sync.get_task_status(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.attempt, 0);
        assert_eq!(h.upstream.calls(), 0);
    }

    #[tokio::test]
    async fn test_open_circuit_defers_without_attempt() {
        let h = Harness::new(&[500]).await;
        for i in 0..5 {
            h.sync.enqueue(weather(f64::from(i), 0.0)).await.unwrap();
        }
        h.sync.drain().await;
        let deferred = h.sync.enqueue(weather(50.0, 50.0)).await.unwrap();

        let report = h.sync.drain().await;

        assert_eq!(report.deferred, 1);
        let task = h.sync.get_task_status(&deferred).unwrap();
        assert_eq!(task.attempt, 0);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.next_attempt_at, h.clock.now_ms() + 30_000);
    }

    #[tokio::test]
    async fn test_cancel_acknowledge_and_not_found() {
        let h = Harness::new(&[200]).await;
        let id = h.sync.enqueue(search("Rome")).await.unwrap();

        let err = h.sync.acknowledge(&id).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFinished(_)));

        let cancelled = h.sync.cancel(&id).await.unwrap();
        assert_eq!(cancelled.status, TaskStatus::Failed);
        assert_eq!(h.sync.drain().await.attempted, 0);

        h.sync.acknowledge(&id).await.unwrap();
        assert!(matches!(h.sync.get_task_status(&id), Err(SyncError::NotFound(_))));
        assert!(h.store.get("sync_queue", &id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_recent_and_active_tasks() {
        let h = Harness::new(&[200]).await;
        let done = h.sync.enqueue(search("Oslo")).await.unwrap();
        h.sync.drain().await;

        h.clock.advance(60_000);
        let pending = h.sync.enqueue(search("Lima")).await.unwrap();

        h.clock.advance(24 * 60 * 60 * 1000 - 60_000);
        assert_eq!(h.sync.purge_expired().await.unwrap(), 1);
        assert!(h.sync.get_task_status(&done).is_err());
        assert!(h.sync.get_task_status(&pending).is_ok());
    }

    #[tokio::test]
    async fn test_background_loop_drains_on_reconnect() {
        let h = Harness::new(&[200]).await;
        h.resilience.set_online(false);
        let token = CancellationToken::new();
        let handle = h.sync.spawn(Duration::from_secs(3600), token.clone());

        let id = h.sync.enqueue(search("Tokyo")).await.unwrap();
        h.resilience.set_online(true);

        let mut succeeded = false;
        for _ in 0..200 {
            if h.sync.get_task_status(&id).unwrap().status == TaskStatus::Succeeded {
                succeeded = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(succeeded);

        token.cancel();
        handle.await.unwrap();
    }
}
