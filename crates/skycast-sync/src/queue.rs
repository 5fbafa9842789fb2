//! Persisted task queue.
//!
//! Tasks live in memory for scheduling and are written to their own store
//! namespace (one JSON record per task id) on every mutation, so pending work
//! survives a restart. Outcome transitions that cannot be written are kept in
//! memory and written back by [`TaskQueue::flush`].

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use skycast_core::Millis;
use skycast_store::StoreHandle;

use crate::error::{SyncError, SyncResult};
use crate::task::{SyncTask, TaskStatus};

#[derive(Debug)]
pub struct TaskQueue {
    store: StoreHandle,
    namespace: String,
    tasks: Mutex<HashMap<String, SyncTask>>,
    unsaved: Mutex<HashSet<String>>,
    next_seq: AtomicU64,
}

impl TaskQueue {
    /// Load every persisted task. Tasks left InFlight by an interrupted
    /// session are reset to Pending and written back.
    pub async fn open(store: StoreHandle, namespace: impl Into<String>, now: Millis) -> SyncResult<Self> {
        let namespace = namespace.into();
        let records = store.entries(&namespace).await?;

        let mut tasks = HashMap::with_capacity(records.len());
        let mut recovered = Vec::new();
        for (key, bytes) in records {
            let mut task: SyncTask = match serde_json::from_slice(&bytes) {
                Ok(task) => task,
                Err(e) => {
                    tracing::warn!(key = %key, "Dropping unreadable sync task: {}", e);
                    store.delete(&namespace, &key).await?;
                    continue;
                }
            };
            if task.status == TaskStatus::InFlight {
                task.status = TaskStatus::Pending;
                task.updated_at = now;
                recovered.push(task.clone());
            }
            tasks.insert(task.id.clone(), task);
        }

        let next_seq = tasks.values().map(|t| t.seq + 1).max().unwrap_or(0);
        let queue = Self {
            store,
            namespace,
            tasks: Mutex::new(tasks),
            unsaved: Mutex::new(HashSet::new()),
            next_seq: AtomicU64::new(next_seq),
        };

        for task in &recovered {
            queue.persist(task).await?;
        }
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "Recovered interrupted sync tasks");
        }

        Ok(queue)
    }

    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::SeqCst)
    }

    /// Persist then add a new task.
    pub async fn insert(&self, task: SyncTask) -> SyncResult<()> {
        self.persist(&task).await?;
        self.tasks.lock().insert(task.id.clone(), task);
        Ok(())
    }

    /// Apply `mutate` to a copy of the task, persist it, then commit it.
    pub async fn update<F>(&self, id: &str, mutate: F) -> SyncResult<SyncTask>
    where
        F: FnOnce(&mut SyncTask),
    {
        let mut task = self.get(id).ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        mutate(&mut task);
        self.persist(&task).await?;
        self.tasks.lock().insert(task.id.clone(), task.clone());
        self.unsaved.lock().remove(id);
        Ok(task)
    }

    /// Apply `mutate` and commit it in memory even if it cannot be persisted.
    ///
    /// On a store error the task is remembered for [`TaskQueue::flush`] and
    /// the error is returned; the in-memory transition stands.
    pub async fn commit<F>(&self, id: &str, mutate: F) -> SyncResult<SyncTask>
    where
        F: FnOnce(&mut SyncTask),
    {
        let mut task = self.get(id).ok_or_else(|| SyncError::NotFound(id.to_string()))?;
        mutate(&mut task);
        self.tasks.lock().insert(task.id.clone(), task.clone());

        match self.persist(&task).await {
            Ok(()) => {
                self.unsaved.lock().remove(id);
                Ok(task)
            }
            Err(e) => {
                tracing::warn!(task = %id, status = ?task.status, "Sync task change kept in memory only: {}", e);
                self.unsaved.lock().insert(task.id);
                Err(e)
            }
        }
    }

    /// Write back every task whose last change could not be saved.
    /// Returns how many were written.
    pub async fn flush(&self) -> SyncResult<usize> {
        let ids: Vec<String> = self.unsaved.lock().iter().cloned().collect();
        let mut written = 0;
        for id in ids {
            if let Some(task) = self.get(&id) {
                self.persist(&task).await?;
                written += 1;
            }
            self.unsaved.lock().remove(&id);
        }
        if written > 0 {
            tracing::info!(count = written, "Saved sync task changes");
        }
        Ok(written)
    }

    /// Number of tasks whose in-memory state is ahead of the store.
    pub fn unsaved_count(&self) -> usize {
        self.unsaved.lock().len()
    }

    pub async fn remove(&self, id: &str) -> SyncResult<bool> {
        let removed = self.store.delete(&self.namespace, id).await?;
        let present = self.tasks.lock().remove(id).is_some();
        self.unsaved.lock().remove(id);
        Ok(removed || present)
    }

    pub fn get(&self, id: &str) -> Option<SyncTask> {
        self.tasks.lock().get(id).cloned()
    }

    /// Id of a Pending or InFlight task with the same payload key.
    pub fn find_active(&self, key: &str) -> Option<String> {
        self.tasks
            .lock()
            .values()
            .filter(|t| t.status.is_active() && t.payload.key() == key)
            .min_by_key(|t| t.seq)
            .map(|t| t.id.clone())
    }

    /// Tasks ready to run, in drain order.
    pub fn due(&self, now: Millis) -> Vec<SyncTask> {
        let mut due: Vec<SyncTask> = self
            .tasks
            .lock()
            .values()
            .filter(|t| t.is_due(now))
            .cloned()
            .collect();
        due.sort_by(SyncTask::drain_order);
        due
    }

    /// All tasks in drain order.
    pub fn list(&self) -> Vec<SyncTask> {
        let mut all: Vec<SyncTask> = self.tasks.lock().values().cloned().collect();
        all.sort_by(SyncTask::drain_order);
        all
    }

    pub fn count(&self, status: TaskStatus) -> usize {
        self.tasks
            .lock()
            .values()
            .filter(|t| t.status == status)
            .count()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    async fn persist(&self, task: &SyncTask) -> SyncResult<()> {
        let bytes = serde_json::to_vec(task)?;
        self.store.set(&self.namespace, &task.id, bytes).await?;
        Ok(())
    }
}
