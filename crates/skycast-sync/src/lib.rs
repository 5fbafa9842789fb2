//! Background sync for work that must eventually reach the network.
//!
//! Tasks are persisted in their own store namespace, drained in priority
//! order through the resilience manager, and their results written into
//! the shared cache.

pub mod error;
pub mod manager;
pub mod planner;
pub mod queue;
pub mod task;

pub use error::{SyncError, SyncResult};
pub use manager::{DrainReport, SyncManager};
pub use planner::{PlannedRequest, RequestPlanner};
pub use queue::TaskQueue;
pub use task::{normalize_query, NewTask, SyncPayload, SyncTask, TaskStatus};
