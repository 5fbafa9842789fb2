//! Skycast offline layer.
//!
//! [`AppContext`] owns the persistent store, the smart cache, the network
//! resilience manager and the background sync queue, and hands out cheap
//! clones to whatever serves weather and location lookups.

pub mod context;
pub mod error;

pub use context::{AppContext, LookupOutcome, OfflineStatus};
pub use error::AppError;
