//! Persistent key-value storage for Skycast.
//!
//! A small namespaced byte store with SQLite and in-memory engines. The
//! cache and the background sync queue each own one namespace.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{KeyValueStore, StoreHandle};
