//! Versioned response stores.
//!
//! This module provides:
//! - A `CacheStorage` backend trait with SQLite and in-memory implementations
//! - Request-identity keyed response snapshots
//! - `StoreManager`, which creates, pre-populates, refreshes and evicts whole
//!   store generations named by a `VersionTag`

mod manager;
mod storage;
mod traits;

pub use manager::{EvictionReport, PopulateReport, StoreManager, VersionTag};
pub use storage::{MemoryStorage, SqliteStorage};
pub use traits::{CacheStorage, StoredResponse};
