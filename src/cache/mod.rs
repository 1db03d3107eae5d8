//! Generic caching layer for request data.
//!
//! This module provides a domain-agnostic polling cache that:
//! - Wraps an arbitrary async producer and de-duplicates concurrent fetches
//! - Versions every change with a generation counter for derived views
//! - Expires entries by TTL and never serves another user's data
//! - Persists the last good value and serves it when the network fails

mod layer;
mod poller;
mod storage;
mod traits;

pub use layer::{Freshness, PollingCache};
pub use poller::Poller;
pub use storage::{storage_key, NoopStorage, PersistentStore, SqliteStorage};
pub use traits::{CacheEntry, CacheResult, CacheSource, Cacheable, Snapshot};
