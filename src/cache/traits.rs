//! Core traits and types for the caching system.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::Arc;

use crate::error::SyncError;

/// Trait for values a `PollingCache` can hold and persist.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Entity set name for storage organization (e.g., "requests")
  fn entity_type() -> &'static str;

  /// Bumped whenever the serialized shape changes; older entries are dropped.
  fn schema_version() -> &'static str {
    "1"
  }
}

/// A cached value together with who it belongs to and when it was fetched.
///
/// This is also the persisted form, serialized as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub collection: T,
  pub fetched_at: DateTime<Utc>,
  pub owner_id: String,
  pub schema_version: String,
}

impl<T> CacheEntry<T> {
  /// Usable for a plain read: owned by the current user and younger than `ttl`.
  pub fn is_valid(&self, current_user: &str, ttl: Duration, now: DateTime<Utc>) -> bool {
    self.owner_id == current_user && now - self.fetched_at < ttl
  }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> CacheEntry<U> {
    CacheEntry {
      collection: f(self.collection),
      fetched_at: self.fetched_at,
      owner_id: self.owner_id,
      schema_version: self.schema_version,
    }
  }

  pub fn borrowed(&self) -> CacheEntry<&T> {
    CacheEntry {
      collection: &self.collection,
      fetched_at: self.fetched_at,
      owner_id: self.owner_id.clone(),
      schema_version: self.schema_version.clone(),
    }
  }
}

/// The outcome of one completed fetch round, shared by every caller that
/// waited on it.
#[derive(Debug)]
pub struct Snapshot<T> {
  pub data: Arc<T>,
  pub generation: u64,
  pub fetched_at: DateTime<Utc>,
}

impl<T> Clone for Snapshot<T> {
  fn clone(&self) -> Self {
    Self {
      data: Arc::clone(&self.data),
      generation: self.generation,
      fetched_at: self.fetched_at,
    }
  }
}

/// Result from a cache read, including data, metadata about the source, and
/// the error of this particular read if it had one.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The data, if any is servable
  pub data: Option<Arc<T>>,
  /// Generation the data belongs to
  pub generation: u64,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was fetched
  pub cached_at: Option<DateTime<Utc>>,
  /// Error raised by this read, if the fetch it waited on failed
  pub error: Option<SyncError>,
}

impl<T> CacheResult<T> {
  /// Fresh data from a fetch this read waited on.
  pub fn from_network(snapshot: Snapshot<T>) -> Self {
    Self {
      data: Some(snapshot.data),
      generation: snapshot.generation,
      source: CacheSource::Network,
      cached_at: Some(snapshot.fetched_at),
      error: None,
    }
  }

  /// Valid cached data, no network involved.
  pub fn from_cache(data: Arc<T>, generation: u64, cached_at: DateTime<Utc>) -> Self {
    Self {
      data: Some(data),
      generation,
      source: CacheSource::CacheFresh,
      cached_at: Some(cached_at),
      error: None,
    }
  }

  /// The fetch failed; serve the last known data alongside the error.
  pub fn offline(
    data: Arc<T>,
    generation: u64,
    cached_at: DateTime<Utc>,
    error: SyncError,
  ) -> Self {
    Self {
      data: Some(data),
      generation,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
      error: Some(error),
    }
  }

  /// The fetch failed and nothing is cached.
  pub fn failed(generation: u64, error: SyncError) -> Self {
    Self {
      data: None,
      generation,
      source: CacheSource::Empty,
      cached_at: None,
      error: Some(error),
    }
  }

  pub fn is_ok(&self) -> bool {
    self.error.is_none()
  }
}

/// Indicates where cached data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network failed, serving the last known data
  Offline,
  /// Network failed and nothing was cached
  Empty,
}
