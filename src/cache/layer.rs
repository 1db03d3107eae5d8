//! Polling cache: owns one cached value per signed-in user, de-duplicates
//! concurrent fetches and versions every change with a generation counter.

use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::hr::types::Identity;

use super::storage::{storage_key, PersistentStore};
use super::traits::{CacheEntry, CacheResult, Cacheable, Snapshot};

/// A factory function that creates futures producing the cached value
type ProducerFn<T> =
  Box<dyn Fn(Identity) -> BoxFuture<'static, Result<T, SyncError>> + Send + Sync>;

type RoundOutcome<T> = Result<Snapshot<T>, SyncError>;
type SharedRound<T> = Shared<BoxFuture<'static, RoundOutcome<T>>>;
type SharedHydration = Shared<BoxFuture<'static, ()>>;

/// How a read treats the current entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Serve a valid entry without network; fetch only if absent or expired
  Cached,
  /// Start or join a fetch round regardless of TTL (poll ticks)
  Revalidate,
  /// Observe a round that started at or after this request
  Force,
}

struct InFlight<T> {
  round: u64,
  future: SharedRound<T>,
}

struct State<T> {
  identity: Option<Identity>,
  /// Bumped on every identity change; rounds from an older epoch are dropped
  epoch: u64,
  entry: Option<CacheEntry<Arc<T>>>,
  /// Entry kept for stale reads but never served as fresh
  expired: bool,
  /// Store read for the current identity; every reader awaits it
  hydration: Option<SharedHydration>,
  generation: u64,
  rounds_started: u64,
  in_flight: Option<InFlight<T>>,
  last_error: Option<SyncError>,
}

impl<T> State<T> {
  fn owner_entry(&self) -> Option<&CacheEntry<Arc<T>>> {
    let user = &self.identity.as_ref()?.user_id;
    self.entry.as_ref().filter(|e| &e.owner_id == user)
  }

  fn valid_entry(&self, ttl: Duration, now: DateTime<Utc>) -> Option<&CacheEntry<Arc<T>>> {
    if self.expired {
      return None;
    }
    let user = &self.identity.as_ref()?.user_id;
    self.entry.as_ref().filter(|e| e.is_valid(user, ttl, now))
  }

  fn clear_round(&mut self, round: u64) {
    if self.in_flight.as_ref().map(|f| f.round) == Some(round) {
      self.in_flight = None;
    }
  }
}

struct CacheInner<T> {
  state: Mutex<State<T>>,
  producer: ProducerFn<T>,
  store: Arc<dyn PersistentStore>,
  /// Held across every store write so a late persist can never land after
  /// the owner's entry was removed
  store_writes: tokio::sync::Mutex<()>,
  ttl: Duration,
}

/// Generic polling cache around an asynchronous producer.
///
/// Cloning is cheap and every clone shares the same state.
pub struct PollingCache<T: Cacheable> {
  inner: Arc<CacheInner<T>>,
}

impl<T: Cacheable> Clone for PollingCache<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Cacheable> CacheInner<T> {
  fn state(&self) -> MutexGuard<'_, State<T>> {
    // State is only mutated in short non-panicking sections
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Apply a finished round. Runs inside the spawned fetch task, so it
  /// happens exactly once per round whether or not anyone is still waiting.
  async fn complete_round(
    &self,
    round: u64,
    epoch: u64,
    identity: Identity,
    result: Result<T, SyncError>,
  ) -> RoundOutcome<T> {
    let data = match result {
      Ok(data) => Arc::new(data),
      Err(e) => {
        let mut state = self.state();
        if state.epoch == epoch {
          state.last_error = Some(e.clone());
        }
        state.clear_round(round);
        warn!(round, error = %e, "Cache refresh failed");
        return Err(e);
      }
    };

    let entry = CacheEntry {
      collection: data,
      fetched_at: Utc::now(),
      owner_id: identity.user_id.clone(),
      schema_version: T::schema_version().to_string(),
    };

    let write_guard = self.store_writes.lock().await;
    let snapshot = {
      let mut state = self.state();
      if state.epoch != epoch {
        state.clear_round(round);
        debug!(round, "Discarding fetch for a signed-out user");
        return Err(SyncError::Auth("user changed during refresh".to_string()));
      }
      state.entry = Some(entry.clone());
      state.expired = false;
      state.generation += 1;
      state.last_error = None;
      Snapshot {
        data: Arc::clone(&entry.collection),
        generation: state.generation,
        fetched_at: entry.fetched_at,
      }
    };

    // Persist before releasing the round so writes to this key never overlap
    let key = storage_key(T::entity_type(), &identity.user_id);
    match serde_json::to_vec(&entry.borrowed().map(|data| &**data)) {
      Ok(bytes) => {
        if let Err(e) = self.store.set(&key, &bytes).await {
          warn!(error = %e, "Failed to persist cache entry");
        }
      }
      Err(e) => warn!(error = %e, "Failed to serialize cache entry"),
    }
    drop(write_guard);

    self.state().clear_round(round);
    info!(round, generation = snapshot.generation, "Cache refreshed");
    Ok(snapshot)
  }

  async fn remove_persisted(&self, key: &str) {
    let _write = self.store_writes.lock().await;
    if let Err(e) = self.store.remove(key).await {
      warn!(error = %e, "Failed to remove persisted cache entry");
    }
  }

  /// Load `owner`'s persisted entry into memory unless the identity moved on.
  async fn load_persisted(&self, owner: String, epoch: u64) {
    let key = storage_key(T::entity_type(), &owner);
    let bytes = match self.store.get(&key).await {
      Ok(Some(bytes)) => bytes,
      Ok(None) => return,
      Err(e) => {
        warn!(error = %e, "Failed to read persisted cache entry");
        return;
      }
    };

    let entry = match serde_json::from_slice::<CacheEntry<T>>(&bytes) {
      Ok(entry) if entry.owner_id == owner && entry.schema_version == T::schema_version() => entry,
      Ok(_) => {
        debug!("Dropping persisted entry with foreign owner or old schema");
        self.remove_persisted(&key).await;
        return;
      }
      Err(e) => {
        warn!(error = %e, "Dropping unreadable persisted entry");
        self.remove_persisted(&key).await;
        return;
      }
    };

    let mut state = self.state();
    if state.epoch == epoch && state.entry.is_none() {
      debug!(fetched_at = %entry.fetched_at, "Hydrated cache from store");
      state.entry = Some(entry.map(Arc::new));
      state.generation += 1;
    }
  }
}

impl<T: Cacheable> PollingCache<T> {
  /// Create a cache around `producer`.
  ///
  /// The producer is called with the current identity each time a fetch
  /// round starts.
  pub fn new<F, Fut>(store: Arc<dyn PersistentStore>, ttl: Duration, producer: F) -> Self
  where
    F: Fn(Identity) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, SyncError>> + Send + 'static,
  {
    Self {
      inner: Arc::new(CacheInner {
        state: Mutex::new(State {
          identity: None,
          epoch: 0,
          entry: None,
          expired: false,
          hydration: None,
          generation: 0,
          rounds_started: 0,
          in_flight: None,
          last_error: None,
        }),
        producer: Box::new(move |identity| producer(identity).boxed()),
        store,
        store_writes: tokio::sync::Mutex::new(()),
        ttl,
      }),
    }
  }

  /// Current generation. Increases on every data change.
  pub fn generation(&self) -> u64 {
    self.inner.state().generation
  }

  pub fn identity(&self) -> Option<Identity> {
    self.inner.state().identity.clone()
  }

  /// Whether a fetch round is running.
  pub fn is_fetching(&self) -> bool {
    self.inner.state().in_flight.is_some()
  }

  /// Error of the most recent round, cleared by the next success.
  pub fn last_error(&self) -> Option<SyncError> {
    self.inner.state().last_error.clone()
  }

  /// Last known data for the current user regardless of age, with its
  /// generation. Never returns another user's data.
  pub fn last_known(&self) -> (Option<Arc<T>>, u64) {
    let state = self.inner.state();
    let data = state.owner_entry().map(|e| Arc::clone(&e.collection));
    (data, state.generation)
  }

  /// Switch the signed-in user.
  ///
  /// A token refresh for the same user keeps the cache. A different user
  /// (or sign-out) discards the entry from memory and from the store.
  pub async fn set_identity(&self, identity: Option<Identity>) {
    let discarded_owner = {
      let mut state = self.inner.state();
      let same_user = match (&state.identity, &identity) {
        (Some(current), Some(next)) => current.user_id == next.user_id,
        (None, None) => true,
        _ => false,
      };
      if same_user {
        state.identity = identity;
        return;
      }

      let previous = state.identity.take().map(|i| i.user_id);
      state.identity = identity;
      state.epoch += 1;
      state.entry = None;
      state.expired = false;
      state.hydration = None;
      state.in_flight = None;
      state.last_error = None;
      state.generation += 1;
      previous
    };

    if let Some(owner) = discarded_owner {
      info!("Discarding cached requests of previous user");
      // waits for a persist already past its epoch check
      let key = storage_key(T::entity_type(), &owner);
      self.inner.remove_persisted(&key).await;
    }
  }

  /// Mark the entry expired so the next plain read fetches. The data stays
  /// available for stale reads.
  pub fn invalidate(&self) {
    let mut state = self.inner.state();
    state.expired = true;
    state.generation += 1;
  }

  /// `get(force_refresh)`: the read contract of the cache.
  pub async fn get(&self, force_refresh: bool) -> CacheResult<T> {
    let freshness = if force_refresh {
      Freshness::Force
    } else {
      Freshness::Cached
    };
    self.fetch(freshness).await
  }

  /// Start or join a round without waiting for TTL expiry.
  pub async fn revalidate(&self) -> CacheResult<T> {
    self.fetch(Freshness::Revalidate).await
  }

  /// Read according to `freshness`.
  ///
  /// Concurrent callers share one in-flight round and see the same
  /// generation and the same `Arc`. A forced read that finds a round
  /// started before it waits for that round, then starts its own.
  pub async fn fetch(&self, freshness: Freshness) -> CacheResult<T> {
    self.hydrate().await;

    let floor = self.inner.state().rounds_started;

    loop {
      let (round, future) = {
        let mut state = self.inner.state();

        let identity = match state.identity.clone() {
          Some(identity) => identity,
          None => {
            return CacheResult::failed(
              state.generation,
              SyncError::Auth("not signed in".to_string()),
            )
          }
        };

        if freshness == Freshness::Cached {
          if let Some(entry) = state.valid_entry(self.inner.ttl, Utc::now()) {
            return CacheResult::from_cache(
              Arc::clone(&entry.collection),
              state.generation,
              entry.fetched_at,
            );
          }
        }

        let joined = state
          .in_flight
          .as_ref()
          .map(|in_flight| (in_flight.round, in_flight.future.clone()));
        match joined {
          Some(joined) => joined,
          None => self.start_round(&mut state, identity),
        }
      };

      let outcome = future.await;

      if freshness == Freshness::Force && round <= floor {
        debug!(round, floor, "Joined an older round, waiting for a fresh one");
        continue;
      }

      return match outcome {
        Ok(snapshot) => CacheResult::from_network(snapshot),
        Err(e) => {
          let state = self.inner.state();
          match state.owner_entry() {
            Some(entry) => CacheResult::offline(
              Arc::clone(&entry.collection),
              state.generation,
              entry.fetched_at,
              e,
            ),
            None => CacheResult::failed(state.generation, e),
          }
        }
      };
    }
  }

  fn start_round(&self, state: &mut State<T>, identity: Identity) -> (u64, SharedRound<T>) {
    state.rounds_started += 1;
    let round = state.rounds_started;
    let epoch = state.epoch;
    debug!(round, "Starting fetch round");

    let produce = (self.inner.producer)(identity.clone());
    let inner = Arc::clone(&self.inner);

    // Own task: the round completes even if every waiter goes away
    let handle = tokio::spawn(async move {
      let result = produce.await;
      inner.complete_round(round, epoch, identity, result).await
    });

    let future = async move {
      handle
        .await
        .unwrap_or_else(|e| Err(SyncError::Network(format!("fetch task failed: {}", e))))
    }
    .boxed()
    .shared();

    state.in_flight = Some(InFlight {
      round,
      future: future.clone(),
    });
    (round, future)
  }

  /// Load the persisted entry for the current user, once per identity.
  /// Concurrent first readers share the same store read.
  async fn hydrate(&self) {
    let pending = {
      let mut state = self.inner.state();
      let owner = match &state.identity {
        Some(identity) => identity.user_id.clone(),
        None => return,
      };
      match &state.hydration {
        Some(pending) => pending.clone(),
        None => {
          let inner = Arc::clone(&self.inner);
          let epoch = state.epoch;
          let pending = async move { inner.load_persisted(owner, epoch).await }
            .boxed()
            .shared();
          state.hydration = Some(pending.clone());
          pending
        }
      }
    };
    pending.await;
  }
}
