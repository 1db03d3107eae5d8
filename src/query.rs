//! The request board: what a screen binds to.
//!
//! `RequestBoard` ties together the request cache, the memoized filter view,
//! the background poller and the mutation coordinator.
//!
//! # Example
//!
//! ```ignore
//! let board = RequestBoard::connect(&config)?;
//! board.sign_in(Identity::new("E-1042", token)).await;
//! board.refresh(false).await;
//!
//! board.set_type_filter(Some(RequestKind::Leave));
//! for request in board.requests().iter() {
//!     println!("{} {}", request.id, request.approval);
//! }
//! ```

use color_eyre::Result;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use crate::cache::{CacheResult, NoopStorage, PersistentStore, Poller, SqliteStorage};
use crate::config::{ApiConfig, CacheConfig, Config};
use crate::error::SyncError;
use crate::filters::{FilterView, RequestFilters};
use crate::hr::{
  request_cache, ApprovalState, DomainAggregator, HrClient, Identity, MutationCoordinator,
  MutationTransport, Request, RequestCache, RequestKind, RequestSource,
};

#[derive(Default)]
struct ViewState {
  filters: RequestFilters,
  view: FilterView,
}

pub struct RequestBoard {
  cache: RequestCache,
  coordinator: MutationCoordinator,
  poller: Poller,
  view: Mutex<ViewState>,
}

impl RequestBoard {
  /// Assemble a board from its backends.
  pub fn from_parts(
    source: Arc<dyn RequestSource>,
    transport: Arc<dyn MutationTransport>,
    store: Arc<dyn PersistentStore>,
    api: &ApiConfig,
    cache_config: &CacheConfig,
  ) -> Self {
    let aggregator = Arc::new(DomainAggregator::new(source, api.endpoint_timeout()));
    let cache = request_cache(aggregator, store, cache_config.ttl());
    let coordinator = MutationCoordinator::new(transport, cache.clone(), api.mutation_timeout());

    Self {
      cache,
      coordinator,
      poller: Poller::new(cache_config.poll_interval()),
      view: Mutex::new(ViewState::default()),
    }
  }

  /// Board backed by the HTTP API and, if enabled, the on-disk store.
  pub fn connect(config: &Config) -> Result<Self> {
    let client = Arc::new(HrClient::new(&config.api)?);
    let store: Arc<dyn PersistentStore> = if config.cache.persist {
      Arc::new(SqliteStorage::open()?)
    } else {
      Arc::new(NoopStorage)
    };

    Ok(Self::from_parts(
      client.clone(),
      client,
      store,
      &config.api,
      &config.cache,
    ))
  }

  fn view_state(&self) -> MutexGuard<'_, ViewState> {
    self.view.lock().unwrap_or_else(PoisonError::into_inner)
  }

  // ==========================================================================
  // Identity
  // ==========================================================================

  pub async fn sign_in(&self, identity: Identity) {
    info!(user = %identity.user_id, "Signing in");
    self.cache.set_identity(Some(identity)).await;
  }

  /// Sign out. Stops polling and forgets the user's cached requests.
  pub async fn sign_out(&self) {
    self.poller.stop();
    self.cache.set_identity(None).await;
  }

  // ==========================================================================
  // Reads
  // ==========================================================================

  /// Current view: last known requests through the active filters.
  /// Empty while nothing has been fetched.
  pub fn requests(&self) -> Arc<Vec<Request>> {
    let (data, generation) = self.cache.last_known();
    let collection: &[Request] = data.as_deref().map(Vec::as_slice).unwrap_or_default();

    let mut state = self.view_state();
    let ViewState { filters, view } = &mut *state;
    view.view(collection, generation, filters)
  }

  /// Whether a fetch is running.
  pub fn loading(&self) -> bool {
    self.cache.is_fetching()
  }

  /// Error of the latest refresh, if it failed.
  pub fn error(&self) -> Option<SyncError> {
    self.cache.last_error()
  }

  pub fn generation(&self) -> u64 {
    self.cache.generation()
  }

  /// Read through the cache. `force` skips the TTL check.
  pub async fn refresh(&self, force: bool) -> CacheResult<Vec<Request>> {
    self.cache.get(force).await
  }

  /// Look a request up in the last known collection.
  pub fn find(&self, kind: RequestKind, id: &str) -> Option<Request> {
    let (data, _) = self.cache.last_known();
    data?
      .iter()
      .find(|r| r.identity() == (kind, id))
      .cloned()
  }

  pub fn filters(&self) -> RequestFilters {
    self.view_state().filters.clone()
  }

  /// Number of views computed so far (memo misses).
  pub fn view_computations(&self) -> u64 {
    self.view_state().view.computations()
  }

  // ==========================================================================
  // Filters
  // ==========================================================================

  pub fn set_status_filter(&self, status: Option<ApprovalState>) {
    self.view_state().filters.status = status;
  }

  pub fn set_type_filter(&self, kind: Option<RequestKind>) {
    self.view_state().filters.kind = kind;
  }

  pub fn set_search_text(&self, text: impl Into<String>) {
    self.view_state().filters.search = text.into();
  }

  // ==========================================================================
  // Mutations
  // ==========================================================================

  pub async fn edit_request(
    &self,
    request: &Request,
    patch: Map<String, Value>,
  ) -> Result<(), SyncError> {
    self.coordinator.edit(request, patch).await
  }

  pub async fn delete_request(&self, request_id: &str, kind: RequestKind) -> Result<(), SyncError> {
    self.coordinator.delete(request_id, kind).await
  }

  // ==========================================================================
  // Polling
  // ==========================================================================

  /// Start background revalidation, e.g. when the screen gains focus.
  pub fn start_polling(&self) {
    self.poller.start(self.cache.clone());
  }

  /// Stop background revalidation. A fetch already running still lands.
  pub fn stop_polling(&self) {
    self.poller.stop();
  }

  pub fn is_polling(&self) -> bool {
    self.poller.is_running()
  }
}

impl std::fmt::Debug for RequestBoard {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RequestBoard")
      .field("generation", &self.cache.generation())
      .field("loading", &self.cache.is_fetching())
      .field("polling", &self.poller.is_running())
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hr::aggregator::tests::{identity, seeded_source, StubSource};
  use crate::hr::mutation::{MutationCall, TransportResponse};
  use async_trait::async_trait;
  use serde_json::json;
  use std::time::Duration;

  struct AcceptAll;

  #[async_trait]
  impl MutationTransport for AcceptAll {
    async fn send(&self, _call: &MutationCall, _token: &str) -> Result<TransportResponse, SyncError> {
      Ok(TransportResponse {
        status: 204,
        body: String::new(),
      })
    }
  }

  fn board(source: Arc<StubSource>) -> RequestBoard {
    RequestBoard::from_parts(
      source,
      Arc::new(AcceptAll),
      Arc::new(SqliteStorage::open_in_memory().expect("store")),
      &ApiConfig::default(),
      &CacheConfig::default(),
    )
  }

  fn leave_scenario() -> StubSource {
    let source = StubSource::default();
    source.set(
      RequestKind::Leave,
      vec![
        json!({ "id": "1", "leaveType": "Annual", "requestDate": "2024-01-05", "chainResponse": { "step1": "O" } }),
        json!({ "id": "2", "leaveType": "Sick", "requestDate": "2024-03-01" }),
        json!({ "id": "3", "leaveType": "Annual", "requestDate": "2024-02-20", "chainResponse": { "step1": " o " } }),
      ],
    );
    source.set(
      RequestKind::Document,
      vec![json!({ "id": "4", "documentType": "Payslip", "requestDate": "2024-04-01", "staffResponse": "N" })],
    );
    source.set(
      RequestKind::Advance,
      vec![json!({ "id": "5", "amount": 150 })],
    );
    source
  }

  #[tokio::test]
  async fn test_leave_approved_view() {
    let board = board(Arc::new(leave_scenario()));
    board.sign_in(identity()).await;
    assert!(board.refresh(false).await.is_ok());

    board.set_type_filter(Some(RequestKind::Leave));
    board.set_status_filter(Some(ApprovalState::Approved));
    let ids: Vec<String> = board.requests().iter().map(|r| r.id.clone()).collect();
    assert_eq!(ids, vec!["3", "1"]);

    board.set_type_filter(None);
    board.set_status_filter(Some(ApprovalState::Rejected));
    let rejected = board.requests();
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].kind, RequestKind::Document);
  }

  #[tokio::test]
  async fn test_view_recomputed_only_on_new_generation() {
    let source = Arc::new(seeded_source());
    let board = board(source.clone());
    board.sign_in(identity()).await;
    board.refresh(false).await;

    let first = board.requests();
    let again = board.requests();
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(board.view_computations(), 1);

    // fresh entry: served from cache, generation unchanged
    board.refresh(false).await;
    board.requests();
    assert_eq!(board.view_computations(), 1);

    source.set(RequestKind::Advance, Vec::new());
    board.refresh(true).await;
    let after = board.requests();
    assert_eq!(board.view_computations(), 2);
    assert_eq!(after.len(), first.len() - 1);
  }

  #[tokio::test]
  async fn test_delete_refreshes_before_returning() {
    let source = Arc::new(seeded_source());
    let board = board(source.clone());
    board.sign_in(identity()).await;
    board.refresh(false).await;
    assert!(board.find(RequestKind::Document, "d1").is_some());

    source.set(RequestKind::Document, Vec::new());
    board
      .delete_request("d1", RequestKind::Document)
      .await
      .expect("delete");
    assert!(board.find(RequestKind::Document, "d1").is_none());
    assert!(!board.loading());
  }

  #[tokio::test]
  async fn test_switching_user_hides_previous_data() {
    let board = board(Arc::new(seeded_source()));
    board.sign_in(identity()).await;
    board.refresh(false).await;
    assert!(!board.requests().is_empty());

    board.sign_in(Identity::new("user-b", "token-b")).await;
    assert!(board.requests().is_empty());

    board.sign_out().await;
    assert!(board.requests().is_empty());
    assert!(matches!(
      board.refresh(false).await.error,
      Some(SyncError::Auth(_))
    ));
  }

  #[tokio::test]
  async fn test_total_failure_keeps_stale_view() {
    let source = Arc::new(seeded_source());
    let board = board(source.clone());
    board.sign_in(identity()).await;
    board.refresh(false).await;
    let before = board.requests().len();

    source.fail_all();
    let result = board.refresh(true).await;
    assert_eq!(result.error, Some(SyncError::AllSourcesFailed));
    assert_eq!(board.error(), Some(SyncError::AllSourcesFailed));
    assert_eq!(board.requests().len(), before);
  }

  #[tokio::test]
  async fn test_polling_toggles() {
    let board = board(Arc::new(seeded_source()));
    board.sign_in(identity()).await;
    board.start_polling();
    assert!(board.is_polling());
    board.stop_polling();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!board.is_polling());
  }
}
