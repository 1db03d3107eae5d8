//! Merges the five per-kind request lists into one collection.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::SyncError;

use super::api_types;
use super::types::{Identity, Request, RequestKind};

/// A backend serving raw request records, one list per kind.
#[async_trait]
pub trait RequestSource: Send + Sync {
  async fn fetch_kind(&self, kind: RequestKind, identity: &Identity)
    -> Result<Vec<Value>, SyncError>;
}

/// Fetches every kind in parallel and normalizes the results.
///
/// A failing kind contributes nothing; only a total failure is an error.
pub struct DomainAggregator {
  source: Arc<dyn RequestSource>,
  endpoint_timeout: Duration,
  failed_fetches: AtomicU64,
}

impl DomainAggregator {
  pub fn new(source: Arc<dyn RequestSource>, endpoint_timeout: Duration) -> Self {
    Self {
      source,
      endpoint_timeout,
      failed_fetches: AtomicU64::new(0),
    }
  }

  /// Number of individual endpoint fetches that failed since creation.
  pub fn failure_count(&self) -> u64 {
    self.failed_fetches.load(Ordering::Relaxed)
  }

  async fn fetch_one(&self, kind: RequestKind, identity: &Identity) -> Result<Vec<Value>, SyncError> {
    match tokio::time::timeout(self.endpoint_timeout, self.source.fetch_kind(kind, identity)).await
    {
      Ok(result) => result,
      Err(_) => Err(SyncError::Timeout(self.endpoint_timeout.as_millis() as u64)),
    }
  }

  /// Fetch and merge all kinds for the given user.
  ///
  /// Output order is fixed: kinds in `RequestKind::ALL` order, server order
  /// within a kind.
  pub async fn aggregate(&self, identity: &Identity) -> Result<Vec<Request>, SyncError> {
    if identity.token.trim().is_empty() {
      return Err(SyncError::Auth("missing bearer token".to_string()));
    }

    let results = join_all(
      RequestKind::ALL
        .iter()
        .map(|kind| self.fetch_one(*kind, identity)),
    )
    .await;

    let mut requests = Vec::new();
    let mut failures = 0usize;

    for (kind, result) in RequestKind::ALL.iter().zip(results) {
      match result {
        Ok(records) => {
          let normalized = api_types::normalize(*kind, records);
          debug!(%kind, count = normalized.len(), "Fetched requests");
          requests.extend(normalized);
        }
        Err(e) => {
          failures += 1;
          self.failed_fetches.fetch_add(1, Ordering::Relaxed);
          warn!(%kind, error = %e, "Request source failed, treating as empty");
        }
      }
    }

    if failures == RequestKind::ALL.len() {
      return Err(SyncError::AllSourcesFailed);
    }

    Ok(requests)
  }
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use serde_json::json;
  use std::collections::{HashMap, HashSet};
  use std::sync::Mutex;

  /// Scriptable in-memory backend with per-kind call counters.
  #[derive(Default)]
  pub(crate) struct StubSource {
    pub records: Mutex<HashMap<RequestKind, Vec<Value>>>,
    pub failing: Mutex<HashSet<RequestKind>>,
    pub calls: Mutex<HashMap<RequestKind, usize>>,
    pub delay: Option<Duration>,
  }

  impl StubSource {
    pub(crate) fn with_delay(delay: Duration) -> Self {
      Self {
        delay: Some(delay),
        ..Self::default()
      }
    }

    pub(crate) fn set(&self, kind: RequestKind, records: Vec<Value>) {
      self.records.lock().expect("lock").insert(kind, records);
    }

    pub(crate) fn fail(&self, kind: RequestKind) {
      self.failing.lock().expect("lock").insert(kind);
    }

    pub(crate) fn fail_all(&self) {
      for kind in RequestKind::ALL {
        self.fail(kind);
      }
    }

    pub(crate) fn heal(&self) {
      self.failing.lock().expect("lock").clear();
    }

    pub(crate) fn calls(&self, kind: RequestKind) -> usize {
      *self.calls.lock().expect("lock").get(&kind).unwrap_or(&0)
    }

    pub(crate) fn total_calls(&self) -> usize {
      self.calls.lock().expect("lock").values().sum()
    }
  }

  #[async_trait]
  impl RequestSource for StubSource {
    async fn fetch_kind(
      &self,
      kind: RequestKind,
      _identity: &Identity,
    ) -> Result<Vec<Value>, SyncError> {
      *self.calls.lock().expect("lock").entry(kind).or_insert(0) += 1;
      if let Some(delay) = self.delay {
        tokio::time::sleep(delay).await;
      }
      if self.failing.lock().expect("lock").contains(&kind) {
        return Err(SyncError::Network("connection refused".to_string()));
      }
      Ok(
        self
          .records
          .lock()
          .expect("lock")
          .get(&kind)
          .cloned()
          .unwrap_or_default(),
      )
    }
  }

  pub(crate) fn seeded_source() -> StubSource {
    let source = StubSource::default();
    source.set(
      RequestKind::Authorization,
      vec![json!({ "id": "a1", "reason": "Dentist", "chainResponse": { "step1": "O" } })],
    );
    source.set(
      RequestKind::Leave,
      vec![
        json!({ "id": "1", "leaveType": "Annual", "requestDate": "2024-01-10" }),
        json!({ "id": "2", "leaveType": "Sick", "requestDate": "2024-02-10" }),
      ],
    );
    source.set(
      RequestKind::Training,
      vec![json!({ "id": "t1", "title": "Rust basics" })],
    );
    source.set(
      RequestKind::Advance,
      vec![json!({ "id": "1", "amount": 300, "staffResponse": "N" })],
    );
    source.set(
      RequestKind::Document,
      vec![json!({ "id": "d1", "documentType": "Payslip", "staffResponse": "T" })],
    );
    source
  }

  pub(crate) fn identity() -> Identity {
    Identity::new("user-a", "token-a")
  }

  fn aggregator(source: Arc<StubSource>) -> DomainAggregator {
    DomainAggregator::new(source, Duration::from_secs(5))
  }

  #[tokio::test]
  async fn test_kind_order_is_fixed() {
    let source = Arc::new(seeded_source());
    let requests = aggregator(source)
      .aggregate(&identity())
      .await
      .expect("aggregate");

    let kinds: Vec<RequestKind> = requests.iter().map(|r| r.kind).collect();
    assert_eq!(
      kinds,
      vec![
        RequestKind::Authorization,
        RequestKind::Leave,
        RequestKind::Leave,
        RequestKind::Training,
        RequestKind::Advance,
        RequestKind::Document,
      ]
    );
    // server order within a kind
    assert_eq!(requests[1].id, "1");
    assert_eq!(requests[2].id, "2");
  }

  #[tokio::test]
  async fn test_identical_inputs_identical_output() {
    let source = Arc::new(seeded_source());
    let agg = aggregator(source);
    let first = agg.aggregate(&identity()).await.expect("first");
    let second = agg.aggregate(&identity()).await.expect("second");
    assert_eq!(first, second);
  }

  #[tokio::test]
  async fn test_partial_failure_is_absorbed() {
    let source = Arc::new(seeded_source());
    source.fail(RequestKind::Leave);
    source.fail(RequestKind::Document);
    let agg = aggregator(source);

    let requests = agg.aggregate(&identity()).await.expect("partial success");
    let kinds: HashSet<RequestKind> = requests.iter().map(|r| r.kind).collect();
    assert_eq!(
      kinds,
      HashSet::from([
        RequestKind::Authorization,
        RequestKind::Training,
        RequestKind::Advance
      ])
    );
    assert_eq!(agg.failure_count(), 2);
  }

  #[tokio::test]
  async fn test_total_failure_is_raised() {
    let source = Arc::new(seeded_source());
    source.fail_all();
    let result = aggregator(source).aggregate(&identity()).await;
    assert_eq!(result, Err(SyncError::AllSourcesFailed));
  }

  #[tokio::test]
  async fn test_slow_endpoint_times_out_alone() {
    struct SlowLeave;

    #[async_trait]
    impl RequestSource for SlowLeave {
      async fn fetch_kind(
        &self,
        kind: RequestKind,
        _identity: &Identity,
      ) -> Result<Vec<Value>, SyncError> {
        if kind == RequestKind::Leave {
          tokio::time::sleep(Duration::from_secs(10)).await;
        }
        Ok(vec![json!({ "id": format!("{}-1", kind.resource()) })])
      }
    }

    let agg = DomainAggregator::new(Arc::new(SlowLeave), Duration::from_millis(50));
    let requests = agg.aggregate(&identity()).await.expect("aggregate");
    assert_eq!(requests.len(), 4);
    assert!(requests.iter().all(|r| r.kind != RequestKind::Leave));
  }

  #[tokio::test]
  async fn test_missing_token_skips_network() {
    let source = Arc::new(seeded_source());
    let agg = aggregator(source.clone());
    let result = agg.aggregate(&Identity::new("user-a", "")).await;
    assert!(matches!(result, Err(SyncError::Auth(_))));
    assert_eq!(source.total_calls(), 0);
  }
}
