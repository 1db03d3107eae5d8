//! Caching wiring for HR request collections.

use chrono::Duration;
use std::sync::Arc;

use crate::cache::{Cacheable, PersistentStore, PollingCache};

use super::aggregator::DomainAggregator;
use super::types::Request;

impl Cacheable for Vec<Request> {
  fn entity_type() -> &'static str {
    "requests"
  }

  fn schema_version() -> &'static str {
    "1"
  }
}

/// The request cache: a polling cache whose producer is the aggregator.
pub type RequestCache = PollingCache<Vec<Request>>;

pub fn request_cache(
  aggregator: Arc<DomainAggregator>,
  store: Arc<dyn PersistentStore>,
  ttl: Duration,
) -> RequestCache {
  PollingCache::new(store, ttl, move |identity| {
    let aggregator = Arc::clone(&aggregator);
    async move { aggregator.aggregate(&identity).await }
  })
}
