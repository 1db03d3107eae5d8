//! Filtered, searched and sorted views over the cached request collection.
//!
//! Views are memoized per generation of the underlying cache: the whole
//! memo is dropped as soon as a different generation is asked for, so a
//! view computed from old data is never returned.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::hr::types::{ApprovalState, Request, RequestKind};

/// Filter settings chosen by the user. `None` means "All".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestFilters {
  pub status: Option<ApprovalState>,
  pub kind: Option<RequestKind>,
  pub search: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ViewKey {
  status: Option<ApprovalState>,
  kind: Option<RequestKind>,
  search: String,
}

/// Details fields the free-text search looks at, per kind.
fn search_fields(kind: RequestKind) -> &'static [&'static str] {
  match kind {
    RequestKind::Authorization => &["date", "startTime", "endTime"],
    RequestKind::Leave => &["leaveType", "startDate", "endDate"],
    RequestKind::Training => &["title", "theme", "organizer"],
    RequestKind::Advance => &["amount", "reason"],
    RequestKind::Document => &["documentType", "reason"],
  }
}

/// Trim, lowercase and collapse inner whitespace.
pub fn normalize_search(text: &str) -> String {
  text
    .split_whitespace()
    .collect::<Vec<_>>()
    .join(" ")
    .to_lowercase()
}

fn matches_search(request: &Request, needle: &str) -> bool {
  if needle.is_empty() {
    return true;
  }
  if request.description.to_lowercase().contains(needle)
    || request.kind.label().to_lowercase().contains(needle)
  {
    return true;
  }
  search_fields(request.kind).iter().any(|field| {
    request
      .detail_str(field)
      .is_some_and(|value| value.to_lowercase().contains(needle))
  })
}

/// Newest first, undated last. Stable, so ties keep aggregation order.
fn by_submission_desc(a: &Request, b: &Request) -> Ordering {
  match (a.submitted_at, b.submitted_at) {
    (Some(x), Some(y)) => y.cmp(&x),
    (Some(_), None) => Ordering::Less,
    (None, Some(_)) => Ordering::Greater,
    (None, None) => Ordering::Equal,
  }
}

/// Run the filter pipeline without memoization.
pub fn apply(collection: &[Request], filters: &RequestFilters) -> Vec<Request> {
  let needle = normalize_search(&filters.search);
  let mut result: Vec<Request> = collection
    .iter()
    .filter(|r| filters.kind.map_or(true, |kind| r.kind == kind))
    .filter(|r| filters.status.map_or(true, |status| r.approval == status))
    .filter(|r| matches_search(r, &needle))
    .cloned()
    .collect();
  result.sort_by(by_submission_desc);
  result
}

/// Memoizing view over one cache.
#[derive(Debug, Default)]
pub struct FilterView {
  generation: Option<u64>,
  memo: HashMap<ViewKey, Arc<Vec<Request>>>,
  computations: u64,
}

impl FilterView {
  pub fn new() -> Self {
    Self::default()
  }

  /// Filtered view of `collection`, which must be the data of `generation`.
  pub fn view(
    &mut self,
    collection: &[Request],
    generation: u64,
    filters: &RequestFilters,
  ) -> Arc<Vec<Request>> {
    if self.generation != Some(generation) {
      self.memo.clear();
      self.generation = Some(generation);
    }

    let key = ViewKey {
      status: filters.status,
      kind: filters.kind,
      search: normalize_search(&filters.search),
    };

    if let Some(hit) = self.memo.get(&key) {
      return Arc::clone(hit);
    }

    self.computations += 1;
    let computed = Arc::new(apply(collection, filters));
    self.memo.insert(key, Arc::clone(&computed));
    computed
  }

  /// How many views were actually computed (memo misses).
  pub fn computations(&self) -> u64 {
    self.computations
  }

  pub fn memoized(&self) -> usize {
    self.memo.len()
  }
}
