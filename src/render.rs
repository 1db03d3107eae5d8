//! Plain-text rendering of request lists for the command line.

use std::fmt::Write;

use crate::error::SyncError;
use crate::hr::types::Request;

const ID_WIDTH: usize = 10;
const KIND_WIDTH: usize = 13;
const STATUS_WIDTH: usize = 9;
const DATE_WIDTH: usize = 10;
const DESCRIPTION_WIDTH: usize = 40;

/// Truncate a string to a maximum number of characters, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
  if s.chars().count() <= max_len {
    s.to_string()
  } else {
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{}...", kept)
  }
}

fn submitted(request: &Request) -> String {
  request
    .submitted_at
    .map(|at| at.format("%Y-%m-%d").to_string())
    .unwrap_or_else(|| "-".to_string())
}

pub fn header() -> String {
  format!(
    "{:<id$}  {:<kind$}  {:<status$}  {:<date$}  {}",
    "ID",
    "TYPE",
    "STATUS",
    "SUBMITTED",
    "DESCRIPTION",
    id = ID_WIDTH,
    kind = KIND_WIDTH,
    status = STATUS_WIDTH,
    date = DATE_WIDTH,
  )
}

pub fn row(request: &Request) -> String {
  format!(
    "{:<id$}  {:<kind$}  {:<status$}  {:<date$}  {}",
    truncate(&request.id, ID_WIDTH),
    request.kind.label(),
    request.approval.label(),
    submitted(request),
    truncate(&request.description, DESCRIPTION_WIDTH),
    id = ID_WIDTH,
    kind = KIND_WIDTH,
    status = STATUS_WIDTH,
    date = DATE_WIDTH,
  )
}

/// Render a table, with a footer that flags stale data.
pub fn table(requests: &[Request], error: Option<&SyncError>) -> String {
  let mut out = String::new();
  if requests.is_empty() {
    out.push_str("No requests.\n");
  } else {
    let _ = writeln!(out, "{}", header());
    for request in requests {
      let _ = writeln!(out, "{}", row(request));
    }
    let _ = writeln!(out, "\n{} request(s)", requests.len());
  }
  if let Some(e) = error {
    let _ = writeln!(out, "Showing last known data: {}", e.user_message());
  }
  out
}
