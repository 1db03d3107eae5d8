//! Serde-deserializable types matching the HR backend's list responses.
//!
//! These types are separate from the domain `Request` so each kind's wire
//! shape can drift independently. Every field is optional and tolerant of
//! wrong scalar types: a missing or malformed field becomes an empty string
//! instead of failing the record.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;

use super::status;
use super::types::{Request, RequestKind};

// ============================================================================
// Lenient field decoding
// ============================================================================

fn scalar_to_string(value: Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s),
    Value::Number(n) => Some(n.to_string()),
    Value::Bool(b) => Some(b.to_string()),
    Value::Null | Value::Array(_) | Value::Object(_) => None,
  }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Value::deserialize(deserializer)?;
  Ok(scalar_to_string(v).unwrap_or_default())
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Value::deserialize(deserializer)?;
  Ok(scalar_to_string(v))
}

fn lenient_chain<'de, D>(deserializer: D) -> Result<ApiChainResponse, D::Error>
where
  D: Deserializer<'de>,
{
  let v = Value::deserialize(deserializer)?;
  Ok(serde_json::from_value(v).unwrap_or_default())
}

/// Parse the timestamp formats the backend is known to emit.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  let raw = raw.trim();
  if raw.is_empty() {
    return None;
  }

  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }

  for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f"] {
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, format) {
      return Some(dt.and_utc());
    }
  }

  for format in ["%Y-%m-%d", "%d/%m/%Y"] {
    if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
      return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
  }

  None
}

// ============================================================================
// Common nested types
// ============================================================================

/// Three-step approval chain. Only `step1` drives the top-level status.
#[derive(Debug, Deserialize, Default)]
pub struct ApiChainResponse {
  #[serde(default, deserialize_with = "lenient_opt_string")]
  pub step1: Option<String>,
  #[serde(default, deserialize_with = "lenient_opt_string")]
  pub step2: Option<String>,
  #[serde(default, deserialize_with = "lenient_opt_string")]
  pub step3: Option<String>,
}

impl ApiChainResponse {
  fn write_into(&self, details: &mut BTreeMap<String, Value>) {
    for (key, step) in [
      ("step1", &self.step1),
      ("step2", &self.step2),
      ("step3", &self.step3),
    ] {
      let value = step.clone().map(Value::String).unwrap_or(Value::Null);
      details.insert(key.to_string(), value);
    }
  }
}

/// Small builder so every adapter fills `details` the same way.
#[derive(Default)]
struct Details(BTreeMap<String, Value>);

impl Details {
  fn text(mut self, key: &str, value: String) -> Self {
    self.0.insert(key.to_string(), Value::String(value));
    self
  }

  fn code(mut self, key: &str, value: &Option<String>) -> Self {
    let v = value.clone().map(Value::String).unwrap_or(Value::Null);
    self.0.insert(key.to_string(), v);
    self
  }

  fn chain(mut self, chain: &ApiChainResponse) -> Self {
    chain.write_into(&mut self.0);
    self
  }

  fn build(self) -> BTreeMap<String, Value> {
    self.0
  }
}

// ============================================================================
// Per-kind records
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiAuthorization {
  #[serde(default, deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub reason: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub request_date: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub date: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub start_time: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub end_time: String,
  #[serde(default, deserialize_with = "lenient_chain")]
  pub chain_response: ApiChainResponse,
}

impl ApiAuthorization {
  pub fn into_request(self) -> Request {
    let kind = RequestKind::Authorization;
    Request {
      approval: status::resolve(kind, self.chain_response.step1.as_deref()),
      submitted_at: parse_timestamp(&self.request_date),
      details: Details::default()
        .text("date", self.date)
        .text("startTime", self.start_time)
        .text("endTime", self.end_time)
        .chain(&self.chain_response)
        .build(),
      id: self.id,
      kind,
      description: self.reason,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiLeave {
  #[serde(default, deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub leave_type: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub request_date: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub start_date: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub end_date: String,
  /// Half-day markers, e.g. "morning" / "afternoon"
  #[serde(default, deserialize_with = "lenient_string")]
  pub start_period: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub end_period: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub days: String,
  #[serde(default, deserialize_with = "lenient_chain")]
  pub chain_response: ApiChainResponse,
}

impl ApiLeave {
  pub fn into_request(self) -> Request {
    let kind = RequestKind::Leave;
    Request {
      approval: status::resolve(kind, self.chain_response.step1.as_deref()),
      submitted_at: parse_timestamp(&self.request_date),
      details: Details::default()
        .text("leaveType", self.leave_type.clone())
        .text("startDate", self.start_date)
        .text("endDate", self.end_date)
        .text("startPeriod", self.start_period)
        .text("endPeriod", self.end_period)
        .text("days", self.days)
        .chain(&self.chain_response)
        .build(),
      id: self.id,
      kind,
      description: self.leave_type,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiTraining {
  #[serde(default, deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub title: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub theme: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub organizer: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub request_date: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub start_date: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub end_date: String,
  #[serde(default, deserialize_with = "lenient_chain")]
  pub chain_response: ApiChainResponse,
}

impl ApiTraining {
  pub fn into_request(self) -> Request {
    let kind = RequestKind::Training;
    Request {
      approval: status::resolve(kind, self.chain_response.step1.as_deref()),
      submitted_at: parse_timestamp(&self.request_date),
      details: Details::default()
        .text("title", self.title.clone())
        .text("theme", self.theme)
        .text("organizer", self.organizer)
        .text("startDate", self.start_date)
        .text("endDate", self.end_date)
        .chain(&self.chain_response)
        .build(),
      id: self.id,
      kind,
      description: self.title,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiAdvance {
  #[serde(default, deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub amount: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub reason: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub request_date: String,
  #[serde(default, deserialize_with = "lenient_opt_string")]
  pub staff_response: Option<String>,
}

impl ApiAdvance {
  pub fn into_request(self) -> Request {
    let kind = RequestKind::Advance;
    Request {
      approval: status::resolve(kind, self.staff_response.as_deref()),
      submitted_at: parse_timestamp(&self.request_date),
      details: Details::default()
        .text("amount", self.amount)
        .text("reason", self.reason.clone())
        .code("staffResponse", &self.staff_response)
        .build(),
      id: self.id,
      kind,
      description: self.reason,
    }
  }
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ApiDocument {
  #[serde(default, deserialize_with = "lenient_string")]
  pub id: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub document_type: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub reason: String,
  #[serde(default, deserialize_with = "lenient_string")]
  pub request_date: String,
  /// Reference to an uploaded file, if any
  #[serde(default, deserialize_with = "lenient_string")]
  pub attachment: String,
  #[serde(default, deserialize_with = "lenient_opt_string")]
  pub staff_response: Option<String>,
}

impl ApiDocument {
  pub fn into_request(self) -> Request {
    let kind = RequestKind::Document;
    Request {
      approval: status::resolve(kind, self.staff_response.as_deref()),
      submitted_at: parse_timestamp(&self.request_date),
      details: Details::default()
        .text("documentType", self.document_type.clone())
        .text("reason", self.reason)
        .text("attachment", self.attachment)
        .code("staffResponse", &self.staff_response)
        .build(),
      id: self.id,
      kind,
      description: self.document_type,
    }
  }
}

// ============================================================================
// Dispatch
// ============================================================================

fn adapt(kind: RequestKind, record: Value) -> serde_json::Result<Request> {
  Ok(match kind {
    RequestKind::Authorization => serde_json::from_value::<ApiAuthorization>(record)?.into_request(),
    RequestKind::Leave => serde_json::from_value::<ApiLeave>(record)?.into_request(),
    RequestKind::Training => serde_json::from_value::<ApiTraining>(record)?.into_request(),
    RequestKind::Advance => serde_json::from_value::<ApiAdvance>(record)?.into_request(),
    RequestKind::Document => serde_json::from_value::<ApiDocument>(record)?.into_request(),
  })
}

/// Normalize one kind's raw records, preserving server order.
///
/// Only records that are not JSON objects at all are dropped.
pub fn normalize(kind: RequestKind, records: Vec<Value>) -> Vec<Request> {
  records
    .into_iter()
    .filter_map(|record| match adapt(kind, record) {
      Ok(request) => Some(request),
      Err(e) => {
        warn!(%kind, error = %e, "Dropping unreadable record");
        None
      }
    })
    .collect()
}
