//! Domain types shared by the cache, the filter views and mutations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SyncError;

/// The five HR request categories.
///
/// Declaration order is the aggregation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
  Authorization,
  Leave,
  Training,
  Advance,
  Document,
}

impl RequestKind {
  pub const ALL: [RequestKind; 5] = [
    RequestKind::Authorization,
    RequestKind::Leave,
    RequestKind::Training,
    RequestKind::Advance,
    RequestKind::Document,
  ];

  /// Backend resource serving this kind's list.
  pub fn resource(&self) -> &'static str {
    match self {
      RequestKind::Authorization => "autorisations",
      RequestKind::Leave => "conges",
      RequestKind::Training => "formations",
      RequestKind::Advance => "avances",
      RequestKind::Document => "documents",
    }
  }

  /// Resource accepting edit/delete, if the kind is mutable at all.
  pub fn mutation_resource(&self) -> Option<&'static str> {
    match self {
      RequestKind::Authorization => Some("autorisations"),
      RequestKind::Leave => Some("conges"),
      RequestKind::Training => None,
      RequestKind::Advance => Some("avances"),
      RequestKind::Document => Some("documents"),
    }
  }

  pub fn label(&self) -> &'static str {
    match self {
      RequestKind::Authorization => "Authorization",
      RequestKind::Leave => "Leave",
      RequestKind::Training => "Training",
      RequestKind::Advance => "Advance",
      RequestKind::Document => "Document",
    }
  }

  /// Whether status comes from the staff response rather than the
  /// approval chain.
  pub fn uses_staff_response(&self) -> bool {
    matches!(self, RequestKind::Advance | RequestKind::Document)
  }
}

impl fmt::Display for RequestKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for RequestKind {
  type Err = SyncError;

  /// Exact match on the label or a known alias; never a substring match.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "authorization" | "autorisation" | "auth" => Ok(RequestKind::Authorization),
      "leave" | "conge" | "congé" => Ok(RequestKind::Leave),
      "training" | "formation" => Ok(RequestKind::Training),
      "advance" | "avance" => Ok(RequestKind::Advance),
      "document" | "doc" => Ok(RequestKind::Document),
      _ => Err(SyncError::UnknownKind(s.to_string())),
    }
  }
}

/// Normalized approval outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalState {
  Pending,
  Approved,
  Rejected,
}

impl ApprovalState {
  pub fn label(&self) -> &'static str {
    match self {
      ApprovalState::Pending => "pending",
      ApprovalState::Approved => "approved",
      ApprovalState::Rejected => "rejected",
    }
  }
}

impl fmt::Display for ApprovalState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

impl FromStr for ApprovalState {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_lowercase().as_str() {
      "pending" => Ok(ApprovalState::Pending),
      "approved" => Ok(ApprovalState::Approved),
      "rejected" => Ok(ApprovalState::Rejected),
      _ => Err(format!("Invalid approval state: {}", s)),
    }
  }
}

/// One HR request, normalized across kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
  pub id: String,
  pub kind: RequestKind,
  pub description: String,
  pub submitted_at: Option<DateTime<Utc>>,
  pub approval: ApprovalState,
  /// Kind-specific fields, opaque to the cache
  pub details: BTreeMap<String, Value>,
}

impl Request {
  /// `id` is only unique within a kind.
  pub fn identity(&self) -> (RequestKind, &str) {
    (self.kind, &self.id)
  }

  /// String value of a details field, if present and scalar.
  pub fn detail_str(&self, field: &str) -> Option<String> {
    match self.details.get(field)? {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      Value::Bool(b) => Some(b.to_string()),
      _ => None,
    }
  }
}

/// Signed-in user as supplied by the auth collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
  pub user_id: String,
  pub token: String,
}

impl Identity {
  pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
    Self {
      user_id: user_id.into(),
      token: token.into(),
    }
  }
}

impl fmt::Debug for Identity {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Identity")
      .field("user_id", &self.user_id)
      .field("token", &"<redacted>")
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_parsing_is_exact() {
    assert_eq!("Leave".parse::<RequestKind>(), Ok(RequestKind::Leave));
    assert_eq!("avance".parse::<RequestKind>(), Ok(RequestKind::Advance));
    assert_eq!(" DOC ".parse::<RequestKind>(), Ok(RequestKind::Document));
    // "pre-avance" must not silently match "avance"
    assert!(matches!(
      "pre-avance".parse::<RequestKind>(),
      Err(SyncError::UnknownKind(_))
    ));
  }

  #[test]
  fn test_training_is_read_only() {
    assert_eq!(RequestKind::Training.mutation_resource(), None);
    let mutable = RequestKind::ALL
      .iter()
      .filter(|k| k.mutation_resource().is_some())
      .count();
    assert_eq!(mutable, 4);
  }

  #[test]
  fn test_identity_debug_hides_token() {
    let identity = Identity::new("u1", "secret-token");
    let rendered = format!("{:?}", identity);
    assert!(rendered.contains("u1"));
    assert!(!rendered.contains("secret-token"));
  }
}
