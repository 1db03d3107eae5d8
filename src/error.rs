//! Error taxonomy shared by the aggregator, the cache and the mutation path.

use thiserror::Error;

/// Errors surfaced by the synchronization engine.
///
/// `Clone` because one fetch outcome is handed to every caller that
/// attached to the same in-flight round.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
  /// The backend could not be reached.
  #[error("network error: {0}")]
  Network(String),

  /// A request did not complete within its deadline and was aborted.
  #[error("request timed out after {0} ms")]
  Timeout(u64),

  /// Missing or rejected bearer token.
  #[error("authentication required: {0}")]
  Auth(String),

  /// Every one of the five request sources failed.
  #[error("all request sources failed")]
  AllSourcesFailed,

  /// A mutation was asked for a kind that has no mutation endpoint.
  #[error("unknown or read-only request kind: {0}")]
  UnknownKind(String),

  /// The server answered with a non-success status.
  #[error("server rejected the request ({status}): {message}")]
  ServerRejected { status: u16, message: String },

  /// The persistent store failed.
  #[error("storage error: {0}")]
  Storage(String),

  /// A payload could not be decoded.
  #[error("decode error: {0}")]
  Decode(String),
}

impl SyncError {
  /// Whether offering the user a "retry" makes sense for this error.
  pub fn is_retryable(&self) -> bool {
    matches!(self, SyncError::Network(_) | SyncError::Timeout(_))
  }

  /// Human-readable message for display, with a generic fallback for
  /// server rejections that carried no body.
  pub fn user_message(&self) -> String {
    match self {
      SyncError::ServerRejected { message, .. } if !message.trim().is_empty() => message.clone(),
      SyncError::ServerRejected { status, .. } => {
        format!("The server refused the request (HTTP {})", status)
      }
      SyncError::Timeout(_) => "The server took too long to answer. Try again.".to_string(),
      SyncError::Network(_) => "The server is unreachable. Check your connection.".to_string(),
      SyncError::Auth(_) => "Your session has expired. Sign in again.".to_string(),
      SyncError::AllSourcesFailed => "Your requests could not be loaded.".to_string(),
      SyncError::UnknownKind(kind) => format!("Requests of type '{}' cannot be changed.", kind),
      SyncError::Storage(_) | SyncError::Decode(_) => "An unexpected error occurred.".to_string(),
    }
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    // the deadline that fired is not known here; Timeout(ms) comes from
    // the tokio::time::timeout wrappers in the aggregator and mutations
    if e.is_timeout() {
      SyncError::Network(format!("request timed out: {}", e))
    } else if e.is_decode() {
      SyncError::Decode(e.to_string())
    } else {
      SyncError::Network(e.to_string())
    }
  }
}

impl From<serde_json::Error> for SyncError {
  fn from(e: serde_json::Error) -> Self {
    SyncError::Decode(e.to_string())
  }
}

impl From<rusqlite::Error> for SyncError {
  fn from(e: rusqlite::Error) -> Self {
    SyncError::Storage(e.to_string())
  }
}
