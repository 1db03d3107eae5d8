//! Edit and delete against the backend, confirmed by a forced refresh.
//!
//! The cache is never patched locally: after the server acknowledges a
//! write, the coordinator forces a refresh so the cache holds server truth
//! before the caller continues. A failed write leaves the cache alone.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::SyncError;

use super::cache::RequestCache;
use super::types::{Identity, Request, RequestKind};

const METHOD_NOT_ALLOWED: u16 = 405;
const MAX_MESSAGE_LEN: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationMethod {
  Put,
  Delete,
  Post,
}

/// One HTTP write: `{method} /{resource}/{id}[/{action}]`.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationCall {
  pub method: MutationMethod,
  pub resource: &'static str,
  pub id: String,
  pub action: Option<&'static str>,
  pub body: Option<Value>,
}

impl MutationCall {
  /// Path segments, unescaped. The transport is responsible for encoding.
  pub fn segments(&self) -> Vec<&str> {
    let mut segments = vec![self.resource, self.id.as_str()];
    segments.extend(self.action);
    segments
  }

  pub fn path(&self) -> String {
    self.segments().join("/")
  }

  /// The documented fallback for a refused DELETE.
  fn delete_fallback(&self) -> Self {
    Self {
      method: MutationMethod::Post,
      resource: self.resource,
      id: self.id.clone(),
      action: Some("delete"),
      body: None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
  pub status: u16,
  pub body: String,
}

/// Sends a write and reports the raw status. Network failures are errors,
/// HTTP error statuses are not.
#[async_trait]
pub trait MutationTransport: Send + Sync {
  async fn send(&self, call: &MutationCall, token: &str) -> Result<TransportResponse, SyncError>;
}

/// Extract a human-readable message from an error body.
pub fn rejection_message(body: &str) -> String {
  if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
    for field in ["message", "error", "detail"] {
      if let Some(Value::String(message)) = map.get(field) {
        return message.trim().to_string();
      }
    }
  }

  let text = body.trim();
  if text.starts_with('{') || text.starts_with('<') {
    // JSON without a message field, or an HTML error page
    return String::new();
  }
  text.chars().take(MAX_MESSAGE_LEN).collect()
}

fn check_status(response: TransportResponse) -> Result<(), SyncError> {
  match response.status {
    200..=299 => Ok(()),
    401 | 403 => Err(SyncError::Auth(format!("HTTP {}", response.status))),
    status => Err(SyncError::ServerRejected {
      status,
      message: rejection_message(&response.body),
    }),
  }
}

fn mutation_resource(kind: RequestKind) -> Result<&'static str, SyncError> {
  kind
    .mutation_resource()
    .ok_or_else(|| SyncError::UnknownKind(kind.label().to_string()))
}

pub struct MutationCoordinator {
  transport: Arc<dyn MutationTransport>,
  cache: RequestCache,
  timeout: Duration,
}

impl MutationCoordinator {
  pub fn new(transport: Arc<dyn MutationTransport>, cache: RequestCache, timeout: Duration) -> Self {
    Self {
      transport,
      cache,
      timeout,
    }
  }

  fn identity(&self) -> Result<Identity, SyncError> {
    match self.cache.identity() {
      Some(identity) if !identity.token.trim().is_empty() => Ok(identity),
      Some(_) => Err(SyncError::Auth("missing bearer token".to_string())),
      None => Err(SyncError::Auth("not signed in".to_string())),
    }
  }

  /// Run `call` under the mutation deadline. Dropping the future on expiry
  /// aborts the underlying HTTP request.
  async fn bounded<F>(&self, call: F) -> Result<TransportResponse, SyncError>
  where
    F: Future<Output = Result<TransportResponse, SyncError>>,
  {
    match tokio::time::timeout(self.timeout, call).await {
      Ok(result) => result,
      Err(_) => Err(SyncError::Timeout(self.timeout.as_millis() as u64)),
    }
  }

  /// Make the cache reflect an acknowledged write before returning.
  async fn confirm(&self) {
    let result = self.cache.get(true).await;
    if let Some(e) = result.error {
      // The write happened; make sure the next read does not trust the old data
      warn!(error = %e, "Refresh after mutation failed, expiring cache");
      self.cache.invalidate();
    }
  }

  /// `PUT /{resource}/{id}` with `patch` as the JSON body.
  pub async fn edit(&self, request: &Request, patch: Map<String, Value>) -> Result<(), SyncError> {
    let resource = mutation_resource(request.kind)?;
    let identity = self.identity()?;

    let call = MutationCall {
      method: MutationMethod::Put,
      resource,
      id: request.id.clone(),
      action: None,
      body: Some(Value::Object(patch)),
    };

    let response = self
      .bounded(self.transport.send(&call, &identity.token))
      .await?;
    check_status(response)?;

    info!(kind = %request.kind, id = %request.id, "Request edited");
    self.confirm().await;
    Ok(())
  }

  /// `DELETE /{resource}/{id}`, retried once as `POST /{resource}/{id}/delete`
  /// when the server answers 405.
  pub async fn delete(&self, request_id: &str, kind: RequestKind) -> Result<(), SyncError> {
    let resource = mutation_resource(kind)?;
    let identity = self.identity()?;

    let primary = MutationCall {
      method: MutationMethod::Delete,
      resource,
      id: request_id.to_string(),
      action: None,
      body: None,
    };

    let response = self
      .bounded(async {
        let response = self.transport.send(&primary, &identity.token).await?;
        if response.status != METHOD_NOT_ALLOWED {
          return Ok(response);
        }
        info!(path = %primary.path(), "DELETE not allowed, using POST fallback");
        self
          .transport
          .send(&primary.delete_fallback(), &identity.token)
          .await
      })
      .await?;
    check_status(response)?;

    info!(%kind, id = %request_id, "Request deleted");
    self.confirm().await;
    Ok(())
  }
}
