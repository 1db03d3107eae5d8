//! HTTP client for the HR REST API.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::{header::ACCEPT, Method, StatusCode};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::config::ApiConfig;
use crate::error::SyncError;

use super::aggregator::RequestSource;
use super::mutation::{MutationCall, MutationMethod, MutationTransport, TransportResponse};
use super::types::{Identity, RequestKind};

const USER_AGENT: &str = concat!("hrsync/", env!("CARGO_PKG_VERSION"));

/// HR REST API client wrapper
#[derive(Clone)]
pub struct HrClient {
  http: reqwest::Client,
  base_url: Url,
}

impl HrClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let base_url = Url::parse(config.base_url.trim())
      .map_err(|e| eyre!("Invalid API base URL '{}': {}", config.base_url, e))?;
    if base_url.cannot_be_a_base() {
      return Err(eyre!("API base URL '{}' cannot carry a path", config.base_url));
    }

    let http = reqwest::Client::builder()
      .user_agent(USER_AGENT)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { http, base_url })
  }

  /// Append `segments` to the base path. Each segment is percent-encoded,
  /// so an id containing '/' stays one segment.
  fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| SyncError::Network(format!("invalid base URL {}", self.base_url)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }
}

/// Map a non-success status to the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> SyncError {
  if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
    return SyncError::Auth(format!("HTTP {}", status.as_u16()));
  }
  SyncError::ServerRejected {
    status: status.as_u16(),
    message: super::mutation::rejection_message(body),
  }
}

/// List endpoints answer either a bare array or `{ "data": [...] }`.
fn into_records(payload: Value) -> Result<Vec<Value>, SyncError> {
  match payload {
    Value::Array(records) => Ok(records),
    Value::Object(mut map) => match map.remove("data") {
      Some(Value::Array(records)) => Ok(records),
      _ => Err(SyncError::Decode("expected a JSON array of records".to_string())),
    },
    Value::Null => Ok(Vec::new()),
    _ => Err(SyncError::Decode("expected a JSON array of records".to_string())),
  }
}

#[async_trait]
impl RequestSource for HrClient {
  async fn fetch_kind(
    &self,
    kind: RequestKind,
    identity: &Identity,
  ) -> Result<Vec<Value>, SyncError> {
    let url = self.endpoint(&[kind.resource()])?;
    debug!(%kind, %url, "Fetching requests");

    let response = self
      .http
      .get(url)
      .query(&[("userId", identity.user_id.as_str())])
      .header(ACCEPT, "application/json")
      .bearer_auth(&identity.token)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(status_error(status, &body));
    }

    let payload: Value = response.json().await?;
    into_records(payload)
  }
}

#[async_trait]
impl MutationTransport for HrClient {
  async fn send(&self, call: &MutationCall, token: &str) -> Result<TransportResponse, SyncError> {
    let url = self.endpoint(&call.segments())?;
    let method = match call.method {
      MutationMethod::Put => Method::PUT,
      MutationMethod::Delete => Method::DELETE,
      MutationMethod::Post => Method::POST,
    };
    debug!(%method, %url, "Sending mutation");

    let mut request = self
      .http
      .request(method, url)
      .header(ACCEPT, "application/json")
      .bearer_auth(token);
    if let Some(body) = &call.body {
      request = request.json(body);
    }

    let response = request.send().await?;
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    Ok(TransportResponse { status, body })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn client(base: &str) -> HrClient {
    HrClient::new(&ApiConfig {
      base_url: base.to_string(),
      ..ApiConfig::default()
    })
    .expect("valid client")
  }

  #[test]
  fn test_endpoint_keeps_base_path() {
    let c = client("https://hr.example.com/api/v1");
    let url = c.endpoint(&["conges", "12", "delete"]).expect("url");
    assert_eq!(url.as_str(), "https://hr.example.com/api/v1/conges/12/delete");

    let slashed = client("https://hr.example.com/api/v1/");
    let url = slashed.endpoint(&["documents"]).expect("url");
    assert_eq!(url.as_str(), "https://hr.example.com/api/v1/documents");
  }

  #[test]
  fn test_endpoint_encodes_id() {
    let c = client("https://hr.example.com");
    let url = c.endpoint(&["avances", "a/b c"]).expect("url");
    assert_eq!(url.as_str(), "https://hr.example.com/avances/a%2Fb%20c");
  }

  #[test]
  fn test_rejects_unusable_base_url() {
    let result = HrClient::new(&ApiConfig {
      base_url: "mailto:hr@example.com".to_string(),
      ..ApiConfig::default()
    });
    assert!(result.is_err());
  }

  #[test]
  fn test_into_records_accepts_wrapped_payloads() {
    assert_eq!(into_records(json!([{ "id": 1 }])).expect("array").len(), 1);
    assert_eq!(
      into_records(json!({ "data": [{ "id": 1 }, { "id": 2 }] }))
        .expect("wrapped")
        .len(),
      2
    );
    assert!(into_records(Value::Null).expect("null").is_empty());
    assert!(matches!(
      into_records(json!({ "items": [] })),
      Err(SyncError::Decode(_))
    ));
  }

  #[test]
  fn test_status_error_mapping() {
    assert!(matches!(
      status_error(StatusCode::UNAUTHORIZED, ""),
      SyncError::Auth(_)
    ));
    assert_eq!(
      status_error(StatusCode::BAD_REQUEST, r#"{"message":"End date before start date"}"#),
      SyncError::ServerRejected {
        status: 400,
        message: "End date before start date".to_string()
      }
    );
  }
}
