//! Request and response values passed between the gateway, cache and network.

use bytes::Bytes;
use reqwest::Method;
use serde_json::json;
use url::Url;

/// Header exposing where a response came from.
pub const SOURCE_HEADER: &str = "x-progress-sync-source";

/// Header set when a mutation was acknowledged but could not be persisted.
pub const DEGRADED_HEADER: &str = "x-progress-sync-degraded";

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "proxy-connection",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
];

/// Returns true for headers that only make sense on one hop.
pub fn is_hop_by_hop(name: &str) -> bool {
  HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// An intercepted request, addressed to the upstream.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
  pub method: Method,
  pub url: Url,
  /// Ordered header list; duplicates are preserved.
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
}

impl ProxyRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: Vec::new(),
      body: Bytes::new(),
    }
  }

  #[cfg(test)]
  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = body.into();
    self
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }
}

/// Where a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Real upstream response
  Network,
  /// Snapshot served from the current cache generation
  Cache,
  /// Built locally because neither network nor cache could answer
  Synthetic,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Synthetic => "synthetic",
    }
  }
}

/// An HTTP-shaped answer handed back to the caller.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub source: ResponseSource,
}

impl ProxyResponse {
  pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      headers,
      body: body.into(),
      source: ResponseSource::Network,
    }
  }

  pub fn with_source(mut self, source: ResponseSource) -> Self {
    self.source = source;
    self
  }

  pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.headers.push((name.into(), value.into()));
    self
  }

  /// 2xx, the same test a browser applies for `Response.ok`.
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Mutation accepted for later delivery.
  pub fn queued() -> Self {
    Self::synthetic_json(202, json!({ "ok": true, "queued": true, "offline": true }))
  }

  /// Read request that could be answered neither by network nor cache.
  pub fn offline() -> Self {
    Self::synthetic_json(503, json!({ "ok": false, "offline": true }))
  }

  /// Uncontrolled request whose network fetch failed.
  pub fn bad_gateway(reason: &str) -> Self {
    Self::new(
      502,
      vec![(
        "content-type".to_string(),
        "text/plain; charset=utf-8".to_string(),
      )],
      format!("upstream unreachable: {}", reason),
    )
    .with_source(ResponseSource::Synthetic)
  }

  fn synthetic_json(status: u16, body: serde_json::Value) -> Self {
    Self::new(
      status,
      vec![("content-type".to_string(), "application/json".to_string())],
      body.to_string(),
    )
    .with_source(ResponseSource::Synthetic)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_queued_body_shape() {
    let resp = ProxyResponse::queued();
    assert_eq!(resp.status, 202);
    assert_eq!(resp.source, ResponseSource::Synthetic);
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body, json!({ "ok": true, "queued": true, "offline": true }));
    assert_eq!(resp.header("Content-Type"), Some("application/json"));
  }

  #[test]
  fn test_offline_body_shape() {
    let resp = ProxyResponse::offline();
    assert_eq!(resp.status, 503);
    assert!(!resp.is_success());
    let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
    assert_eq!(body, json!({ "ok": false, "offline": true }));
  }

  #[test]
  fn test_hop_by_hop() {
    assert!(is_hop_by_hop("Connection"));
    assert!(is_hop_by_hop("transfer-encoding"));
    assert!(!is_hop_by_hop("content-type"));
    assert!(!is_hop_by_hop("authorization"));
  }
}
