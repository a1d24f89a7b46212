//! Cached response snapshots and their keys.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::http::{ProxyResponse, ResponseSource};

/// Stable cache key for a GET of `url`.
///
/// The full URL is hashed, query string included.
pub fn request_key(url: &url::Url) -> String {
  let mut hasher = Sha256::new();
  hasher.update(b"GET ");
  hasher.update(url.as_str().as_bytes());
  hex::encode(hasher.finalize())
}

/// A response snapshot stored in a cache generation.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  pub url: String,
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Bytes,
  pub cached_at: DateTime<Utc>,
}

impl CachedResponse {
  pub fn snapshot(url: &url::Url, response: &ProxyResponse) -> Self {
    Self {
      url: url.to_string(),
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
      cached_at: Utc::now(),
    }
  }

  pub fn into_response(self) -> ProxyResponse {
    ProxyResponse::new(self.status, self.headers, self.body).with_source(ResponseSource::Cache)
  }
}
