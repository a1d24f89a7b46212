//! Network seam: the one place requests leave the process.

use async_trait::async_trait;
use color_eyre::{eyre::eyre, Result};
use reqwest::redirect::Policy;
use std::time::Duration;

use crate::error::{SyncError, SyncResult};
use crate::http::{is_hop_by_hop, ProxyRequest, ProxyResponse};

/// Issues a request to the upstream.
///
/// `Err` means the fetch itself failed (no HTTP response was received). Any
/// response, including 4xx and 5xx, is `Ok`.
#[async_trait]
pub trait Network: Send + Sync {
  async fn fetch(&self, request: &ProxyRequest) -> SyncResult<ProxyResponse>;
}

/// reqwest-backed network with a configurable transport timeout.
#[derive(Clone)]
pub struct ReqwestNetwork {
  client: reqwest::Client,
}

impl ReqwestNetwork {
  pub fn new(timeout: Duration) -> Result<Self> {
    // Redirects are the caller's business; pass them through untouched.
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .redirect(Policy::none())
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

/// Headers the client library sets itself.
fn is_managed_by_client(name: &str) -> bool {
  is_hop_by_hop(name)
    || name.eq_ignore_ascii_case("host")
    || name.eq_ignore_ascii_case("content-length")
}

#[async_trait]
impl Network for ReqwestNetwork {
  async fn fetch(&self, request: &ProxyRequest) -> SyncResult<ProxyResponse> {
    let transport_err = |reason: String| SyncError::Transport {
      method: request.method.to_string(),
      url: request.url.to_string(),
      reason,
    };

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      if !is_managed_by_client(name) {
        builder = builder.header(name.as_str(), value.as_str());
      }
    }

    if !request.body.is_empty() {
      builder = builder.body(request.body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| transport_err(e.to_string()))?;

    let status = response.status().as_u16();
    let headers = response
      .headers()
      .iter()
      .filter(|(k, _)| !is_hop_by_hop(k.as_str()))
      .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
      .collect();

    // A body cut off mid-stream is as much a transport failure as a refused connect.
    let body = response
      .bytes()
      .await
      .map_err(|e| transport_err(format!("failed to read body: {}", e)))?;

    Ok(ProxyResponse::new(status, headers, body))
  }
}
