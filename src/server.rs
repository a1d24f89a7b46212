//! HTTP adapter binding the gateway to an axum router.
//!
//! Every request not addressed to the control endpoints is converted into a
//! [`ProxyRequest`] against the upstream and answered by [`Gateway::handle`].

use axum::{
  body::Body,
  extract::{Request, State},
  http::{HeaderName, HeaderValue, StatusCode, Uri},
  response::{IntoResponse, Response},
  routing::{get, post},
  Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;
use url::Url;

use crate::gateway::Gateway;
use crate::http::{ProxyRequest, ProxyResponse, SOURCE_HEADER};

/// Largest request body the proxy will buffer.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

#[derive(Clone)]
pub struct ServerState {
  pub gateway: Arc<Gateway>,
  pub upstream: Url,
}

pub fn build_router(state: ServerState) -> Router {
  Router::new()
    .route("/__progress-sync/health", get(health))
    .route("/__progress-sync/queue", get(queue_status))
    .route("/__progress-sync/sync", post(sync_now))
    .fallback(proxy)
    .with_state(state)
}

async fn health() -> StatusCode {
  StatusCode::NO_CONTENT
}

async fn queue_status(State(state): State<ServerState>) -> Response {
  match state.gateway.pending() {
    Ok(entries) => {
      let entries: Vec<_> = entries
        .iter()
        .map(|e| {
          json!({
            "id": e.id,
            "ts": e.enqueued_at.to_rfc3339(),
            "method": e.method,
            "url": e.url,
            "attempts": e.attempts,
          })
        })
        .collect();
      Json(json!({ "pending": entries.len(), "entries": entries })).into_response()
    }
    Err(e) => unavailable(&e),
  }
}

/// Manual flush: runs a drain pass and reports the outcome.
async fn sync_now(State(state): State<ServerState>) -> Response {
  match state.gateway.on_replay_trigger().await {
    Ok(report) => Json(report).into_response(),
    Err(e) => unavailable(&e),
  }
}

fn unavailable(err: &crate::error::SyncError) -> Response {
  warn!(kind = %err.kind(), error = %err, "control endpoint failed");
  (
    StatusCode::SERVICE_UNAVAILABLE,
    Json(json!({ "ok": false, "error": err.to_string() })),
  )
    .into_response()
}

async fn proxy(State(state): State<ServerState>, request: Request) -> Response {
  let (parts, body) = request.into_parts();

  let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
    Ok(b) => b,
    Err(e) => {
      warn!(error = %e, "failed to read request body");
      return (StatusCode::PAYLOAD_TOO_LARGE, "request body too large").into_response();
    }
  };

  let headers = parts
    .headers
    .iter()
    .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
    .collect();

  let request = ProxyRequest {
    method: parts.method,
    url: upstream_url(&state.upstream, &parts.uri),
    headers,
    body,
  };

  into_response(state.gateway.handle(request).await)
}

/// Map an incoming URI onto the upstream base, keeping the query string.
///
/// Only path and query are taken from the client; scheme and host always
/// come from the upstream.
fn upstream_url(base: &Url, uri: &Uri) -> Url {
  let mut url = base.clone();
  let path = format!("{}{}", base.path().trim_end_matches('/'), uri.path());
  url.set_path(&path);
  url.set_query(uri.query());
  url
}

fn into_response(response: ProxyResponse) -> Response {
  let mut builder = Response::builder().status(response.status);

  for (name, value) in &response.headers {
    if let (Ok(name), Ok(value)) = (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      builder = builder.header(name, value);
    }
  }
  builder = builder.header(SOURCE_HEADER, response.source.as_str());

  builder
    .body(Body::from(response.body))
    .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
