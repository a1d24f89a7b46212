//! Shared test doubles.

use async_trait::async_trait;
use reqwest::Method;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

use crate::error::{SyncError, SyncResult};
use crate::http::{ProxyRequest, ProxyResponse};
use crate::network::Network;
use crate::queue::{NewQueuedRequest, QueueStore, QueuedRequest};

pub fn upstream() -> Url {
  Url::parse("http://learn.test/").unwrap()
}

pub fn get(path: &str) -> ProxyRequest {
  ProxyRequest::new(Method::GET, upstream().join(path.trim_start_matches('/')).unwrap())
}

pub fn post(path: &str, body: &str) -> ProxyRequest {
  ProxyRequest::new(Method::POST, upstream().join(path.trim_start_matches('/')).unwrap())
    .with_header("content-type", "application/json")
    .with_body(body.to_string())
}

/// Scripted network: responses by path, an online switch and a call log.
///
/// Unknown paths answer `200 ok`.
pub struct FakeNetwork {
  online: AtomicBool,
  responses: Mutex<HashMap<String, (u16, String)>>,
  failing: Mutex<HashSet<String>>,
  calls: Mutex<Vec<ProxyRequest>>,
  latency: Mutex<Duration>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self {
      online: AtomicBool::new(true),
      responses: Mutex::new(HashMap::new()),
      failing: Mutex::new(HashSet::new()),
      calls: Mutex::new(Vec::new()),
      latency: Mutex::new(Duration::ZERO),
    }
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn respond(&self, path: &str, status: u16, body: &str) {
    self
      .responses
      .lock()
      .unwrap()
      .insert(path.to_string(), (status, body.to_string()));
  }

  /// Every fetch sleeps this long before answering.
  pub fn set_latency(&self, latency: Duration) {
    *self.latency.lock().unwrap() = latency;
  }

  /// Transport failure for `path` even while online.
  pub fn fail(&self, path: &str) {
    self.failing.lock().unwrap().insert(path.to_string());
  }

  pub fn calls(&self) -> Vec<ProxyRequest> {
    self.calls.lock().unwrap().clone()
  }

  pub fn call_paths(&self) -> Vec<String> {
    self
      .calls()
      .iter()
      .map(|r| format!("{} {}", r.method, r.path()))
      .collect()
  }
}

#[async_trait]
impl Network for FakeNetwork {
  async fn fetch(&self, request: &ProxyRequest) -> SyncResult<ProxyResponse> {
    self.calls.lock().unwrap().push(request.clone());

    let latency = *self.latency.lock().unwrap();
    if !latency.is_zero() {
      tokio::time::sleep(latency).await;
    }

    let path = request.path().to_string();
    if !self.online.load(Ordering::SeqCst) || self.failing.lock().unwrap().contains(&path) {
      return Err(SyncError::Transport {
        method: request.method.to_string(),
        url: request.url.to_string(),
        reason: "network unreachable".to_string(),
      });
    }

    let (status, body) = self
      .responses
      .lock()
      .unwrap()
      .get(&path)
      .cloned()
      .unwrap_or((200, "ok".to_string()));

    Ok(ProxyResponse::new(
      status,
      vec![("content-type".to_string(), "text/plain".to_string())],
      body,
    ))
  }
}

/// A queue whose storage is gone.
pub struct BrokenQueueStore;

impl QueueStore for BrokenQueueStore {
  fn append(&self, _request: &NewQueuedRequest) -> SyncResult<i64> {
    Err(SyncError::storage("quota exceeded"))
  }

  fn list_all(&self) -> SyncResult<Vec<QueuedRequest>> {
    Err(SyncError::storage("quota exceeded"))
  }

  fn remove(&self, _id: i64) -> SyncResult<()> {
    Err(SyncError::storage("quota exceeded"))
  }

  fn record_failure(&self, _id: i64) -> SyncResult<()> {
    Err(SyncError::storage("quota exceeded"))
  }
}
