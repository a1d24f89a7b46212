//! Interception gateway: the single entry point for every outgoing request.
//!
//! `Received -> Classified -> {CacheServe | NetworkPassthrough |
//! NetworkWithQueueFallback} -> Responded`. Every path ends in a response.

use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use url::Url;

use crate::cache::{CacheManager, CacheStorage, PrepopulateReport};
use crate::classify::{Classifier, Lane};
use crate::config::Config;
use crate::error::SyncResult;
use crate::http::{ProxyRequest, ProxyResponse, DEGRADED_HEADER};
use crate::network::Network;
use crate::queue::{NewQueuedRequest, QueueStore, QueuedRequest};
use crate::replay::{DrainReport, ReplayEngine, ReplayTrigger};

pub struct Gateway {
  classifier: Classifier,
  /// Upstream base path, without trailing slash; route rules apply below it
  base_path: String,
  cache: CacheManager,
  queue: Arc<dyn QueueStore>,
  network: Arc<dyn Network>,
  replay: Arc<ReplayEngine>,
  trigger: ReplayTrigger,
}

impl Gateway {
  pub fn new(
    config: &Config,
    upstream: Url,
    network: Arc<dyn Network>,
    cache_storage: Arc<dyn CacheStorage>,
    queue: Arc<dyn QueueStore>,
    trigger: ReplayTrigger,
  ) -> Self {
    let classifier = Classifier::new(&config.routes, &config.cache);
    let base_path = upstream.path().trim_end_matches('/').to_string();
    let cache = CacheManager::new(
      cache_storage,
      network.clone(),
      config.cache.version.clone(),
      upstream,
      config.cache.prepopulate.clone(),
    );
    let replay = Arc::new(ReplayEngine::new(
      queue.clone(),
      network.clone(),
      config.replay.policy.into(),
    ));

    Self {
      classifier,
      base_path,
      cache,
      queue,
      network,
      replay,
      trigger,
    }
  }

  /// Shared with the background replay worker.
  pub fn replay_engine(&self) -> Arc<ReplayEngine> {
    self.replay.clone()
  }

  /// Populate the current cache generation.
  pub async fn on_install(&self) -> PrepopulateReport {
    self.cache.prepopulate().await
  }

  /// Make the current generation the only one.
  pub fn on_activate(&self) -> Vec<String> {
    match self.cache.sweep_old_generations() {
      Ok(swept) => swept,
      Err(e) => {
        warn!(generation = %self.cache.generation(), error = %e, "failed to sweep old cache generations");
        Vec::new()
      }
    }
  }

  /// Drain the queue now.
  pub async fn on_replay_trigger(&self) -> SyncResult<DrainReport> {
    self.replay.drain().await
  }

  /// Pending queue entries, oldest first.
  pub fn pending(&self) -> SyncResult<Vec<QueuedRequest>> {
    self.queue.list_all()
  }

  /// Ask the worker for a replay pass; failure is logged and otherwise ignored.
  pub fn request_replay(&self) {
    if let Err(e) = self.trigger.request(self.trigger.name()) {
      warn!(kind = %e.kind(), error = %e, "could not request replay trigger");
    }
  }

  #[instrument(skip_all, fields(method = %request.method, path = %request.path()))]
  pub async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
    let lane = self.classifier.classify(&request.method, self.route(&request));

    match lane {
      Lane::StaticCacheFirst => self.cache.serve_or_fetch(&request).await,
      Lane::ApiNetworkFirst | Lane::ShellNetworkFirst => self.cache.network_first(&request).await,
      Lane::MutationQueue => self.send_or_queue(request).await,
      Lane::Uncontrolled => self.passthrough(&request).await,
    }
  }

  /// Request path relative to the upstream base.
  fn route<'a>(&self, request: &'a ProxyRequest) -> &'a str {
    match request.path().strip_prefix(self.base_path.as_str()) {
      Some("") => "/",
      Some(route) if route.starts_with('/') => route,
      _ => request.path(),
    }
  }

  async fn passthrough(&self, request: &ProxyRequest) -> ProxyResponse {
    match self.network.fetch(request).await {
      Ok(response) => response,
      Err(e) => {
        warn!(kind = %e.kind(), error = %e, "passthrough request failed");
        ProxyResponse::bad_gateway(&e.to_string())
      }
    }
  }

  async fn send_or_queue(&self, request: ProxyRequest) -> ProxyResponse {
    let err = match self.network.fetch(&request).await {
      Ok(response) => return response,
      Err(e) => e,
    };

    info!(kind = %err.kind(), error = %err, "progress update failed, queueing for replay");
    let record = NewQueuedRequest::from_request(&request);

    match self.queue.append(&record) {
      Ok(id) => {
        info!(id, "progress update queued");
        self.request_replay();
        ProxyResponse::queued()
      }
      Err(store_err) => {
        // The caller still sees an accepted update; the loss is only visible here.
        error!(
          kind = %store_err.kind(),
          error = %store_err,
          method = %record.method,
          url = %record.url,
          body_len = record.body.len(),
          "progress update lost: queue storage unavailable"
        );
        ProxyResponse::queued().with_header(DEGRADED_HEADER, "storage-unavailable")
      }
    }
  }
}
