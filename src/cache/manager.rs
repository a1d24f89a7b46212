//! Cache manager that orchestrates the asset cache with network fetching.

use futures::future::join_all;
use reqwest::Method;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

use super::entry::{request_key, CachedResponse};
use super::storage::CacheStorage;
use crate::http::{ProxyRequest, ProxyResponse};
use crate::network::Network;

/// Outcome of install-time prepopulation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrepopulateReport {
  pub cached: usize,
  pub failed: usize,
}

/// Manages the versioned static-asset cache.
///
/// Exactly one generation is current. It is supplied by configuration and
/// never derived automatically.
#[derive(Clone)]
pub struct CacheManager {
  storage: Arc<dyn CacheStorage>,
  network: Arc<dyn Network>,
  generation: String,
  upstream: Url,
  manifest: Vec<String>,
}

impl CacheManager {
  pub fn new(
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
    generation: impl Into<String>,
    upstream: Url,
    manifest: Vec<String>,
  ) -> Self {
    Self {
      storage,
      network,
      generation: generation.into(),
      upstream,
      manifest,
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  /// Fetch the install manifest and store it under the current generation.
  ///
  /// Best effort: failed entries are logged and counted, never retried here.
  pub async fn prepopulate(&self) -> PrepopulateReport {
    if let Err(e) = self.storage.register_generation(&self.generation) {
      warn!(generation = %self.generation, error = %e, "failed to register cache generation");
    }

    let fetches = self.manifest.iter().map(|path| async move {
      let url = match self.upstream.join(path.trim_start_matches('/')) {
        Ok(url) => url,
        Err(e) => {
          warn!(path = %path, error = %e, "invalid prepopulate path");
          return false;
        }
      };

      let request = ProxyRequest::new(Method::GET, url.clone());
      match self.network.fetch(&request).await {
        Ok(response) if response.is_success() => self.store(&url, &response),
        Ok(response) => {
          warn!(url = %url, status = response.status, "prepopulate fetch returned error status");
          false
        }
        Err(e) => {
          warn!(url = %url, kind = %e.kind(), error = %e, "prepopulate fetch failed");
          false
        }
      }
    });

    let results = join_all(fetches).await;
    let cached = results.iter().filter(|ok| **ok).count();
    let report = PrepopulateReport {
      cached,
      failed: results.len() - cached,
    };

    info!(
      generation = %self.generation,
      cached = report.cached,
      failed = report.failed,
      "cache prepopulated"
    );
    report
  }

  /// Cache-first with write-through population.
  ///
  /// A cached asset is returned without any network call or freshness check.
  pub async fn serve_or_fetch(&self, request: &ProxyRequest) -> ProxyResponse {
    if let Some(cached) = self.lookup(&request.url) {
      debug!(url = %request.url, outcome = "hit", "serving cached asset");
      return cached.into_response();
    }

    debug!(url = %request.url, outcome = "miss", "fetching asset");
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&request.url, &response);
        }
        response
      }
      Err(e) => {
        warn!(url = %request.url, kind = %e.kind(), error = %e, "asset fetch failed with no cached copy");
        ProxyResponse::offline()
      }
    }
  }

  /// Network-first with cache fallback, for read calls.
  pub async fn network_first(&self, request: &ProxyRequest) -> ProxyResponse {
    match self.network.fetch(request).await {
      Ok(response) => {
        if response.is_success() {
          self.store(&request.url, &response);
        }
        response
      }
      Err(e) => match self.lookup(&request.url) {
        Some(cached) => {
          info!(url = %request.url, kind = %e.kind(), "network unavailable, serving cached response");
          cached.into_response()
        }
        None => {
          warn!(url = %request.url, kind = %e.kind(), error = %e, "network unavailable and nothing cached");
          ProxyResponse::offline()
        }
      },
    }
  }

  /// Delete every generation other than the current one.
  ///
  /// Returns the names that were removed.
  pub fn sweep_old_generations(&self) -> color_eyre::Result<Vec<String>> {
    let mut swept = Vec::new();
    for name in self.storage.generations()? {
      if name == self.generation {
        continue;
      }
      self.storage.delete_generation(&name)?;
      info!(generation = %name, "deleted stale cache generation");
      swept.push(name);
    }
    Ok(swept)
  }

  /// Read failures count as a miss.
  fn lookup(&self, url: &Url) -> Option<CachedResponse> {
    match self.storage.get(&self.generation, &request_key(url)) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %url, error = %e, "cache read failed, treating as miss");
        None
      }
    }
  }

  fn store(&self, url: &Url, response: &ProxyResponse) -> bool {
    let entry = CachedResponse::snapshot(url, response);
    match self.storage.put(&self.generation, &request_key(url), &entry) {
      Ok(()) => true,
      Err(e) => {
        warn!(url = %url, error = %e, "cache write failed");
        false
      }
    }
  }
}
