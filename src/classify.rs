//! Static request classification into handling lanes.
//!
//! Only method and path are inspected; query string and headers are ignored.

use reqwest::Method;

use crate::config::{CacheConfig, RoutesConfig};

/// How the gateway handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
  /// Passed to the network with no cache or queue side effects
  Uncontrolled,
  /// Served from cache when present, populated on miss
  StaticCacheFirst,
  /// Progress update: network first, queued for replay on transport failure
  MutationQueue,
  /// Read API: network first, cache then synthetic 503 on failure
  ApiNetworkFirst,
  /// Application shell route from the install manifest
  ShellNetworkFirst,
}

/// Route rules used to pick a lane.
#[derive(Debug, Clone)]
pub struct Classifier {
  api_prefix: String,
  mutation_prefix: String,
  static_prefixes: Vec<String>,
  static_suffixes: Vec<String>,
  shell_routes: Vec<String>,
}

impl Classifier {
  pub fn new(routes: &RoutesConfig, cache: &CacheConfig) -> Self {
    Self {
      api_prefix: routes.api_prefix.clone(),
      mutation_prefix: routes.mutation_prefix.clone(),
      static_prefixes: routes.static_prefixes.clone(),
      static_suffixes: routes
        .static_suffixes
        .iter()
        .map(|s| s.to_lowercase())
        .collect(),
      shell_routes: cache.prepopulate.clone(),
    }
  }

  pub fn classify(&self, method: &Method, path: &str) -> Lane {
    if *method == Method::POST {
      return if path.starts_with(&self.mutation_prefix) {
        Lane::MutationQueue
      } else {
        Lane::Uncontrolled
      };
    }

    if *method != Method::GET {
      return Lane::Uncontrolled;
    }

    if self.is_static(path) {
      Lane::StaticCacheFirst
    } else if path.starts_with(&self.api_prefix) {
      Lane::ApiNetworkFirst
    } else if self.shell_routes.iter().any(|r| r == path) {
      Lane::ShellNetworkFirst
    } else {
      Lane::Uncontrolled
    }
  }

  fn is_static(&self, path: &str) -> bool {
    if self.static_prefixes.iter().any(|p| path.starts_with(p)) {
      return true;
    }
    let lower = path.to_lowercase();
    self.static_suffixes.iter().any(|s| lower.ends_with(s))
  }
}
