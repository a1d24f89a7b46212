use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub upstream: UpstreamConfig,
  #[serde(default)]
  pub server: ServerConfig,
  #[serde(default)]
  pub network: NetworkConfig,
  #[serde(default)]
  pub routes: RoutesConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub queue: QueueConfig,
  #[serde(default)]
  pub replay: ReplayConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamConfig {
  /// Base URL of the learning platform backend
  pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_listen")]
  pub listen: SocketAddr,
}

impl Default for ServerConfig {
  fn default() -> Self {
    Self {
      listen: default_listen(),
    }
  }
}

fn default_listen() -> SocketAddr {
  SocketAddr::from(([127, 0, 0, 1], 8787))
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
  /// Transport timeout after which a hung fetch counts as failed
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for NetworkConfig {
  fn default() -> Self {
    Self {
      timeout_secs: default_timeout_secs(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

impl NetworkConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutesConfig {
  #[serde(default = "default_api_prefix")]
  pub api_prefix: String,
  /// POSTs under this prefix are progress updates eligible for queueing
  #[serde(default = "default_mutation_prefix")]
  pub mutation_prefix: String,
  #[serde(default = "default_static_prefixes")]
  pub static_prefixes: Vec<String>,
  #[serde(default = "default_static_suffixes")]
  pub static_suffixes: Vec<String>,
}

impl Default for RoutesConfig {
  fn default() -> Self {
    Self {
      api_prefix: default_api_prefix(),
      mutation_prefix: default_mutation_prefix(),
      static_prefixes: default_static_prefixes(),
      static_suffixes: default_static_suffixes(),
    }
  }
}

fn default_api_prefix() -> String {
  "/api/".to_string()
}

fn default_mutation_prefix() -> String {
  "/api/learning/progress/".to_string()
}

fn default_static_prefixes() -> Vec<String> {
  ["/static/", "/assets/", "/build/"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_static_suffixes() -> Vec<String> {
  [".css", ".js", ".woff2", ".png", ".jpg", ".svg"]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Generation name; bump on every deployment that changes cached assets
  #[serde(default = "default_cache_version")]
  pub version: String,
  /// Paths fetched and stored at install time
  #[serde(default = "default_prepopulate")]
  pub prepopulate: Vec<String>,
  pub path: Option<PathBuf>,
  #[serde(default = "default_true")]
  pub enabled: bool,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      version: default_cache_version(),
      prepopulate: default_prepopulate(),
      path: None,
      enabled: true,
    }
  }
}

fn default_cache_version() -> String {
  "progress-sync-v1".to_string()
}

fn default_prepopulate() -> Vec<String> {
  vec!["/".to_string()]
}

fn default_true() -> bool {
  true
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QueueConfig {
  pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ReplayPolicyKind {
  /// Stop the pass at the first failed entry (strict FIFO)
  #[default]
  FailFast,
  /// Leave failed entries queued and continue with later ones
  SkipAndRetry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplayConfig {
  /// Name of the replay signal requested at enqueue time
  #[serde(default = "default_trigger")]
  pub trigger: String,
  #[serde(default)]
  pub policy: ReplayPolicyKind,
  /// Periodic trigger; 0 disables it
  #[serde(default = "default_interval_secs")]
  pub interval_secs: u64,
  #[serde(default = "default_initial_backoff_ms")]
  pub initial_backoff_ms: u64,
  #[serde(default = "default_max_backoff_secs")]
  pub max_backoff_secs: u64,
}

impl Default for ReplayConfig {
  fn default() -> Self {
    Self {
      trigger: default_trigger(),
      policy: ReplayPolicyKind::default(),
      interval_secs: default_interval_secs(),
      initial_backoff_ms: default_initial_backoff_ms(),
      max_backoff_secs: default_max_backoff_secs(),
    }
  }
}

fn default_trigger() -> String {
  "progress-sync".to_string()
}

fn default_interval_secs() -> u64 {
  60
}

fn default_initial_backoff_ms() -> u64 {
  500
}

fn default_max_backoff_secs() -> u64 {
  60
}

/// Upper bound for every replay timer setting: one day.
const MAX_REPLAY_DELAY_SECS: u64 = 24 * 60 * 60;

impl ReplayConfig {
  fn validate(&self) -> Result<()> {
    if self.interval_secs > MAX_REPLAY_DELAY_SECS {
      return Err(eyre!(
        "replay.interval_secs must be at most {} (got {})",
        MAX_REPLAY_DELAY_SECS,
        self.interval_secs
      ));
    }
    if self.initial_backoff_ms > MAX_REPLAY_DELAY_SECS * 1000 {
      return Err(eyre!(
        "replay.initial_backoff_ms must be at most {} (got {})",
        MAX_REPLAY_DELAY_SECS * 1000,
        self.initial_backoff_ms
      ));
    }
    if self.max_backoff_secs > MAX_REPLAY_DELAY_SECS {
      return Err(eyre!(
        "replay.max_backoff_secs must be at most {} (got {})",
        MAX_REPLAY_DELAY_SECS,
        self.max_backoff_secs
      ));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_log_level")]
  pub level: String,
  /// Write daily-rotated log files here instead of stderr
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_log_level(),
      directory: None,
    }
  }
}

fn default_log_level() -> String {
  "info".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./progress-sync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/progress-sync/config.yaml
  ///
  /// Without a file the defaults apply.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("progress-sync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("progress-sync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.replay.validate()?;
    Ok(config)
  }

  /// The upstream base URL, normalized to end with `/`.
  pub fn upstream_url(&self) -> Result<url::Url> {
    let raw = self.upstream.url.as_deref().ok_or_else(|| {
      eyre!("No upstream configured. Set upstream.url in the config file or pass --upstream.")
    })?;

    let mut url =
      url::Url::parse(raw).map_err(|e| eyre!("Invalid upstream URL '{}': {}", raw, e))?;
    if !url.path().ends_with('/') {
      let path = format!("{}/", url.path());
      url.set_path(&path);
    }

    Ok(url)
  }

  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(p) => Ok(p.clone()),
      None => crate::db::default_path("cache.db"),
    }
  }

  pub fn queue_path(&self) -> Result<PathBuf> {
    match &self.queue.path {
      Some(p) => Ok(p.clone()),
      None => crate::db::default_path("queue.db"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_file_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.routes.api_prefix, "/api/");
    assert_eq!(config.routes.mutation_prefix, "/api/learning/progress/");
    assert_eq!(config.routes.static_suffixes.len(), 6);
    assert_eq!(config.cache.version, "progress-sync-v1");
    assert_eq!(config.cache.prepopulate, vec!["/".to_string()]);
    assert!(config.cache.enabled);
    assert_eq!(config.replay.trigger, "progress-sync");
    assert_eq!(config.replay.policy, ReplayPolicyKind::FailFast);
    assert_eq!(config.network.timeout(), Duration::from_secs(30));
    assert_eq!(config.server.listen.port(), 8787);
  }

  #[test]
  fn test_partial_sections() {
    let yaml = r#"
upstream:
  url: https://learn.example.com
cache:
  version: v42
replay:
  policy: skip-and-retry
  interval_secs: 0
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.cache.version, "v42");
    assert_eq!(config.cache.prepopulate, vec!["/".to_string()]);
    assert_eq!(config.replay.policy, ReplayPolicyKind::SkipAndRetry);
    assert_eq!(config.replay.interval_secs, 0);
    assert_eq!(config.replay.trigger, "progress-sync");
  }

  #[test]
  fn test_upstream_url_gets_trailing_slash() {
    let config = Config::parse("upstream:\n  url: http://localhost:3000/app\n").unwrap();
    let url = config.upstream_url().unwrap();
    assert_eq!(url.as_str(), "http://localhost:3000/app/");
  }

  #[test]
  fn test_missing_upstream_is_an_error() {
    let config = Config::default();
    assert!(config.upstream_url().is_err());
  }

  #[test]
  fn test_unknown_policy_rejected() {
    assert!(Config::parse("replay:\n  policy: yolo\n").is_err());
  }

  #[test]
  fn test_out_of_range_replay_timers_rejected() {
    let err = Config::parse("replay:\n  interval_secs: 18446744073709551615\n").unwrap_err();
    assert!(err.to_string().contains("replay.interval_secs"));

    let err = Config::parse("replay:\n  max_backoff_secs: 100000\n").unwrap_err();
    assert!(err.to_string().contains("replay.max_backoff_secs"));

    let err = Config::parse("replay:\n  initial_backoff_ms: 86400001\n").unwrap_err();
    assert!(err.to_string().contains("replay.initial_backoff_ms"));

    let config = Config::parse("replay:\n  interval_secs: 86400\n").unwrap();
    assert_eq!(config.replay.interval_secs, 86400);
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    let err = Config::load(Some(Path::new("/nonexistent/progress-sync.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
