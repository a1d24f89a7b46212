mod cache;
mod classify;
mod config;
mod db;
mod error;
mod gateway;
mod http;
mod logging;
mod network;
mod queue;
mod replay;
mod server;

#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::cache::{CacheStorage, NoopStorage, SqliteStorage};
use crate::gateway::Gateway;
use crate::network::ReqwestNetwork;
use crate::queue::SqliteQueueStore;
use crate::replay::{Backoff, ReplayWorker};
use crate::server::{build_router, ServerState};

#[derive(Parser, Debug)]
#[command(name = "progress-sync")]
#[command(about = "Offline-resilient proxy for learning progress updates")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/progress-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Upstream base URL
  #[arg(short, long)]
  upstream: Option<String>,

  /// Address to listen on
  #[arg(short, long)]
  listen: Option<SocketAddr>,

  /// Cache generation name
  #[arg(long)]
  cache_version: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(upstream) = args.upstream {
    config.upstream.url = Some(upstream);
  }
  if let Some(listen) = args.listen {
    config.server.listen = listen;
  }
  if let Some(version) = args.cache_version {
    config.cache.version = version;
  }

  let _log_guard = logging::init(&config.logging)?;

  let upstream = config.upstream_url()?;
  let network = Arc::new(ReqwestNetwork::new(config.network.timeout())?);

  let cache_storage: Arc<dyn CacheStorage> = if config.cache.enabled {
    Arc::new(SqliteStorage::open(&config.cache_path()?)?)
  } else {
    Arc::new(NoopStorage)
  };
  let queue = Arc::new(SqliteQueueStore::open(&config.queue_path()?)?);

  let (trigger, triggers) = replay::channel(config.replay.trigger.clone());
  let gateway = Arc::new(Gateway::new(
    &config,
    upstream.clone(),
    network,
    cache_storage,
    queue,
    trigger,
  ));

  let report = gateway.on_install().await;
  if report.failed > 0 {
    warn!(failed = report.failed, "some install-time assets were not cached");
  }
  gateway.on_activate();

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  let interval = match config.replay.interval_secs {
    0 => None,
    secs => Some(Duration::from_secs(secs)),
  };
  let backoff = Backoff::new(
    Duration::from_millis(config.replay.initial_backoff_ms),
    Duration::from_secs(config.replay.max_backoff_secs),
  );
  let worker = tokio::spawn(
    ReplayWorker::new(
      gateway.replay_engine(),
      triggers,
      interval,
      backoff,
      shutdown_rx,
    )
    .run(),
  );

  // Entries left over from a previous run.
  gateway.request_replay();

  let listener = tokio::net::TcpListener::bind(config.server.listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", config.server.listen, e))?;
  info!(
    listen = %config.server.listen,
    upstream = %upstream,
    generation = %config.cache.version,
    "progress-sync listening"
  );

  let router = build_router(ServerState { gateway, upstream });
  axum::serve(listener, router)
    .with_graceful_shutdown(async {
      let _ = tokio::signal::ctrl_c().await;
    })
    .await
    .map_err(|e| eyre!("Server error: {}", e))?;

  info!("shutting down");
  let _ = shutdown_tx.send(true);
  worker
    .await
    .map_err(|e| eyre!("Replay worker panicked: {}", e))?;

  Ok(())
}
