//! Background task that runs drain passes when a replay signal fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use super::ReplayEngine;

/// Exponential backoff between drain retries.
#[derive(Debug, Clone)]
pub struct Backoff {
  initial: Duration,
  max: Duration,
  current: Option<Duration>,
}

impl Backoff {
  pub fn new(initial: Duration, max: Duration) -> Self {
    Self {
      initial,
      max: max.max(initial),
      current: None,
    }
  }

  /// Delay before the next retry; doubles each call up to the maximum.
  pub fn next_delay(&mut self) -> Duration {
    let delay = match self.current {
      Some(d) => std::cmp::min(d.saturating_mul(2), self.max),
      None => self.initial,
    };
    self.current = Some(delay);
    delay
  }

  pub fn reset(&mut self) {
    self.current = None;
  }
}

/// Waits for replay signals and drains the queue.
///
/// Signals: an explicit trigger request, the periodic interval, or the retry
/// timer armed after a pass that left entries queued.
pub struct ReplayWorker {
  engine: Arc<ReplayEngine>,
  triggers: mpsc::Receiver<()>,
  interval: Option<Duration>,
  backoff: Backoff,
  shutdown: watch::Receiver<bool>,
}

impl ReplayWorker {
  pub fn new(
    engine: Arc<ReplayEngine>,
    triggers: mpsc::Receiver<()>,
    interval: Option<Duration>,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
  ) -> Self {
    Self {
      engine,
      triggers,
      interval,
      backoff,
      shutdown,
    }
  }

  pub async fn run(mut self) {
    let mut ticker = self.interval.and_then(|period| match Instant::now().checked_add(period) {
      Some(start) => {
        let mut t = tokio::time::interval_at(start, period);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(t)
      }
      None => {
        error!(interval_secs = period.as_secs(), "replay interval out of range, periodic replay disabled");
        None
      }
    });
    let mut retry_at: Option<Instant> = None;

    info!("replay worker started");
    loop {
      let reason = tokio::select! {
        msg = self.triggers.recv() => match msg {
          Some(()) => "trigger",
          None => break,
        },
        _ = next_tick(&mut ticker) => "interval",
        _ = sleep_until(retry_at) => "backoff",
        _ = self.shutdown.changed() => break,
      };

      debug!(reason, "replay signal received");
      retry_at = None;

      match self.engine.drain().await {
        Ok(report) if report.remaining > 0 => {
          let delay = self.backoff.next_delay();
          retry_at = schedule_retry(delay);
          info!(
            remaining = report.remaining,
            retry_in_ms = delay.as_millis() as u64,
            "queue not empty after drain, scheduling retry"
          );
        }
        Ok(_) => self.backoff.reset(),
        Err(e) => {
          let delay = self.backoff.next_delay();
          retry_at = schedule_retry(delay);
          error!(kind = %e.kind(), error = %e, retry_in_ms = delay.as_millis() as u64, "drain pass failed");
        }
      }
    }
    info!("replay worker stopped");
  }
}

/// Retry deadline `delay` from now; `None` if it is past what the clock can represent.
fn schedule_retry(delay: Duration) -> Option<Instant> {
  let at = Instant::now().checked_add(delay);
  if at.is_none() {
    error!(
      retry_in_ms = delay.as_millis() as u64,
      "retry delay out of range, waiting for the next trigger"
    );
  }
  at
}

async fn next_tick(ticker: &mut Option<Interval>) {
  match ticker {
    Some(t) => {
      t.tick().await;
    }
    None => std::future::pending().await,
  }
}

async fn sleep_until(at: Option<Instant>) {
  match at {
    Some(at) => tokio::time::sleep_until(at).await,
    None => std::future::pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::queue::{NewQueuedRequest, QueueStore, SqliteQueueStore};
  use crate::replay::{channel, ReplayPolicy};
  use crate::testing::FakeNetwork;

  #[test]
  fn test_backoff_doubles_and_caps() {
    let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350));
    assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    assert_eq!(backoff.next_delay(), Duration::from_millis(200));
    assert_eq!(backoff.next_delay(), Duration::from_millis(350));
    assert_eq!(backoff.next_delay(), Duration::from_millis(350));

    backoff.reset();
    assert_eq!(backoff.next_delay(), Duration::from_millis(100));
  }

  #[test]
  fn test_backoff_saturates_instead_of_overflowing() {
    let mut backoff = Backoff::new(Duration::from_secs(u64::MAX / 2 + 1), Duration::MAX);
    backoff.next_delay();
    assert_eq!(backoff.next_delay(), Duration::MAX);
  }

  #[test]
  fn test_unrepresentable_retry_is_skipped() {
    assert!(schedule_retry(Duration::MAX).is_none());
    assert!(schedule_retry(Duration::from_millis(10)).is_some());
  }

  fn queued() -> NewQueuedRequest {
    NewQueuedRequest {
      url: "http://learn.test/api/learning/progress/complete".to_string(),
      method: "POST".to_string(),
      headers: vec![],
      body: "{}".to_string(),
    }
  }

  async fn wait_for_empty(store: &SqliteQueueStore) -> bool {
    for _ in 0..200 {
      if store.list_all().unwrap().is_empty() {
        return true;
      }
      tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
  }

  #[tokio::test]
  async fn test_trigger_drains_queue() {
    let store = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    store.append(&queued()).unwrap();

    let engine = Arc::new(ReplayEngine::new(
      store.clone(),
      network.clone(),
      ReplayPolicy::FailFast,
    ));
    let (trigger, rx) = channel("progress-sync");
    let (_stop, shutdown) = watch::channel(false);
    let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
    let handle = tokio::spawn(ReplayWorker::new(engine, rx, None, backoff, shutdown).run());

    trigger.request("progress-sync").unwrap();
    assert!(wait_for_empty(&store).await);
    assert_eq!(network.calls().len(), 1);

    drop(trigger);
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_backoff_retries_until_network_returns() {
    let store = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    network.set_online(false);
    store.append(&queued()).unwrap();

    let engine = Arc::new(ReplayEngine::new(
      store.clone(),
      network.clone(),
      ReplayPolicy::FailFast,
    ));
    let (trigger, rx) = channel("progress-sync");
    let (stop, shutdown) = watch::channel(false);
    let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(20));
    let handle = tokio::spawn(ReplayWorker::new(engine, rx, None, backoff, shutdown).run());

    trigger.request("progress-sync").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.list_all().unwrap().len(), 1);

    network.set_online(true);
    assert!(wait_for_empty(&store).await);
    assert!(network.calls().len() >= 2);

    stop.send(true).unwrap();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_huge_interval_keeps_worker_alive() {
    let store = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    store.append(&queued()).unwrap();

    let engine = Arc::new(ReplayEngine::new(
      store.clone(),
      network,
      ReplayPolicy::FailFast,
    ));
    let (trigger, rx) = channel("progress-sync");
    let (stop, shutdown) = watch::channel(false);
    let backoff = Backoff::new(Duration::from_millis(10), Duration::MAX);
    let handle = tokio::spawn(
      ReplayWorker::new(
        engine,
        rx,
        Some(Duration::from_secs(u64::MAX)),
        backoff,
        shutdown,
      )
      .run(),
    );

    trigger.request("progress-sync").unwrap();
    assert!(wait_for_empty(&store).await);
    assert!(!handle.is_finished());
    trigger.request("progress-sync").unwrap();

    stop.send(true).unwrap();
    handle.await.unwrap();
  }

  #[tokio::test]
  async fn test_interval_drains_without_trigger() {
    let store = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    let network = Arc::new(FakeNetwork::new());
    store.append(&queued()).unwrap();

    let engine = Arc::new(ReplayEngine::new(
      store.clone(),
      network,
      ReplayPolicy::FailFast,
    ));
    let (_trigger, rx) = channel("progress-sync");
    let (stop, shutdown) = watch::channel(false);
    let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(50));
    let handle = tokio::spawn(
      ReplayWorker::new(engine, rx, Some(Duration::from_millis(20)), backoff, shutdown).run(),
    );

    assert!(wait_for_empty(&store).await);

    stop.send(true).unwrap();
    handle.await.unwrap();
  }
}
