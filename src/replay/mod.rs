//! Replay of queued mutations.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  request(tag)  ┌──────────────┐  drain()  ┌──────────────┐
//! │   Gateway   │───────────────►│ ReplayWorker │──────────►│ ReplayEngine │
//! └─────────────┘                └──────────────┘           └──────────────┘
//!                                 ▲ interval / backoff          │   │
//!                                                               ▼   ▼
//!                                                        QueueStore  Network
//! ```
//!
//! A drain pass reads the queue oldest-first, re-issues each entry and removes
//! it only after the network returned a response. Any HTTP status counts as
//! delivered; only a transport failure does not.

mod trigger;
mod worker;

pub use trigger::{channel, ReplayTrigger};
pub use worker::{Backoff, ReplayWorker};

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::ReplayPolicyKind;
use crate::error::{SyncError, SyncResult};
use crate::network::Network;
use crate::queue::QueueStore;

/// What a drain pass does when an entry fails to re-deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayPolicy {
  /// Stop the pass; later entries wait for the next trigger.
  /// Never delivers entry N+1 while entry N is pending.
  FailFast,
  /// Keep the failed entry queued and continue with later entries.
  /// Gives up ordering so one bad entry cannot block the rest.
  SkipAndRetry,
}

impl From<ReplayPolicyKind> for ReplayPolicy {
  fn from(kind: ReplayPolicyKind) -> Self {
    match kind {
      ReplayPolicyKind::FailFast => Self::FailFast,
      ReplayPolicyKind::SkipAndRetry => Self::SkipAndRetry,
    }
  }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
  pub delivered: usize,
  pub failed: usize,
  /// Entries still queued when the pass ended
  pub remaining: usize,
  /// The pass stopped early at a failed entry
  pub halted: bool,
}

/// Drains the durable queue against the network.
pub struct ReplayEngine {
  store: Arc<dyn QueueStore>,
  network: Arc<dyn Network>,
  policy: ReplayPolicy,
  /// Serializes passes so no entry is in flight twice.
  drain_lock: Mutex<()>,
}

impl ReplayEngine {
  pub fn new(store: Arc<dyn QueueStore>, network: Arc<dyn Network>, policy: ReplayPolicy) -> Self {
    Self {
      store,
      network,
      policy,
      drain_lock: Mutex::new(()),
    }
  }

  #[cfg(test)]
  pub fn policy(&self) -> ReplayPolicy {
    self.policy
  }

  /// Run one drain pass.
  ///
  /// `Err` only for storage failures; transport failures are reported in the
  /// returned [`DrainReport`].
  pub async fn drain(&self) -> SyncResult<DrainReport> {
    let _guard = self.drain_lock.lock().await;

    let entries = self.store.list_all()?;
    let total = entries.len();
    if total == 0 {
      return Ok(DrainReport::default());
    }

    debug!(pending = total, policy = ?self.policy, "starting drain pass");
    let mut report = DrainReport::default();

    for entry in entries {
      let outcome = match entry.to_request() {
        Ok(request) => self
          .network
          .fetch(&request)
          .await
          .map_err(|e| SyncError::ReplayTransport {
            id: entry.id,
            reason: e.to_string(),
          }),
        Err(e) => Err(e),
      };

      match outcome {
        Ok(response) => {
          self.store.remove(entry.id)?;
          report.delivered += 1;
          debug!(id = entry.id, status = response.status, "replayed queued request");
        }
        Err(e) => {
          report.failed += 1;
          warn!(
            id = entry.id,
            method = %entry.method,
            url = %entry.url,
            attempts = entry.attempts + 1,
            kind = %e.kind(),
            error = %e,
            "replay failed"
          );
          if let Err(store_err) = self.store.record_failure(entry.id) {
            error!(id = entry.id, kind = %store_err.kind(), error = %store_err, "failed to record replay attempt");
          }

          if self.policy == ReplayPolicy::FailFast {
            report.halted = true;
            break;
          }
        }
      }
    }

    report.remaining = total - report.delivered;
    info!(
      delivered = report.delivered,
      failed = report.failed,
      remaining = report.remaining,
      halted = report.halted,
      "drain pass finished"
    );
    Ok(report)
  }
}
