//! Named replay signal.
//!
//! The gateway requests the signal after queueing a mutation; the worker bound
//! to the same name drains the queue when it fires. Requests coalesce: while
//! one is pending, further requests are absorbed.

use tokio::sync::mpsc;

use crate::error::{SyncError, SyncResult};

/// Handle used to request a replay by name.
#[derive(Debug, Clone)]
pub struct ReplayTrigger {
  name: String,
  tx: mpsc::Sender<()>,
}

/// Create a trigger bound to `name` and the receiver the worker listens on.
pub fn channel(name: impl Into<String>) -> (ReplayTrigger, mpsc::Receiver<()>) {
  let (tx, rx) = mpsc::channel(1);
  (
    ReplayTrigger {
      name: name.into(),
      tx,
    },
    rx,
  )
}

impl ReplayTrigger {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Request a replay for `tag`.
  pub fn request(&self, tag: &str) -> SyncResult<()> {
    let failed = |reason: &str| SyncError::TriggerRegistration {
      tag: tag.to_string(),
      reason: reason.to_string(),
    };

    if tag != self.name {
      return Err(failed("no replay handler is bound to this tag"));
    }

    match self.tx.try_send(()) {
      Ok(()) | Err(mpsc::error::TrySendError::Full(())) => Ok(()),
      Err(mpsc::error::TrySendError::Closed(())) => Err(failed("replay worker is not running")),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::ErrorKind;

  #[test]
  fn test_requests_coalesce() {
    let (trigger, mut rx) = channel("progress-sync");
    trigger.request("progress-sync").unwrap();
    trigger.request("progress-sync").unwrap();
    trigger.request("progress-sync").unwrap();

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
  }

  #[test]
  fn test_unknown_tag_rejected() {
    let (trigger, _rx) = channel("progress-sync");
    let err = trigger.request("other-sync").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TriggerRegistrationFailure);
  }

  #[test]
  fn test_closed_worker_rejected() {
    let (trigger, rx) = channel("progress-sync");
    drop(rx);
    let err = trigger.request("progress-sync").unwrap_err();
    assert!(err.to_string().contains("not running"));
  }
}
