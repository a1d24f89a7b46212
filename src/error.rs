//! Error taxonomy for the interception, queue and replay paths.
//!
//! None of these errors ever reach the HTTP caller. They are logged with their
//! [`ErrorKind`] and converted into a real, cached or synthetic response.

use std::fmt;

/// Errors produced by the sync subsystem.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  /// The network fetch itself failed (offline, DNS, timeout, refused).
  #[error("transport failure for {method} {url}: {reason}")]
  Transport {
    method: String,
    url: String,
    reason: String,
  },

  /// The durable queue could not persist or read a record.
  #[error("queue storage unavailable: {0}")]
  StorageUnavailable(String),

  /// The replay trigger could not be requested from the host.
  #[error("replay trigger '{tag}' could not be registered: {reason}")]
  TriggerRegistration { tag: String, reason: String },

  /// A queued entry failed to re-deliver during a drain pass.
  #[error("replay of queued request {id} failed: {reason}")]
  ReplayTransport { id: i64, reason: String },
}

impl SyncError {
  pub fn storage(reason: impl Into<String>) -> Self {
    Self::StorageUnavailable(reason.into())
  }

  /// Stable label used as a structured logging field.
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Transport { .. } => ErrorKind::TransportFailure,
      Self::StorageUnavailable(_) => ErrorKind::StorageUnavailable,
      Self::TriggerRegistration { .. } => ErrorKind::TriggerRegistrationFailure,
      Self::ReplayTransport { .. } => ErrorKind::ReplayTransportFailure,
    }
  }
}

/// Result type for sync subsystem operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  TransportFailure,
  StorageUnavailable,
  TriggerRegistrationFailure,
  ReplayTransportFailure,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::TransportFailure => "transport_failure",
      Self::StorageUnavailable => "storage_unavailable",
      Self::TriggerRegistrationFailure => "trigger_registration_failure",
      Self::ReplayTransportFailure => "replay_transport_failure",
    }
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_labels() {
    let err = SyncError::storage("disk full");
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    assert_eq!(err.kind().to_string(), "storage_unavailable");

    let err = SyncError::ReplayTransport {
      id: 7,
      reason: "connection refused".into(),
    };
    assert_eq!(err.kind().as_str(), "replay_transport_failure");
    assert!(err.to_string().contains("queued request 7"));
  }
}
