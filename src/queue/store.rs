//! Queue storage trait and SQLite implementation.

use chrono::{DateTime, TimeZone, Utc};
use color_eyre::Result;
use reqwest::Method;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::warn;

use crate::db;
use crate::error::{SyncError, SyncResult};
use crate::http::{is_hop_by_hop, ProxyRequest};

/// A mutation captured at the moment its network attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQueuedRequest {
  pub url: String,
  pub method: String,
  pub headers: Vec<(String, String)>,
  pub body: String,
}

impl NewQueuedRequest {
  pub fn from_request(request: &ProxyRequest) -> Self {
    let body = match std::str::from_utf8(&request.body) {
      Ok(text) => text.to_string(),
      Err(e) => {
        warn!(
          method = %request.method,
          url = %request.url,
          body_len = request.body.len(),
          error = %e,
          "mutation body is not valid UTF-8, queueing a lossy copy"
        );
        String::from_utf8_lossy(&request.body).into_owned()
      }
    };

    Self {
      url: request.url.to_string(),
      method: request.method.to_string(),
      headers: request
        .headers
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name))
        .cloned()
        .collect(),
      body,
    }
  }
}

/// A persisted pending request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedRequest {
  pub id: i64,
  pub enqueued_at: DateTime<Utc>,
  pub url: String,
  pub method: String,
  pub headers: Vec<(String, String)>,
  pub body: String,
  /// Failed replay attempts so far
  pub attempts: u32,
}

impl QueuedRequest {
  /// Rebuild the original request for replay.
  pub fn to_request(&self) -> SyncResult<ProxyRequest> {
    let invalid = |reason: String| SyncError::ReplayTransport {
      id: self.id,
      reason,
    };

    let url = url::Url::parse(&self.url)
      .map_err(|e| invalid(format!("invalid url '{}': {}", self.url, e)))?;
    let method = Method::from_bytes(self.method.as_bytes())
      .map_err(|e| invalid(format!("invalid method '{}': {}", self.method, e)))?;

    let mut request = ProxyRequest::new(method, url).with_body(self.body.clone());
    request.headers = self.headers.clone();
    Ok(request)
  }
}

/// Durable, append-only store of pending requests.
///
/// Each operation is atomic. `list_all` returns entries in insertion order.
pub trait QueueStore: Send + Sync {
  /// Persist a new entry and return its id. The entry is committed before
  /// this returns.
  fn append(&self, request: &NewQueuedRequest) -> SyncResult<i64>;

  /// All pending entries, oldest first.
  fn list_all(&self) -> SyncResult<Vec<QueuedRequest>>;

  /// Delete an entry. Removing an unknown id is not an error.
  fn remove(&self, id: i64) -> SyncResult<()>;

  /// Note one more failed replay attempt for an entry.
  fn record_failure(&self, id: i64) -> SyncResult<()>;
}

/// SQLite-based queue storage.
pub struct SqliteQueueStore {
  conn: Mutex<Connection>,
}

/// Schema for the queue table.
const QUEUE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queued_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    url TEXT NOT NULL,
    method TEXT NOT NULL,
    headers TEXT NOT NULL,
    body TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);
"#;

impl SqliteQueueStore {
  /// Open or create the queue database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    let conn = db::open(path, QUEUE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = db::open_in_memory(QUEUE_SCHEMA)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> SyncResult<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| SyncError::storage(format!("lock poisoned: {}", e)))
  }
}

impl QueueStore for SqliteQueueStore {
  fn append(&self, request: &NewQueuedRequest) -> SyncResult<i64> {
    let conn = self.lock()?;
    let headers = serde_json::to_string(&request.headers)
      .map_err(|e| SyncError::storage(format!("failed to serialize headers: {}", e)))?;

    conn
      .execute(
        "INSERT INTO queued_requests (ts, url, method, headers, body)
         VALUES (?, ?, ?, ?, ?)",
        params![
          Utc::now().timestamp_millis(),
          request.url,
          request.method,
          headers,
          request.body
        ],
      )
      .map_err(|e| SyncError::storage(format!("failed to append request: {}", e)))?;

    Ok(conn.last_insert_rowid())
  }

  fn list_all(&self) -> SyncResult<Vec<QueuedRequest>> {
    let conn = self.lock()?;

    let mut stmt = conn
      .prepare(
        "SELECT id, ts, url, method, headers, body, attempts
         FROM queued_requests ORDER BY id",
      )
      .map_err(|e| SyncError::storage(format!("failed to prepare query: {}", e)))?;

    let rows = stmt
      .query_map([], |row| {
        Ok((
          row.get::<_, i64>(0)?,
          row.get::<_, i64>(1)?,
          row.get::<_, String>(2)?,
          row.get::<_, String>(3)?,
          row.get::<_, String>(4)?,
          row.get::<_, String>(5)?,
          row.get::<_, u32>(6)?,
        ))
      })
      .map_err(|e| SyncError::storage(format!("failed to list requests: {}", e)))?;

    let mut entries = Vec::new();
    for row in rows {
      let (id, ts, url, method, headers, body, attempts) =
        row.map_err(|e| SyncError::storage(format!("failed to read request row: {}", e)))?;

      let headers: Vec<(String, String)> = serde_json::from_str(&headers).map_err(|e| {
        SyncError::storage(format!("corrupt headers for request {}: {}", id, e))
      })?;
      let enqueued_at = Utc.timestamp_millis_opt(ts).single().ok_or_else(|| {
        SyncError::storage(format!("corrupt timestamp {} for request {}", ts, id))
      })?;

      entries.push(QueuedRequest {
        id,
        enqueued_at,
        url,
        method,
        headers,
        body,
        attempts,
      });
    }

    Ok(entries)
  }

  fn remove(&self, id: i64) -> SyncResult<()> {
    let conn = self.lock()?;
    conn
      .execute("DELETE FROM queued_requests WHERE id = ?", params![id])
      .map_err(|e| SyncError::storage(format!("failed to remove request {}: {}", id, e)))?;
    Ok(())
  }

  fn record_failure(&self, id: i64) -> SyncResult<()> {
    let conn = self.lock()?;
    conn
      .execute(
        "UPDATE queued_requests SET attempts = attempts + 1 WHERE id = ?",
        params![id],
      )
      .map_err(|e| {
        SyncError::storage(format!("failed to record attempt for request {}: {}", id, e))
      })?;
    Ok(())
  }
}
