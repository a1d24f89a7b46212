//! SQLite helpers shared by the cache and queue stores.

use color_eyre::{eyre::eyre, Result};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Open or create a database file and apply `schema`.
///
/// `synchronous = FULL` makes every committed transaction durable before the
/// call returns.
pub fn open(path: &Path, schema: &str) -> Result<Connection> {
  if let Some(parent) = path.parent() {
    if !parent.as_os_str().is_empty() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create database directory: {}", e))?;
    }
  }

  let conn = Connection::open(path)
    .map_err(|e| eyre!("Failed to open database at {}: {}", path.display(), e))?;

  conn
    .pragma_update(None, "synchronous", "FULL")
    .map_err(|e| eyre!("Failed to configure database {}: {}", path.display(), e))?;

  run_migrations(&conn, schema)?;
  Ok(conn)
}

/// Open a private in-memory database with `schema` applied.
#[cfg(test)]
pub fn open_in_memory(schema: &str) -> Result<Connection> {
  let conn = Connection::open_in_memory()
    .map_err(|e| eyre!("Failed to open in-memory database: {}", e))?;
  run_migrations(&conn, schema)?;
  Ok(conn)
}

fn run_migrations(conn: &Connection, schema: &str) -> Result<()> {
  conn
    .execute_batch(schema)
    .map_err(|e| eyre!("Failed to run migrations: {}", e))?;
  Ok(())
}

/// Default location for a database file.
pub fn default_path(file_name: &str) -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;

  Ok(data_dir.join("progress-sync").join(file_name))
}
