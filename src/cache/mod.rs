//! Versioned static-asset cache.
//!
//! This module provides the cache half of the proxy:
//! - Response snapshots stored per named generation
//! - Cache-first serving with write-through population for static assets
//! - Network-first serving with cache fallback for read calls
//! - Install-time prepopulation and activation-time sweep of old generations

mod entry;
mod manager;
mod storage;

pub use manager::{CacheManager, PrepopulateReport};
pub use storage::{CacheStorage, NoopStorage, SqliteStorage};
