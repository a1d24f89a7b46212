//! Durable queue of progress mutations that could not be delivered.
//!
//! Entries are appended when a mutation's network attempt fails and removed
//! only by a successful replay.

mod store;

pub use store::{NewQueuedRequest, QueueStore, QueuedRequest, SqliteQueueStore};
