//! Local persistent store: SQLite tables behind plain async functions.
//!
//! This module is split into three submodules:
//! - `model`: typed rows returned by the cache queries.
//! - `repo`: pool setup, migrations and the key-value store holding the
//!   visible snapshot and the operation queues.
//! - `cache`: namespace and response tables owned by the interception worker.
//!
//! External modules should import from `quote_sync::db`; the key-value API
//! is re-exported at the module root.

pub mod cache;
pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{CachedResponse, StoreKey};
