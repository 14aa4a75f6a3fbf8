//! Row and key types used by the repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

/// Logical keys of the key-value store. Each key holds one full JSON
/// document that is replaced wholesale on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKey {
    Snapshot,
    CreateQueue,
    UpdateQueue,
    DeleteQueue,
    LastRefresh,
    /// Version tag of the interception worker generation last activated.
    ActiveCacheVersion,
}

impl StoreKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKey::Snapshot => "quotes_snapshot",
            StoreKey::CreateQueue => "quotes_create_queue",
            StoreKey::UpdateQueue => "quotes_update_queue",
            StoreKey::DeleteQueue => "quotes_delete_queue",
            StoreKey::LastRefresh => "quotes_last_refresh",
            StoreKey::ActiveCacheVersion => "cache_active_version",
        }
    }
}

/// A response body kept in a cache namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub namespace: String,
    pub request_key: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}
