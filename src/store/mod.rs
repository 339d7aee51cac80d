pub mod cache;
pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;

pub use cache::ContentCache;
pub use sqlite::SqliteStore;

/// A persisted scrape result
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub kind: String,
    /// Normalized URL
    pub key: String,
    /// JSON-encoded result
    pub payload: String,
    pub last_fetched: DateTime<Utc>,
    pub ttl_secs: i64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_fetched).num_seconds() > self.ttl_secs
    }
}

pub trait CacheStore {
    fn get_entry(&self, kind: &str, key: &str) -> Result<Option<CacheEntry>>;
    /// Insert or overwrite the entry for `(kind, key)`
    fn put_entry(&self, entry: &CacheEntry) -> Result<()>;
    fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize>;
    fn count_entries(&self) -> Result<usize>;
}
