//! Best-effort result cache over a [`CacheStore`].
//!
//! Store calls run on the blocking pool so SQLite never stalls a runtime
//! worker. Reads honor each entry's TTL; writes are fire-and-forget. Store
//! failures are logged and otherwise ignored.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

use crate::domain::links::normalize_url;
use crate::domain::StrategyKind;
use crate::store::{CacheEntry, CacheStore};

#[derive(Clone)]
pub struct ContentCache {
    store: Arc<dyn CacheStore + Send + Sync>,
    ttl: Duration,
}

impl ContentCache {
    pub fn new(store: Arc<dyn CacheStore + Send + Sync>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Return the cached payload for `url`, or `None` when absent, expired or unreadable.
    pub async fn lookup<T: DeserializeOwned>(&self, kind: StrategyKind, url: &Url) -> Option<T> {
        let key = normalize_url(url);

        let store = self.store.clone();
        let read_key = key.clone();
        let read = tokio::task::spawn_blocking(move || store.get_entry(kind.as_str(), &read_key)).await;

        let entry = match read {
            Ok(Ok(Some(entry))) => entry,
            Ok(Ok(None)) => return None,
            Ok(Err(e)) => {
                warn!("Cache lookup failed for {}: {}", key, e);
                return None;
            }
            Err(e) => {
                warn!("Cache lookup task for {} did not finish: {}", key, e);
                return None;
            }
        };

        if entry.is_expired(Utc::now()) {
            debug!("Cache entry expired for {}", key);
            return None;
        }

        match serde_json::from_str(&entry.payload) {
            Ok(payload) => {
                debug!("Cache hit ({}) for {}", kind.as_str(), key);
                Some(payload)
            }
            Err(e) => {
                warn!("Discarding undecodable cache entry for {}: {}", key, e);
                None
            }
        }
    }

    /// Write `payload` for `url` in the background.
    ///
    /// The returned handle may be dropped; it exists so callers that care
    /// (tests, shutdown) can wait for the write.
    pub fn store<T: Serialize>(&self, kind: StrategyKind, url: &Url, payload: &T) -> Option<JoinHandle<()>> {
        let key = normalize_url(url);

        let payload = match serde_json::to_string(payload) {
            Ok(json) => json,
            Err(e) => {
                warn!("Not caching {}: {}", key, e);
                return None;
            }
        };

        let entry = CacheEntry {
            kind: kind.as_str().to_string(),
            key,
            payload,
            last_fetched: Utc::now(),
            ttl_secs: i64::try_from(self.ttl.as_secs()).unwrap_or(i64::MAX),
        };

        let store = self.store.clone();
        Some(tokio::task::spawn_blocking(move || {
            match store.put_entry(&entry) {
                Ok(()) => debug!("Cached {} result for {}", entry.kind, entry.key),
                Err(e) => warn!("Cache write failed for {}: {}", entry.key, e),
            }
        }))
    }

    /// Remove every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        match self.store.delete_expired(Utc::now()) {
            Ok(removed) => removed,
            Err(e) => {
                warn!("Cache purge failed: {}", e);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::{LinkpeekError, Result};
    use crate::domain::{PreviewResult, ScrapeStatus};
    use crate::store::SqliteStore;
    use chrono::DateTime;

    struct BrokenStore;

    impl CacheStore for BrokenStore {
        fn get_entry(&self, _kind: &str, _key: &str) -> Result<Option<CacheEntry>> {
            Err(LinkpeekError::Other("disk on fire".into()))
        }
        fn put_entry(&self, _entry: &CacheEntry) -> Result<()> {
            Err(LinkpeekError::Other("disk on fire".into()))
        }
        fn delete_expired(&self, _now: DateTime<Utc>) -> Result<usize> {
            Err(LinkpeekError::Other("disk on fire".into()))
        }
        fn count_entries(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn sample(url: &str) -> PreviewResult {
        PreviewResult {
            url: url.into(),
            title: "Example".into(),
            description: Some("An example page".into()),
            image: None,
            favicon: None,
            author: None,
            site_name: None,
            status: ScrapeStatus::Success,
            error: None,
        }
    }

    #[tokio::test]
    async fn test_store_then_lookup() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = ContentCache::new(store, Duration::from_secs(60));
        let url = Url::parse("https://example.com/page?utm_source=feed").unwrap();

        cache
            .store(StrategyKind::Preview, &url, &sample(url.as_str()))
            .unwrap()
            .await
            .unwrap();

        // Lookups by a differently-decorated URL hit the same normalized key
        let other = Url::parse("https://example.com/page#intro").unwrap();
        let hit: PreviewResult = cache.lookup(StrategyKind::Preview, &other).await.unwrap();
        assert_eq!(hit.title, "Example");
        assert!(cache
            .lookup::<PreviewResult>(StrategyKind::Article, &other)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let url = Url::parse("https://example.com/old").unwrap();
        store
            .put_entry(&CacheEntry {
                kind: "preview".into(),
                key: normalize_url(&url),
                payload: serde_json::to_string(&sample(url.as_str())).unwrap(),
                last_fetched: Utc::now() - chrono::Duration::days(31),
                ttl_secs: 30 * 24 * 3600,
            })
            .unwrap();

        let cache = ContentCache::new(store, Duration::from_secs(30 * 24 * 3600));
        assert!(cache
            .lookup::<PreviewResult>(StrategyKind::Preview, &url)
            .await
            .is_none());
        assert_eq!(cache.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_store_errors_are_swallowed() {
        let cache = ContentCache::new(Arc::new(BrokenStore), Duration::from_secs(60));
        let url = Url::parse("https://example.com/").unwrap();

        assert!(cache
            .lookup::<PreviewResult>(StrategyKind::Preview, &url)
            .await
            .is_none());
        let write = cache.store(StrategyKind::Preview, &url, &sample(url.as_str()));
        write.unwrap().await.unwrap();
        assert_eq!(cache.purge_expired(), 0);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let url = Url::parse("https://example.com/").unwrap();
        store
            .put_entry(&CacheEntry {
                kind: "preview".into(),
                key: normalize_url(&url),
                payload: "not json".into(),
                last_fetched: Utc::now(),
                ttl_secs: 60,
            })
            .unwrap();

        let cache = ContentCache::new(store, Duration::from_secs(60));
        assert!(cache
            .lookup::<PreviewResult>(StrategyKind::Preview, &url)
            .await
            .is_none());
    }
}
