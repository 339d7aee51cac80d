use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{LinkpeekError, Result};
use crate::config::Config;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::scraper::{BrowserManager, ChromeLauncher, RenderRunner, ScrapeQueue, ScrapeService};
use crate::store::{ContentCache, SqliteStore};

pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub service: ScrapeService,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let db_path = match &config.cache.path {
            Some(p) => p.clone(),
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        Self::with_store(config, store)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        Self::with_store(config, store)
    }

    fn with_store(config: Config, store: Arc<SqliteStore>) -> Result<Self> {
        let scraper = &config.scraper;

        let cache = ContentCache::new(store.clone(), config.cache.ttl());
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new(scraper)?);
        let queue = Arc::new(ScrapeQueue::new(scraper.max_concurrency));
        let browser = BrowserManager::new(
            Arc::new(ChromeLauncher::new(scraper)),
            queue.clone(),
            scraper.recycle_after_uses,
            scraper.idle_shutdown(),
        );
        let runner = Arc::new(RenderRunner::new(browser, scraper.clone()));
        let service = ScrapeService::new(scraper.clone(), cache, fetcher, queue, runner);

        Ok(Self {
            config,
            store,
            service,
        })
    }

    /// Close the browser if one is running
    pub async fn shutdown(&self) {
        self.service.shutdown().await;
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| LinkpeekError::Config("Could not find data directory".into()))?;
        let linkpeek_dir = data_dir.join("linkpeek");
        std::fs::create_dir_all(&linkpeek_dir)?;
        Ok(linkpeek_dir.join("cache.db"))
    }
}
