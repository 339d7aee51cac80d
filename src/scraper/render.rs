//! One rendered page load: lease the shared browser, open an isolated
//! context, navigate, get past any challenge, then run an extraction script.

use std::time::Duration;

use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use crate::domain::links::is_private_url;
use crate::domain::{ArticleResult, PreviewResult, ScrapeTask, StrategyKind};
use crate::scraper::article::{postprocess, ArticleExtraction};
use crate::scraper::browser::{BrowserLease, BrowserManager};
use crate::scraper::config::ScraperConfig;
use crate::scraper::extractor::{ArticleArgs, ARTICLE_SCRIPT, PREVIEW_SCRIPT, READINESS_SCRIPT};
use crate::scraper::fingerprint::FingerprintProfile;
use crate::scraper::metadata::{PageMetadata, RawMetadata};
use crate::scraper::waf::WafChallengeHandler;
use crate::scraper::{ContextOptions, RemotePage, ScrapeError};

const READINESS_POLL: Duration = Duration::from_millis(250);

/// Paragraph count at which a page is considered to have its content
const READY_PARAGRAPHS: usize = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct Readiness {
    paragraphs: usize,
    has_article: bool,
}

impl Readiness {
    fn is_ready(&self) -> bool {
        self.has_article || self.paragraphs >= READY_PARAGRAPHS
    }
}

/// A navigated, challenge-free page; must be closed with [`LoadedPage::close`]
struct LoadedPage {
    page: Box<dyn RemotePage>,
    final_url: Url,
    // Dropped after the page is closed, releasing the browser lease
    _lease: BrowserLease,
}

impl LoadedPage {
    async fn close(self) {
        self.page.close().await;
    }
}

pub struct RenderRunner {
    browser: BrowserManager,
    waf: WafChallengeHandler,
    config: ScraperConfig,
}

impl RenderRunner {
    pub fn new(browser: BrowserManager, config: ScraperConfig) -> Self {
        Self {
            browser,
            waf: WafChallengeHandler::from_config(&config),
            config,
        }
    }

    pub fn browser(&self) -> &BrowserManager {
        &self.browser
    }

    /// Render `task.url` and read its preview metadata
    pub async fn preview(&self, task: &ScrapeTask) -> Result<PreviewResult, ScrapeError> {
        let loaded = self.load(task).await?;
        let result = Self::extract_preview(&loaded).await;
        loaded.close().await;
        result
    }

    /// Render `task.url` and isolate its article
    pub async fn article(&self, task: &ScrapeTask) -> Result<ArticleResult, ScrapeError> {
        let loaded = self.load(task).await?;
        let result = self.extract_article(&loaded).await;
        loaded.close().await;
        result
    }

    async fn load(&self, task: &ScrapeTask) -> Result<LoadedPage, ScrapeError> {
        let lease = self.browser.acquire().await?;
        let profile = FingerprintProfile::random();
        debug!(
            "Opening context for {} ({}x{}, {}, {})",
            task.url, profile.viewport.0, profile.viewport.1, profile.locale, profile.timezone
        );

        let options = ContextOptions::from_config(&self.config, profile);
        let page = lease.open_context(&options).await?;

        if let Err(e) = self.settle(page.as_ref(), task).await {
            page.close().await;
            return Err(e);
        }

        // Scripts may have moved the page since it settled
        let final_url = match self.landed_url(page.as_ref(), task).await {
            Ok(url) => url,
            Err(e) => {
                page.close().await;
                return Err(e);
            }
        };

        Ok(LoadedPage {
            page,
            final_url,
            _lease: lease,
        })
    }

    /// Navigate, wait, and deal with any challenge
    async fn settle(&self, page: &dyn RemotePage, task: &ScrapeTask) -> Result<(), ScrapeError> {
        page.navigate(task.url.as_str(), self.config.navigation_timeout()).await?;
        self.landed_url(page, task).await?;
        tokio::time::sleep(self.config.wait_after_load()).await;

        let report = self.waf.resolve(page).await?;
        if report.is_blocked() {
            let label = report
                .detection
                .map(|d| d.label.to_string())
                .unwrap_or_else(|| "unknown challenge".to_string());
            info!("{} blocked by {} (status {:?})", task.url, label, report.status);
            return Err(ScrapeError::Blocked(label));
        }
        debug!("Challenge handling for {} ended in {:?}", task.url, report.state);

        if task.kind == StrategyKind::Article {
            self.wait_for_content(page).await?;
        }
        Ok(())
    }

    /// Where the page ended up after redirects; private hosts are refused
    async fn landed_url(&self, page: &dyn RemotePage, task: &ScrapeTask) -> Result<Url, ScrapeError> {
        let url = page
            .current_url()
            .await
            .and_then(|u| Url::parse(&u).ok())
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .unwrap_or_else(|| task.url.clone());

        if !self.config.allow_private_hosts && is_private_url(&url) {
            info!("{} redirected to private address {}", task.url, url);
            return Err(ScrapeError::InvalidUrl(format!(
                "redirected to private host {}",
                url.host_str().unwrap_or_default()
            )));
        }
        Ok(url)
    }

    /// Poll until the page looks populated; giving up is not an error
    async fn wait_for_content(&self, page: &dyn RemotePage) -> Result<(), ScrapeError> {
        let deadline = Instant::now() + self.config.content_ready_timeout();
        let call = READINESS_SCRIPT.call_without_args();
        loop {
            let readiness: Readiness = serde_json::from_value(page.evaluate(&call).await?)
                .map_err(|e| ScrapeError::ExtractionFailure(format!("Unreadable readiness result: {}", e)))?;
            if readiness.is_ready() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                debug!(
                    "Content not ready after {:?} ({} paragraphs), extracting anyway",
                    self.config.content_ready_timeout(),
                    readiness.paragraphs
                );
                return Ok(());
            }
            tokio::time::sleep(READINESS_POLL).await;
        }
    }

    async fn extract_preview(loaded: &LoadedPage) -> Result<PreviewResult, ScrapeError> {
        let value = loaded.page.evaluate(&PREVIEW_SCRIPT.call_without_args()).await?;
        let raw: RawMetadata = serde_json::from_value(value)
            .map_err(|e| ScrapeError::ExtractionFailure(format!("Unreadable preview metadata: {}", e)))?;

        let metadata = PageMetadata::from_raw(&raw, &loaded.final_url);
        Ok(metadata.into_preview(&loaded.final_url))
    }

    async fn extract_article(&self, loaded: &LoadedPage) -> Result<ArticleResult, ScrapeError> {
        let call = ARTICLE_SCRIPT.call(&ArticleArgs {
            noise_selectors: &self.config.noise_selectors,
            link_density_threshold: self.config.link_density_threshold,
        });
        let value = loaded.page.evaluate(&call).await?;
        let extraction: ArticleExtraction = serde_json::from_value(value)
            .map_err(|e| ScrapeError::ExtractionFailure(format!("Unreadable article extraction: {}", e)))?;

        postprocess(extraction, &loaded.final_url)
    }
}
