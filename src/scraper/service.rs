//! Entry points: pick the cheapest strategy that yields a usable result.
//!
//! Previews try a plain HTTP fetch first and only escalate to the shared
//! browser when the static metadata is thin. Articles always render. Both
//! paths retry blocked or timed-out renders, normalize, and cache.

use std::sync::Arc;

use tracing::{debug, info, info_span, warn, Instrument};
use url::Url;

use crate::domain::links::{default_favicon, fallback_title, validate_target};
use crate::domain::{ArticleResult, PreviewResult, ScrapeStatus, ScrapeTask, StrategyKind};
use crate::fetcher::Fetcher;
use crate::scraper::config::ScraperConfig;
use crate::scraper::metadata::{collect_from_html, PageMetadata};
use crate::scraper::queue::ScrapeQueue;
use crate::scraper::render::RenderRunner;
use crate::scraper::ScrapeError;
use crate::store::ContentCache;

/// What the browser-less fetch turned up
enum Lightweight {
    /// Good enough to return as is
    Done(PreviewResult),
    /// Thin metadata, kept in case rendering fails
    Partial { metadata: PageMetadata, page_url: Url },
    Nothing,
}

pub struct ScrapeService {
    config: ScraperConfig,
    cache: ContentCache,
    fetcher: Arc<dyn Fetcher + Send + Sync>,
    queue: Arc<ScrapeQueue>,
    runner: Arc<RenderRunner>,
}

impl ScrapeService {
    pub fn new(
        config: ScraperConfig,
        cache: ContentCache,
        fetcher: Arc<dyn Fetcher + Send + Sync>,
        queue: Arc<ScrapeQueue>,
        runner: Arc<RenderRunner>,
    ) -> Self {
        Self {
            config,
            cache,
            fetcher,
            queue,
            runner,
        }
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn queue(&self) -> &ScrapeQueue {
        &self.queue
    }

    /// Close the shared browser, if one is running
    pub async fn shutdown(&self) {
        self.runner.browser().shutdown().await;
    }

    /// Link preview for `raw_url`. Never fails; problems are reported through `status`.
    pub async fn get_preview(&self, raw_url: &str) -> PreviewResult {
        let url = match validate_target(raw_url, self.config.allow_private_hosts) {
            Ok(url) => url,
            Err(e) => {
                let err = ScrapeError::InvalidUrl(e.to_string());
                warn!("Rejected preview request for {:?}: {}", raw_url, err);
                return PreviewResult::unsuccessful(raw_url, untitled(raw_url), err.status(), err.to_string());
            }
        };

        self.preview_for(url.clone())
            .instrument(info_span!("preview", url = %url))
            .await
    }

    /// Reader-mode article for `raw_url`. Never fails; problems are reported through `status`.
    pub async fn get_reader_content(&self, raw_url: &str) -> ArticleResult {
        let url = match validate_target(raw_url, self.config.allow_private_hosts) {
            Ok(url) => url,
            Err(e) => {
                let err = ScrapeError::InvalidUrl(e.to_string());
                warn!("Rejected article request for {:?}: {}", raw_url, err);
                return ArticleResult::unsuccessful(raw_url, untitled(raw_url), err.status(), err.to_string());
            }
        };

        self.article_for(url.clone())
            .instrument(info_span!("article", url = %url))
            .await
    }

    async fn preview_for(&self, url: Url) -> PreviewResult {
        if let Some(cached) = self.cache.lookup::<PreviewResult>(StrategyKind::Preview, &url).await {
            return cached;
        }

        let fallback = match self.lightweight(&url).await {
            Lightweight::Done(preview) => {
                self.cache.store(StrategyKind::Preview, &url, &preview);
                return preview;
            }
            Lightweight::Partial { metadata, page_url } => Some((metadata, page_url)),
            Lightweight::Nothing => None,
        };

        let policy = self.config.retry_policy(StrategyKind::Preview);
        let rendered = policy.run(|attempt| self.render_preview(&url, attempt)).await;

        let preview = match rendered {
            Ok(preview) => preview,
            Err(e) => match fallback {
                Some((metadata, page_url)) if metadata.has_title() => {
                    info!("Rendering failed ({}), using static metadata", e);
                    metadata.into_preview(&page_url)
                }
                _ => {
                    warn!("Preview failed: {}", e);
                    PreviewResult::unsuccessful(url.as_str(), fallback_title(&url), e.status(), e.to_string())
                }
            },
        };

        // Failed previews are retried on the next request rather than cached
        if preview.status.is_success() {
            self.cache.store(StrategyKind::Preview, &url, &preview);
        }
        preview
    }

    async fn article_for(&self, url: Url) -> ArticleResult {
        if let Some(cached) = self.cache.lookup::<ArticleResult>(StrategyKind::Article, &url).await {
            return cached;
        }

        let policy = self.config.retry_policy(StrategyKind::Article);
        let rendered = policy.run(|attempt| self.render_article(&url, attempt)).await;

        let article = match rendered {
            Ok(article) => article,
            Err(e) => {
                warn!("Article extraction failed: {}", e);
                ArticleResult::unsuccessful(url.as_str(), fallback_title(&url), e.status(), e.to_string())
            }
        };

        if article.status.is_success() || self.config.cache_failed_articles {
            self.cache.store(StrategyKind::Article, &url, &article);
        }
        article
    }

    /// Plain GET plus static metadata rules
    async fn lightweight(&self, url: &Url) -> Lightweight {
        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(e) => {
                debug!("Lightweight fetch failed: {}", e);
                return Lightweight::Nothing;
            }
        };

        if !page.is_success() {
            debug!("Lightweight fetch got HTTP {}, escalating", page.status);
            return Lightweight::Nothing;
        }

        if page.is_image() {
            debug!("Direct image link");
            return Lightweight::Done(image_preview(&page.final_url));
        }

        if !page.is_html() {
            debug!("Not an HTML page ({:?}), escalating", page.content_type);
            return Lightweight::Nothing;
        }

        let raw = collect_from_html(&page.body, &page.final_url);
        let metadata = PageMetadata::from_raw(&raw, &page.final_url);
        if metadata.is_sufficient() {
            debug!("Static metadata is sufficient");
            return Lightweight::Done(metadata.into_preview(&page.final_url));
        }

        debug!("Static metadata is thin, escalating to the browser");
        Lightweight::Partial {
            metadata,
            page_url: page.final_url,
        }
    }

    async fn render_preview(&self, url: &Url, attempt: u32) -> Result<PreviewResult, ScrapeError> {
        let task = ScrapeTask::new(url.clone(), StrategyKind::Preview, attempt);
        let runner = self.runner.clone();
        let job_task = task.clone();

        self.queue
            .enqueue(&task, move || async move { runner.preview(&job_task).await }, self.config.task_timeout())
            .instrument(info_span!("attempt", attempt))
            .await?
    }

    async fn render_article(&self, url: &Url, attempt: u32) -> Result<ArticleResult, ScrapeError> {
        let task = ScrapeTask::new(url.clone(), StrategyKind::Article, attempt);
        let runner = self.runner.clone();
        let job_task = task.clone();

        self.queue
            .enqueue(&task, move || async move { runner.article(&job_task).await }, self.config.task_timeout())
            .instrument(info_span!("attempt", attempt))
            .await?
    }
}

/// Preview for a URL that is itself an image
fn image_preview(url: &Url) -> PreviewResult {
    let title = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(String::from)
        .unwrap_or_else(|| fallback_title(url));

    PreviewResult {
        url: url.to_string(),
        title,
        description: None,
        image: Some(url.to_string()),
        favicon: default_favicon(url),
        author: None,
        site_name: None,
        status: ScrapeStatus::Success,
        error: None,
    }
}

/// Title for input that is not a usable URL
fn untitled(raw: &str) -> String {
    match raw.trim() {
        "" => "Untitled".to_string(),
        trimmed => trimmed.to_string(),
    }
}
