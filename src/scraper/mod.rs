//! Scrape orchestration for link previews and reader-mode articles.
//!
//! # Architecture
//!
//! ```text
//! ScrapeService ─┬─ ContentCache (hit → done)
//!                ├─ HttpFetcher  (lightweight preview path)
//!                └─ ScrapeQueue → RenderRunner → BrowserManager → RemotePage
//!                                      │
//!                                      ├─ WafChallengeHandler
//!                                      └─ extraction scripts → metadata / article
//! ```
//!
//! The browser engine sits behind [`BrowserLauncher`], [`BrowserHandle`] and
//! [`RemotePage`]. [`chrome`] provides the chromiumoxide implementation.
//!
//! # Usage
//!
//! ```rust,ignore
//! use linkpeek::app::AppContext;
//!
//! let ctx = AppContext::new(config)?;
//! let preview = ctx.service.get_preview("https://example.com/post").await;
//! let article = ctx.service.get_reader_content("https://example.com/post").await;
//! ctx.shutdown().await;
//! ```

pub mod article;
pub mod browser;
pub mod chrome;
mod config;
pub mod extractor;
pub mod fingerprint;
pub mod metadata;
pub mod queue;
pub mod render;
pub mod retry;
pub mod service;
pub mod waf;

#[cfg(test)]
pub(crate) mod fakes;

pub use browser::{BrowserLease, BrowserManager};
pub use chrome::ChromeLauncher;
pub use config::{ScraperConfig, MAX_WAIT};
pub use extractor::{ExtractionScript, ScriptCall};
pub use fingerprint::FingerprintProfile;
pub use queue::{QueueActivity, QueueError, ScrapeQueue};
pub use render::RenderRunner;
pub use retry::RetryPolicy;
pub use service::ScrapeService;
pub use waf::WafChallengeHandler;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ScrapeStatus;

/// Failure classes of a single scrape attempt
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScrapeError {
    #[error("blocked by anti-bot protection: {0}")]
    Blocked(String),

    #[error("timed out after {0:?} in the scrape queue")]
    QueueTimeout(Duration),

    #[error("extraction failed: {0}")]
    ExtractionFailure(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("browser error: {0}")]
    Browser(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl ScrapeError {
    /// Only transient conditions are worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScrapeError::Blocked(_) | ScrapeError::QueueTimeout(_))
    }

    pub fn status(&self) -> ScrapeStatus {
        match self {
            ScrapeError::Blocked(_) => ScrapeStatus::Blocked,
            _ => ScrapeStatus::Failed,
        }
    }
}

impl From<QueueError> for ScrapeError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Timeout(after) => ScrapeError::QueueTimeout(after),
            QueueError::Aborted(reason) => ScrapeError::Browser(reason),
        }
    }
}

/// Per-context isolation settings
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub profile: FingerprintProfile,
    /// Domains whose requests are refused outright
    pub blocked_domains: Vec<String>,
    /// CDP resource type names (`Image`, `Font`, ...) failed on request
    pub blocked_resource_types: Vec<&'static str>,
}

impl ContextOptions {
    pub fn from_config(config: &ScraperConfig, profile: FingerprintProfile) -> Self {
        Self {
            profile,
            blocked_domains: config.blocked_domains.clone(),
            blocked_resource_types: config.blocked_resource_types(),
        }
    }
}

/// Starts a browser engine
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn BrowserHandle>, ScrapeError>;
}

/// A running browser engine shared by all tasks
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a page inside a fresh, isolated browsing context
    async fn open_context(&self, options: &ContextOptions) -> Result<Box<dyn RemotePage>, ScrapeError>;

    /// False once the engine process or its connection is gone
    fn is_connected(&self) -> bool;

    async fn close(&self);
}

/// One page in its own browsing context, owned by a single task
#[async_trait]
pub trait RemotePage: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), ScrapeError>;

    async fn evaluate(&self, call: &ScriptCall) -> Result<serde_json::Value, ScrapeError>;

    /// HTTP status of the main document, when known
    fn status(&self) -> Option<u16>;

    async fn current_url(&self) -> Option<String>;

    /// Click the first element matching `selector`; false when none matched
    async fn click(&self, selector: &str) -> Result<bool, ScrapeError>;

    /// Hold the pointer down on `selector` for `hold`; false when none matched
    async fn press_and_hold(&self, selector: &str, hold: Duration) -> Result<bool, ScrapeError>;

    /// Close the page and dispose of its context
    async fn close(&self);
}
