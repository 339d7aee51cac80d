use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Which extraction a task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Preview,
    Article,
}

impl StrategyKind {
    /// Key used to partition cache entries
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Article => "article",
        }
    }
}

/// One attempt at rendering a URL in the shared browser
#[derive(Debug, Clone)]
pub struct ScrapeTask {
    pub url: Url,
    pub kind: StrategyKind,
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ScrapeTask {
    pub fn new(url: Url, kind: StrategyKind, attempt: u32) -> Self {
        Self {
            url,
            kind,
            attempt,
            enqueued_at: Utc::now(),
        }
    }
}
