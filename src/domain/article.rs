use serde::{Deserialize, Serialize};

use crate::domain::ScrapeStatus;

/// A file-download link found anywhere on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadLink {
    pub href: String,
    pub text: String,
    pub provider: String,
    pub password: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleResult {
    pub url: String,
    pub title: String,
    pub byline: Option<String>,
    /// Isolated article markup, post-processed
    pub content: String,
    pub text_content: String,
    pub site_name: Option<String>,
    pub excerpt: Option<String>,
    pub lang: Option<String>,
    #[serde(default)]
    pub downloads: Vec<DownloadLink>,
    pub status: ScrapeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArticleResult {
    pub fn unsuccessful(url: &str, title: String, status: ScrapeStatus, error: String) -> Self {
        Self {
            url: url.to_string(),
            title,
            byline: None,
            content: String::new(),
            text_content: String::new(),
            site_name: None,
            excerpt: None,
            lang: None,
            downloads: Vec::new(),
            status,
            error: Some(error),
        }
    }
}
