use serde::{Deserialize, Serialize};

use crate::domain::ScrapeStatus;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResult {
    pub url: String,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub favicon: Option<String>,
    pub author: Option<String>,
    pub site_name: Option<String>,
    pub status: ScrapeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PreviewResult {
    /// A result carrying only a fallback title and a non-success status
    pub fn unsuccessful(url: &str, title: String, status: ScrapeStatus, error: String) -> Self {
        Self {
            url: url.to_string(),
            title,
            description: None,
            image: None,
            favicon: None,
            author: None,
            site_name: None,
            status,
            error: Some(error),
        }
    }
}
