pub mod http_fetcher;

use async_trait::async_trait;
use url::Url;

use crate::app::Result;

/// A page retrieved without a browser
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL after redirects
    pub final_url: Url,
    pub status: u16,
    pub content_type: Option<String>,
    /// Decoded body, cut at the configured size limit; empty for non-text responses
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim().to_ascii_lowercase().starts_with("image/"))
    }

    pub fn is_html(&self) -> bool {
        match self.content_type.as_deref() {
            Some(ct) => {
                let ct = ct.to_ascii_lowercase();
                ct.contains("html") || ct.contains("xml")
            }
            // Servers that omit the header are usually serving HTML
            None => true,
        }
    }
}

#[async_trait]
pub trait Fetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage>;
}
