use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use encoding_rs::{Encoding, UTF_8};
use regex::Regex;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, USER_AGENT};
use reqwest::{redirect, Client};
use tracing::debug;
use url::Url;

use crate::app::Result;
use crate::domain::links::is_private_url;
use crate::fetcher::{FetchedPage, Fetcher};
use crate::scraper::{FingerprintProfile, ScraperConfig};

const MAX_REDIRECTS: usize = 5;

/// Bytes searched for a `<meta charset>` when the header names none
const CHARSET_SNIFF_BYTES: usize = 1024;

static META_CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?([a-z0-9_:.\-]+)"#).unwrap()
});

/// Browser-less GET used for cheap metadata extraction
pub struct HttpFetcher {
    client: Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &ScraperConfig) -> Result<Self> {
        Self::with_limits(
            config.lightweight_timeout(),
            config.max_body_bytes,
            config.allow_private_hosts,
        )
    }

    pub fn with_limits(timeout: Duration, max_body_bytes: usize, allow_private_hosts: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .gzip(true)
            .brotli(true)
            .redirect(redirect::Policy::custom(move |attempt| {
                let refusal = refuse_redirect(attempt.url(), attempt.previous().len(), allow_private_hosts);
                match refusal {
                    Some(reason) => attempt.error(reason),
                    None => attempt.follow(),
                }
            }))
            .build()?;

        Ok(Self {
            client,
            max_body_bytes,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage> {
        let profile = FingerprintProfile::random();

        let mut response = self
            .client
            .get(url.clone())
            .header(USER_AGENT, profile.user_agent.as_str())
            .header(ACCEPT_LANGUAGE, profile.accept_language())
            .header(ACCEPT, "text/html,application/xhtml+xml,application/xml;q=0.9,image/*;q=0.8,*/*;q=0.7")
            .send()
            .await?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        let mut page = FetchedPage {
            final_url,
            status,
            content_type,
            body: String::new(),
        };

        if !page.is_html() {
            debug!("Skipping body of {} ({:?})", url, page.content_type);
            return Ok(page);
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            let room = self.max_body_bytes.saturating_sub(body.len());
            if chunk.len() >= room {
                body.extend_from_slice(&chunk[..room]);
                debug!("Body of {} cut at {} bytes", url, self.max_body_bytes);
                break;
            }
            body.extend_from_slice(&chunk);
        }

        page.body = decode_body(&body, page.content_type.as_deref());
        Ok(page)
    }
}

/// Why the redirect to `next` must not be followed, after `hops` earlier ones
fn refuse_redirect(next: &Url, hops: usize, allow_private_hosts: bool) -> Option<String> {
    if hops >= MAX_REDIRECTS {
        return Some(format!("more than {} redirects", MAX_REDIRECTS));
    }
    if !allow_private_hosts && is_private_url(next) {
        return Some(format!(
            "redirect to private host {}",
            next.host_str().unwrap_or_default()
        ));
    }
    None
}

/// Decode with the header charset, else an early `<meta charset>`, else UTF-8
fn decode_body(body: &[u8], content_type: Option<&str>) -> String {
    let encoding = content_type
        .and_then(charset_param)
        .or_else(|| sniff_meta_charset(body))
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .unwrap_or(UTF_8);

    let (text, used, malformed) = encoding.decode(body);
    if malformed {
        debug!("Body has malformed {} sequences", used.name());
    }
    text.into_owned()
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches('"').to_string())
    })
}

fn sniff_meta_charset(body: &[u8]) -> Option<String> {
    let head = String::from_utf8_lossy(&body[..body.len().min(CHARSET_SNIFF_BYTES)]);
    META_CHARSET_RE
        .captures(&head)
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(max_body_bytes: usize) -> HttpFetcher {
        HttpFetcher::with_limits(Duration::from_secs(5), max_body_bytes, true).unwrap()
    }

    #[test]
    fn test_redirect_rules() {
        let public = Url::parse("https://example.org/next").unwrap();
        let metadata = Url::parse("http://169.254.169.254/latest/meta-data").unwrap();

        assert_eq!(refuse_redirect(&public, 0, false), None);
        assert!(refuse_redirect(&metadata, 0, false).unwrap().contains("169.254.169.254"));
        assert_eq!(refuse_redirect(&metadata, 0, true), None);
        assert!(refuse_redirect(&public, MAX_REDIRECTS, true).is_some());
    }

    #[test]
    fn test_charset_from_header_and_meta() {
        assert_eq!(charset_param("text/html; charset=\"Shift_JIS\""), Some("Shift_JIS".into()));
        assert_eq!(charset_param("text/html"), None);

        // "café" in windows-1252, declared only in the markup
        let body = b"<html><head><meta charset=\"windows-1252\"><title>caf\xe9</title></head></html>";
        assert_eq!(sniff_meta_charset(body), Some("windows-1252".into()));
        assert!(decode_body(body, Some("text/html")).contains("<title>café</title>"));
    }

    #[tokio::test]
    async fn test_decodes_declared_charset() {
        let server = MockServer::start().await;
        let mut body = b"<html><title>".to_vec();
        // "日本語" in Shift_JIS
        body.extend_from_slice(&[0x93, 0xfa, 0x96, 0x7b, 0x8c, 0xea]);
        body.extend_from_slice(b"</title></html>");
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/html; charset=Shift_JIS"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let page = fetcher(1024).fetch(&url).await.unwrap();

        assert!(page.body.contains("<title>日本語</title>"));
    }

    #[tokio::test]
    async fn test_redirect_to_private_host_is_refused() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/hop"))
            .respond_with(ResponseTemplate::new(302).insert_header("location", format!("{}/admin", server.uri())))
            .mount(&server)
            .await;

        let guarded = HttpFetcher::with_limits(Duration::from_secs(5), 1024, false).unwrap();
        let url = Url::parse(&format!("{}/hop", server.uri())).unwrap();

        assert!(guarded.fetch(&url).await.is_err());
    }

    #[tokio::test]
    async fn test_fetches_html_with_browser_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/post"))
            .and(header_exists("user-agent"))
            .and(header_exists("accept-language"))
            .respond_with(
                ResponseTemplate::new(200).set_body_raw("<html><title>Hi</title></html>", "text/html; charset=utf-8"),
            )
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/post", server.uri())).unwrap();
        let page = fetcher(1024).fetch(&url).await.unwrap();

        assert_eq!(page.status, 200);
        assert!(page.is_success());
        assert!(page.body.contains("<title>Hi</title>"));
    }

    #[tokio::test]
    async fn test_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("location", format!("{}/new", server.uri())))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("<p>moved</p>", "text/html"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/old", server.uri())).unwrap();
        let page = fetcher(1024).fetch(&url).await.unwrap();

        assert_eq!(page.final_url.path(), "/new");
        assert_eq!(page.body, "<p>moved</p>");
    }

    #[tokio::test]
    async fn test_body_is_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw("x".repeat(10_000), "text/html"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let page = fetcher(100).fetch(&url).await.unwrap();

        assert_eq!(page.body.len(), 100);
    }

    #[tokio::test]
    async fn test_image_body_is_not_read() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(vec![0x89, 0x50, 0x4e, 0x47], "image/png"))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/photo.png", server.uri())).unwrap();
        let page = fetcher(1024).fetch(&url).await.unwrap();

        assert!(page.is_image());
        assert!(page.body.is_empty());
    }

    #[tokio::test]
    async fn test_error_status_is_reported_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_raw("denied", "text/html"))
            .mount(&server)
            .await;

        let url = Url::parse(&server.uri()).unwrap();
        let page = fetcher(1024).fetch(&url).await.unwrap();

        assert_eq!(page.status, 403);
        assert!(!page.is_success());
    }
}
