//! Rust-side post-processing of isolated article markup.
//!
//! The article script returns the main content as HTML plus every link on
//! the page with its surrounding text. Here the markup is re-serialized with
//! absolute URLs, paragraph anchors and file-host tags, and download links are
//! gathered into a trailing section.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::domain::links::absolutize;
use crate::domain::{ArticleResult, DownloadLink, ScrapeStatus};
use crate::scraper::ScrapeError;

/// Raw result of the article script
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ArticleExtraction {
    pub title: Option<String>,
    pub byline: Option<String>,
    pub site_name: Option<String>,
    pub excerpt: Option<String>,
    pub lang: Option<String>,
    pub content_html: String,
    pub text_content: String,
    pub links: Vec<PageLink>,
}

/// A link found anywhere on the page, before cleaning
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PageLink {
    pub href: String,
    pub text: String,
    /// Text of the enclosing block and its next sibling
    pub context: String,
}

/// Provider name and a pattern over `host + path`
const FILE_HOST_PATTERNS: &[(&str, &str)] = &[
    ("Mega", r"^(?:[\w-]+\.)*mega\.(?:nz|io|co\.nz)/"),
    ("MediaFire", r"^(?:[\w-]+\.)*mediafire\.com/(?:file|folder|download|\?)"),
    ("Google Drive", r"^(?:drive|docs)\.google\.com/(?:file/|uc|drive/folders/|open)"),
    ("Dropbox", r"^(?:[\w-]+\.)*dropbox(?:usercontent)?\.com/(?:s|sh|scl)/"),
    ("OneDrive", r"^(?:onedrive\.live\.com/|1drv\.ms/)"),
    ("pCloud", r"^(?:u\.)?pcloud\.link/"),
    ("GoFile", r"^(?:[\w-]+\.)*gofile\.io/d/"),
    ("Pixeldrain", r"^pixeldrain\.com/[ul]/"),
    ("WeTransfer", r"^(?:wetransfer\.com/downloads/|we\.tl/)"),
    ("1fichier", r"^(?:[\w-]+\.)*1fichier\.com/"),
    ("Rapidgator", r"^(?:[\w-]+\.)*rapidgator\.net/file/"),
    ("TeraBox", r"^(?:[\w-]+\.)*(?:1024)?terabox\.com/s/"),
    ("Baidu Netdisk", r"^pan\.baidu\.com/s/"),
    ("Aliyun Drive", r"^(?:www\.)?(?:aliyundrive|alipan)\.com/s/"),
    ("Quark", r"^pan\.quark\.cn/s/"),
    ("Lanzou", r"^(?:[\w-]+\.)*lanzou[a-z]?\.com/"),
    ("GitHub Release", r"^github\.com/[^/]+/[^/]+/releases/download/"),
];

/// Links to these are unwrapped to plain text
const SOCIAL_HOSTS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "instagram.com",
    "linkedin.com",
    "pinterest.com",
    "tiktok.com",
    "t.me",
    "telegram.me",
    "wa.me",
    "whatsapp.com",
    "vk.com",
    "weibo.com",
    "threads.net",
];

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

const DROPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

const LAZY_SRC_ATTRS: &[&str] = &["data-src", "data-original", "data-lazy-src"];

static FILE_HOST_RULES: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    FILE_HOST_PATTERNS
        .iter()
        .filter_map(|(provider, pattern)| Regex::new(pattern).ok().map(|re| (*provider, re)))
        .collect()
});

static PASSWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:password|passwd|pass|pwd|密码|提取码)\s*[:：]\s*([^\s,;，；]+)").unwrap()
});

/// File-host provider for an absolute URL, if it points at one
pub fn file_host_provider(href: &str) -> Option<&'static str> {
    let url = Url::parse(href).ok()?;
    let target = format!("{}{}", url.host_str()?.to_ascii_lowercase(), url.path());
    let target = match url.query() {
        Some(q) => format!("{}?{}", target, q),
        None => target,
    };
    FILE_HOST_RULES
        .iter()
        .find(|(_, re)| re.is_match(&target))
        .map(|(provider, _)| *provider)
}

fn is_social_link(href: &str) -> bool {
    let Some(host) = Url::parse(href).ok().and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase())) else {
        return false;
    };
    SOCIAL_HOSTS
        .iter()
        .any(|domain| host == *domain || host.ends_with(&format!(".{}", domain)))
}

/// Password stated next to a link, e.g. `Password: hunter2`
pub fn find_password(context: &str) -> Option<String> {
    PASSWORD_RE
        .captures(context)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim_end_matches(['.', ')', '」', '】']).to_string())
        .filter(|p| !p.is_empty())
}

/// `p-` followed by the first 10 hex digits of the SHA-256 of the whitespace-normalized text
pub fn paragraph_id(text: &str) -> String {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let digest = Sha256::digest(normalized.as_bytes());
    format!("p-{}", &hex::encode(digest)[..10])
}

struct Serializer<'a> {
    base: &'a Url,
    out: String,
    seen_ids: HashMap<String, usize>,
}

impl<'a> Serializer<'a> {
    fn new(base: &'a Url) -> Self {
        Self {
            base,
            out: String::new(),
            seen_ids: HashMap::new(),
        }
    }

    fn unique_paragraph_id(&mut self, text: &str) -> String {
        let id = paragraph_id(text);
        let count = self.seen_ids.entry(id.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            id
        } else {
            format!("{}-{}", id, count)
        }
    }

    fn write_children(&mut self, el: ElementRef<'_>) {
        for child in el.children() {
            match child.value() {
                Node::Text(text) => self.out.push_str(&html_escape::encode_text(&**text)),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        self.write_element(el);
                    }
                }
                _ => {}
            }
        }
    }

    fn write_element(&mut self, el: ElementRef<'_>) {
        let name = el.value().name();
        if DROPPED_ELEMENTS.contains(&name) {
            return;
        }

        let mut attrs: Vec<(String, String)> = Vec::new();

        match name {
            "a" => {
                let href = el.value().attr("href").and_then(|h| absolutize(self.base, h));
                let Some(href) = href else {
                    // Anchors without a usable target read as plain text
                    self.write_children(el);
                    return;
                };
                if is_social_link(&href) {
                    self.write_children(el);
                    return;
                }
                if let Some(provider) = file_host_provider(&href) {
                    attrs.push(("data-file-host".into(), provider.into()));
                }
                attrs.push(("href".into(), href));
                self.copy_attrs(el, &mut attrs, &["href"]);
            }
            "img" => {
                let src = LAZY_SRC_ATTRS
                    .iter()
                    .find_map(|a| el.value().attr(a))
                    .or_else(|| el.value().attr("src"))
                    .and_then(|s| absolutize(self.base, s));
                let Some(src) = src else { return };
                attrs.push(("src".into(), src));
                self.copy_attrs(el, &mut attrs, &["src", "srcset", "sizes"]);
            }
            "source" if el.value().attr("srcset").is_some() => return,
            "p" => {
                let text: String = el.text().collect();
                attrs.push(("data-paragraph-id".into(), self.unique_paragraph_id(&text)));
                self.copy_attrs(el, &mut attrs, &[]);
            }
            _ => self.copy_attrs(el, &mut attrs, &[]),
        }

        self.out.push('<');
        self.out.push_str(name);
        for (key, value) in &attrs {
            self.out.push(' ');
            self.out.push_str(key);
            self.out.push_str("=\"");
            self.out.push_str(&html_escape::encode_double_quoted_attribute(value));
            self.out.push('"');
        }
        self.out.push('>');

        if VOID_ELEMENTS.contains(&name) {
            return;
        }

        self.write_children(el);
        self.out.push_str("</");
        self.out.push_str(name);
        self.out.push('>');
    }

    fn copy_attrs(&self, el: ElementRef<'_>, attrs: &mut Vec<(String, String)>, skip: &[&str]) {
        for (key, value) in el.value().attrs() {
            let lower = key.to_ascii_lowercase();
            if skip.contains(&lower.as_str())
                || lower.starts_with("on")
                || lower == "style"
                || lower == "data-paragraph-id"
                || lower == "data-file-host"
                || LAZY_SRC_ATTRS.contains(&lower.as_str())
            {
                continue;
            }
            attrs.push((lower, value.to_string()));
        }
    }
}

/// Re-serialize `content_html` with paragraph ids, absolute URLs and link rewrites
pub fn rewrite_content(content_html: &str, base: &Url) -> String {
    let fragment = Html::parse_fragment(content_html);
    let mut serializer = Serializer::new(base);
    serializer.write_children(fragment.root_element());
    serializer.out
}

/// File-host links from anywhere on the page, de-duplicated by URL
pub fn collect_downloads(links: &[PageLink], base: &Url) -> Vec<DownloadLink> {
    let mut seen = HashSet::new();
    links
        .iter()
        .filter_map(|link| {
            let href = absolutize(base, &link.href)?;
            let provider = file_host_provider(&href)?;
            if !seen.insert(href.clone()) {
                return None;
            }
            let text = link.text.trim();
            Some(DownloadLink {
                text: if text.is_empty() { provider.to_string() } else { text.to_string() },
                provider: provider.to_string(),
                password: find_password(&link.context),
                href,
            })
        })
        .collect()
}

fn download_section(downloads: &[DownloadLink]) -> String {
    let mut html = String::from("<section class=\"article-downloads\"><h2>Downloads</h2><ul>");
    for link in downloads {
        html.push_str(&format!(
            "<li><a href=\"{}\" data-file-host=\"{}\" rel=\"noopener noreferrer\">{}</a>",
            html_escape::encode_double_quoted_attribute(&link.href),
            html_escape::encode_double_quoted_attribute(&link.provider),
            html_escape::encode_text(&link.text),
        ));
        if let Some(password) = &link.password {
            html.push_str(&format!(
                " <span class=\"download-password\">Password: <code>{}</code></span>",
                html_escape::encode_text(password)
            ));
        }
        html.push_str("</li>");
    }
    html.push_str("</ul></section>");
    html
}

/// Turn a script extraction into the final article, or fail when it has no title
pub fn postprocess(extraction: ArticleExtraction, page_url: &Url) -> Result<ArticleResult, ScrapeError> {
    let title = extraction
        .title
        .as_deref()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ScrapeError::ExtractionFailure("article has no title".to_string()))?;

    let mut content = rewrite_content(&extraction.content_html, page_url);
    let downloads = collect_downloads(&extraction.links, page_url);
    if !downloads.is_empty() {
        content.push_str(&download_section(&downloads));
    }

    let text_content = if extraction.text_content.trim().is_empty() {
        Html::parse_fragment(&content)
            .root_element()
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    } else {
        extraction.text_content.trim().to_string()
    };

    let non_blank = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());

    Ok(ArticleResult {
        url: page_url.to_string(),
        title,
        byline: non_blank(extraction.byline),
        content,
        text_content,
        site_name: non_blank(extraction.site_name),
        excerpt: non_blank(extraction.excerpt),
        lang: non_blank(extraction.lang),
        downloads,
        status: ScrapeStatus::Success,
        error: None,
    })
}
