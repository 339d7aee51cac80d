//! Preview metadata: raw page facts and the rules that turn them into fields.
//!
//! Both fetch paths produce a [`RawMetadata`]: the rendered path from the
//! preview script, the lightweight path from static HTML via
//! [`collect_from_html`]. [`PageMetadata::from_raw`] applies [`FIELD_RULES`]
//! so the two paths never disagree on precedence.

use scraper::{Html, Selector};
use serde::Deserialize;
use url::Url;

use crate::domain::links::{absolutize, default_favicon, fallback_title};
use crate::domain::{PreviewResult, ScrapeStatus};

use Source::*;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetaTag {
    pub name: Option<String>,
    pub property: Option<String>,
    pub itemprop: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct IconLink {
    pub rel: String,
    pub href: String,
    pub sizes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawMetadata {
    /// Resolved document URL
    pub url: Option<String>,
    pub title: Option<String>,
    pub h1: Option<String>,
    pub metas: Vec<MetaTag>,
    pub icons: Vec<IconLink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Description,
    Image,
    Favicon,
    Author,
    SiteName,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A `<meta>` whose name, property or itemprop equals the key (case-insensitive)
    Meta(&'static str),
    DocumentTitle,
    FirstHeading,
    /// `<link rel=...>` whose rel list contains the value
    Icon(&'static str),
}

/// Candidate sources per field, highest priority first
pub const FIELD_RULES: &[(Field, &[Source])] = &[
    (
        Field::Title,
        &[
            Meta("og:title"),
            Meta("twitter:title"),
            DocumentTitle,
            Meta("title"),
            FirstHeading,
        ],
    ),
    (
        Field::Description,
        &[
            Meta("og:description"),
            Meta("twitter:description"),
            Meta("description"),
        ],
    ),
    (
        Field::Image,
        &[
            Meta("og:image"),
            Meta("og:image:url"),
            Meta("og:image:secure_url"),
            Meta("twitter:image"),
            Meta("twitter:image:src"),
            Meta("image"),
            Meta("thumbnailurl"),
        ],
    ),
    (
        Field::Favicon,
        &[Icon("icon"), Icon("shortcut"), Icon("apple-touch-icon")],
    ),
    (
        Field::Author,
        &[
            Meta("author"),
            Meta("article:author"),
            Meta("twitter:creator"),
        ],
    ),
    (
        Field::SiteName,
        &[
            Meta("og:site_name"),
            Meta("application-name"),
            Meta("twitter:site"),
        ],
    ),
];

impl RawMetadata {
    fn meta(&self, key: &str) -> Option<&str> {
        self.metas.iter().find_map(|m| {
            let named = [&m.property, &m.name, &m.itemprop]
                .into_iter()
                .flatten()
                .any(|k| k.trim().eq_ignore_ascii_case(key));
            named.then(|| m.content.as_deref()).flatten()
        })
    }

    /// The icon with the largest declared size among those whose rel contains `rel`
    fn icon(&self, rel: &str) -> Option<&str> {
        self.icons
            .iter()
            .filter(|i| {
                i.rel
                    .split_ascii_whitespace()
                    .any(|r| r.eq_ignore_ascii_case(rel))
            })
            .max_by_key(|i| icon_size(i.sizes.as_deref()))
            .map(|i| i.href.as_str())
    }

    fn value(&self, source: Source) -> Option<&str> {
        match source {
            Meta(key) => self.meta(key),
            DocumentTitle => self.title.as_deref(),
            FirstHeading => self.h1.as_deref(),
            Icon(rel) => self.icon(rel),
        }
    }

    /// Highest-priority non-blank value for `field`
    pub fn resolve(&self, field: Field) -> Option<String> {
        let sources = FIELD_RULES
            .iter()
            .find(|(f, _)| *f == field)
            .map(|(_, sources)| *sources)?;

        sources
            .iter()
            .filter_map(|source| self.value(*source))
            .map(collapse_whitespace)
            .find(|v| !v.is_empty())
    }
}

/// Largest edge of a `sizes` value like `32x32 64x64`; `any` counts as huge
fn icon_size(sizes: Option<&str>) -> u32 {
    let Some(sizes) = sizes else { return 0 };
    sizes
        .split_ascii_whitespace()
        .map(|s| {
            if s.eq_ignore_ascii_case("any") {
                return u32::MAX;
            }
            s.split(['x', 'X'])
                .next()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0)
        })
        .max()
        .unwrap_or(0)
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Preview fields after the rules are applied
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub favicon: Option<String>,
    pub author: Option<String>,
    pub site_name: Option<String>,
}

impl PageMetadata {
    /// Apply the field rules, resolving image and favicon against the page URL
    pub fn from_raw(raw: &RawMetadata, fallback_base: &Url) -> Self {
        let base = raw
            .url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .unwrap_or_else(|| fallback_base.clone());

        Self {
            title: raw.resolve(Field::Title),
            description: raw.resolve(Field::Description),
            image: raw
                .resolve(Field::Image)
                .and_then(|src| absolutize(&base, &src)),
            favicon: raw
                .resolve(Field::Favicon)
                .and_then(|src| absolutize(&base, &src)),
            author: raw.resolve(Field::Author),
            site_name: raw.resolve(Field::SiteName),
        }
    }

    /// Good enough to skip rendering: a title plus an image or a description
    pub fn is_sufficient(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
            && (self.image.is_some() || self.description.is_some())
    }

    pub fn has_title(&self) -> bool {
        self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// Successful preview with missing title and favicon filled in from `page_url`
    pub fn into_preview(self, page_url: &Url) -> PreviewResult {
        PreviewResult {
            url: page_url.to_string(),
            title: self
                .title
                .filter(|t| !t.trim().is_empty())
                .unwrap_or_else(|| fallback_title(page_url)),
            description: self.description,
            image: self.image,
            favicon: self.favicon.or_else(|| default_favicon(page_url)),
            author: self.author,
            site_name: self.site_name,
            status: ScrapeStatus::Success,
            error: None,
        }
    }
}

/// Build [`RawMetadata`] from static HTML
pub fn collect_from_html(html: &str, url: &Url) -> RawMetadata {
    let document = Html::parse_document(html);

    let mut raw = RawMetadata {
        url: Some(url.to_string()),
        ..Default::default()
    };

    if let Ok(selector) = Selector::parse("base[href]") {
        if let Some(base) = document
            .select(&selector)
            .next()
            .and_then(|el| el.value().attr("href"))
            .and_then(|href| url.join(href).ok())
        {
            raw.url = Some(base.to_string());
        }
    }

    if let Ok(selector) = Selector::parse("title") {
        raw.title = document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
    }

    if let Ok(selector) = Selector::parse("h1") {
        raw.h1 = document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
    }

    if let Ok(selector) = Selector::parse("meta[content]") {
        raw.metas = document
            .select(&selector)
            .map(|el| {
                let attr = |name: &str| el.value().attr(name).map(|v| v.to_string());
                MetaTag {
                    name: attr("name"),
                    property: attr("property"),
                    itemprop: attr("itemprop"),
                    content: attr("content"),
                }
            })
            .collect();
    }

    if let Ok(selector) = Selector::parse("link[rel][href]") {
        raw.icons = document
            .select(&selector)
            .filter_map(|el| {
                let rel = el.value().attr("rel")?;
                if !rel.to_ascii_lowercase().contains("icon") {
                    return None;
                }
                Some(IconLink {
                    rel: rel.to_string(),
                    href: el.value().attr("href")?.to_string(),
                    sizes: el.value().attr("sizes").map(|s| s.to_string()),
                })
            })
            .collect();
    }

    raw
}
