//! URL handling shared by the cache, the fetch paths and post-processing.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;
use url::{Host, Url};

/// Query parameters that never change page content
const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "mc_cid", "mc_eid", "igshid", "ref_src"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("cannot parse URL: {0}")]
    Parse(#[from] url::ParseError),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("private or loopback host not allowed: {0}")]
    PrivateHost(String),
}

/// Parse a user-submitted URL and reject targets we must never fetch.
pub fn validate_target(raw: &str, allow_private_hosts: bool) -> Result<Url, LinkError> {
    let url = Url::parse(raw.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(LinkError::UnsupportedScheme(url.scheme().to_string()));
    }

    let host = url.host().ok_or(LinkError::MissingHost)?;
    if !allow_private_hosts && is_private_host(&host) {
        return Err(LinkError::PrivateHost(host.to_string()));
    }

    Ok(url)
}

/// Whether `url` points at a loopback, private or link-local host
pub fn is_private_url(url: &Url) -> bool {
    url.host().is_some_and(|host| is_private_host(&host))
}

fn is_private_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => {
            let domain = domain.to_ascii_lowercase();
            domain == "localhost"
                || domain.ends_with(".localhost")
                || domain.ends_with(".local")
                || domain.ends_with(".internal")
        }
        Host::Ipv4(ip) => is_private_v4(ip),
        Host::Ipv6(ip) => is_private_v6(ip),
    }
}

fn is_private_v4(ip: &Ipv4Addr) -> bool {
    ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.octets()[0] == 0
}

fn is_private_v6(ip: &Ipv6Addr) -> bool {
    if let Some(v4) = ip.to_ipv4_mapped() {
        return is_private_v4(&v4);
    }
    let first = ip.segments()[0];
    ip.is_loopback() || ip.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// Cache key for a URL: no fragment, no tracking parameters, no trailing slash.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);

    let kept: Vec<(String, String)> = normalized
        .query_pairs()
        .filter(|(key, _)| {
            let key = key.to_ascii_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        normalized.set_query(None);
    } else {
        normalized.query_pairs_mut().clear().extend_pairs(kept);
    }

    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }

    normalized.to_string()
}

/// Human-readable title derived from the domain, used when a page yields none.
pub fn fallback_title(url: &Url) -> String {
    match url.host_str() {
        Some(host) => host.strip_prefix("www.").unwrap_or(host).to_string(),
        None => url.to_string(),
    }
}

/// Resolve `href` against `base`, keeping only http(s) results.
pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:") || lower.starts_with("data:") || lower.starts_with("mailto:") {
        return None;
    }

    let resolved = base.join(href).ok()?;
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

/// Default favicon location for a page's origin
pub fn default_favicon(url: &Url) -> Option<String> {
    url.join("/favicon.ico").ok().map(|u| u.to_string())
}
