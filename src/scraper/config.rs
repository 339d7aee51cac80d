use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::domain::StrategyKind;
use crate::scraper::retry::RetryPolicy;

/// Longest wait any setting can produce; larger values are clamped so deadlines stay representable
pub const MAX_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

fn secs(value: u64) -> Duration {
    Duration::from_secs(value).min(MAX_WAIT)
}

fn millis(value: u64) -> Duration {
    Duration::from_millis(value).min(MAX_WAIT)
}

/// Configuration for the scrape engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// Whether to run the browser in headless mode (default: true)
    pub headless: bool,

    /// Explicit Chrome/Chromium binary; auto-detected when unset
    pub chrome_executable: Option<PathBuf>,

    /// Maximum concurrently rendering tasks (default: 4)
    pub max_concurrency: usize,

    /// Deadline for a queued render task, waiting included, in seconds (default: 60)
    pub task_timeout_secs: u64,

    /// Page navigation timeout in seconds (default: 30)
    pub navigation_timeout_secs: u64,

    /// Timeout for the browser-less metadata fetch in seconds (default: 8)
    pub lightweight_timeout_secs: u64,

    /// Largest response body the lightweight fetch will read (default: 2 MiB)
    pub max_body_bytes: usize,

    /// Wait time after page load for dynamic content in milliseconds (default: 1000)
    pub wait_after_load_ms: u64,

    /// How long to wait for article markup to appear in milliseconds (default: 8000)
    pub content_ready_timeout_ms: u64,

    /// Browser uses before it is recycled at the next idle moment (default: 50)
    pub recycle_after_uses: u64,

    /// Idle seconds before the browser is shut down (default: 300)
    pub idle_shutdown_secs: u64,

    /// Retries for escalated preview renders (default: 2)
    pub preview_max_retries: u32,

    /// Retries for article renders (default: 1)
    pub article_max_retries: u32,

    /// Backoff unit between retries in milliseconds (default: 1000)
    pub retry_base_delay_ms: u64,

    /// Upper bound on waiting for a challenge page to clear, in seconds (default: 15)
    pub challenge_wait_secs: u64,

    /// Pointer hold time for press-and-hold challenges in milliseconds (default: 8000)
    pub hold_duration_ms: u64,

    /// Block images for faster loading (default: true)
    pub block_images: bool,

    /// Block stylesheets for faster loading (default: true)
    pub block_stylesheets: bool,

    /// Block web fonts (default: true)
    pub block_fonts: bool,

    /// Block audio/video (default: true)
    pub block_media: bool,

    /// Tracker and ad domains never loaded by rendered pages
    pub blocked_domains: Vec<String>,

    /// CSS selectors for elements removed before article isolation
    pub noise_selectors: Vec<String>,

    /// Anchor-text ratio above which related-content blocks are dropped (default: 0.5)
    pub link_density_threshold: f64,

    /// Allow loopback/private hosts as targets (default: false)
    pub allow_private_hosts: bool,

    /// Cache failed article extractions to avoid repeating expensive renders (default: true)
    pub cache_failed_articles: bool,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        Self {
            headless: true,
            chrome_executable: None,
            max_concurrency: 4,
            task_timeout_secs: 60,
            navigation_timeout_secs: 30,
            lightweight_timeout_secs: 8,
            max_body_bytes: 2 * 1024 * 1024,
            wait_after_load_ms: 1000,
            content_ready_timeout_ms: 8000,
            recycle_after_uses: 50,
            idle_shutdown_secs: 300,
            preview_max_retries: 2,
            article_max_retries: 1,
            retry_base_delay_ms: 1000,
            challenge_wait_secs: 15,
            hold_duration_ms: 8000,
            block_images: true,
            block_stylesheets: true,
            block_fonts: true,
            block_media: true,
            blocked_domains: [
                "googletagmanager.com",
                "google-analytics.com",
                "doubleclick.net",
                "googlesyndication.com",
                "googleadservices.com",
                "connect.facebook.net",
                "amazon-adsystem.com",
                "adnxs.com",
                "criteo.com",
                "taboola.com",
                "outbrain.com",
                "scorecardresearch.com",
                "quantserve.com",
                "hotjar.com",
                "clarity.ms",
                "segment.io",
                "cdn.segment.com",
                "nr-data.net",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            noise_selectors: [
                "nav",
                "header",
                "footer",
                "aside",
                "script",
                "style",
                "noscript",
                "iframe",
                "form",
                ".sidebar",
                ".advertisement",
                ".ad",
                ".ads",
                "[id^=\"ad-\"]",
                "[class*=\"sponsor\"]",
                ".related-posts",
                ".related",
                ".recommended",
                ".comments",
                "#comments",
                ".comment-list",
                ".social-share",
                ".share-buttons",
                ".sharedaddy",
                ".newsletter",
                "[role=\"navigation\"]",
                "[aria-label=\"breadcrumb\"]",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            link_density_threshold: 0.5,
            allow_private_hosts: false,
            cache_failed_articles: true,
        }
    }
}

impl ScraperConfig {
    pub fn task_timeout(&self) -> Duration {
        secs(self.task_timeout_secs)
    }

    /// Get the page load timeout as a Duration
    pub fn navigation_timeout(&self) -> Duration {
        secs(self.navigation_timeout_secs)
    }

    pub fn lightweight_timeout(&self) -> Duration {
        secs(self.lightweight_timeout_secs)
    }

    /// Get the wait time after load as a Duration
    pub fn wait_after_load(&self) -> Duration {
        millis(self.wait_after_load_ms)
    }

    pub fn content_ready_timeout(&self) -> Duration {
        millis(self.content_ready_timeout_ms)
    }

    pub fn idle_shutdown(&self) -> Duration {
        secs(self.idle_shutdown_secs)
    }

    pub fn challenge_wait(&self) -> Duration {
        secs(self.challenge_wait_secs)
    }

    pub fn hold_duration(&self) -> Duration {
        millis(self.hold_duration_ms)
    }

    /// Retry policy for a strategy kind
    pub fn retry_policy(&self, kind: StrategyKind) -> RetryPolicy {
        let max_retries = match kind {
            StrategyKind::Preview => self.preview_max_retries,
            StrategyKind::Article => self.article_max_retries,
        };
        RetryPolicy::new(max_retries, millis(self.retry_base_delay_ms))
    }

    /// Resource types kept out of rendered pages, as CDP resource type names
    pub fn blocked_resource_types(&self) -> Vec<&'static str> {
        [
            self.block_images.then_some("Image"),
            self.block_stylesheets.then_some("Stylesheet"),
            self.block_fonts.then_some("Font"),
            self.block_media.then_some("Media"),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Apply `LINKPEEK_*` overrides through `lookup`, which maps a variable name to its value.
    ///
    /// Unparseable values are reported rather than silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, String> {
            raw.trim()
                .parse::<T>()
                .map_err(|_| format!("Invalid value for {}: {:?}", key, raw))
        }

        macro_rules! env_override {
            ($field:ident, $key:literal) => {
                if let Some(raw) = lookup($key) {
                    self.$field = parse($key, raw)?;
                }
            };
        }

        env_override!(headless, "LINKPEEK_HEADLESS");
        env_override!(max_concurrency, "LINKPEEK_MAX_CONCURRENCY");
        env_override!(task_timeout_secs, "LINKPEEK_TASK_TIMEOUT_SECS");
        env_override!(navigation_timeout_secs, "LINKPEEK_NAVIGATION_TIMEOUT_SECS");
        env_override!(lightweight_timeout_secs, "LINKPEEK_LIGHTWEIGHT_TIMEOUT_SECS");
        env_override!(recycle_after_uses, "LINKPEEK_RECYCLE_AFTER_USES");
        env_override!(idle_shutdown_secs, "LINKPEEK_IDLE_SHUTDOWN_SECS");
        env_override!(preview_max_retries, "LINKPEEK_PREVIEW_MAX_RETRIES");
        env_override!(article_max_retries, "LINKPEEK_ARTICLE_MAX_RETRIES");
        env_override!(retry_base_delay_ms, "LINKPEEK_RETRY_BASE_DELAY_MS");
        env_override!(allow_private_hosts, "LINKPEEK_ALLOW_PRIVATE_HOSTS");

        if let Some(path) = lookup("LINKPEEK_CHROME") {
            self.chrome_executable = Some(PathBuf::from(path));
        }

        if self.max_concurrency == 0 {
            return Err("max_concurrency must be at least 1".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_values() {
        let config = ScraperConfig::default();
        assert!(config.headless);
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.task_timeout_secs, 60);
        assert_eq!(config.recycle_after_uses, 50);
        assert_eq!(config.idle_shutdown_secs, 300);
        assert_eq!(config.preview_max_retries, 2);
        assert_eq!(config.article_max_retries, 1);
        assert!(!config.allow_private_hosts);
        assert!(!config.blocked_domains.is_empty());
        assert!(!config.noise_selectors.is_empty());
    }

    #[test]
    fn test_durations() {
        let config = ScraperConfig::default();
        assert_eq!(config.task_timeout(), Duration::from_secs(60));
        assert_eq!(config.wait_after_load(), Duration::from_millis(1000));
        assert_eq!(config.idle_shutdown(), Duration::from_secs(300));
        assert_eq!(config.hold_duration(), Duration::from_millis(8000));
    }

    #[test]
    fn test_huge_durations_are_clamped() {
        let mut config = ScraperConfig::default();
        config
            .apply_env(|key| (key == "LINKPEEK_TASK_TIMEOUT_SECS").then(|| u64::MAX.to_string()))
            .unwrap();
        config.hold_duration_ms = u64::MAX;
        config.retry_base_delay_ms = u64::MAX;

        assert_eq!(config.task_timeout(), MAX_WAIT);
        assert_eq!(config.hold_duration(), MAX_WAIT);
        // Deadlines built from the clamped values no longer overflow
        let _deadline = tokio::time::Instant::now() + config.task_timeout();
        assert_eq!(config.retry_policy(StrategyKind::Preview).delay_for(0), MAX_WAIT);
    }

    #[test]
    fn test_retry_policy_per_kind() {
        let config = ScraperConfig::default();
        assert_eq!(config.retry_policy(StrategyKind::Preview).max_retries(), 2);
        assert_eq!(config.retry_policy(StrategyKind::Article).max_retries(), 1);
    }

    #[test]
    fn test_blocked_resource_types() {
        let mut config = ScraperConfig::default();
        assert_eq!(
            config.blocked_resource_types(),
            vec!["Image", "Stylesheet", "Font", "Media"]
        );

        config.block_images = false;
        config.block_media = false;
        assert_eq!(config.blocked_resource_types(), vec!["Stylesheet", "Font"]);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("LINKPEEK_MAX_CONCURRENCY", "8"),
            ("LINKPEEK_HEADLESS", "false"),
            ("LINKPEEK_RETRY_BASE_DELAY_MS", " 250 "),
            ("LINKPEEK_CHROME", "/opt/chrome/chrome"),
        ]
        .into_iter()
        .collect();

        let mut config = ScraperConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.max_concurrency, 8);
        assert!(!config.headless);
        assert_eq!(config.retry_base_delay_ms, 250);
        assert_eq!(config.chrome_executable, Some(PathBuf::from("/opt/chrome/chrome")));
        // Untouched values keep their defaults
        assert_eq!(config.task_timeout_secs, 60);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = ScraperConfig::default();
        let err = config
            .apply_env(|key| (key == "LINKPEEK_MAX_CONCURRENCY").then(|| "many".to_string()))
            .unwrap_err();
        assert!(err.contains("LINKPEEK_MAX_CONCURRENCY"));
    }

    #[test]
    fn test_env_override_rejects_zero_concurrency() {
        let mut config = ScraperConfig::default();
        assert!(config
            .apply_env(|key| (key == "LINKPEEK_MAX_CONCURRENCY").then(|| "0".to_string()))
            .is_err());
    }
}
