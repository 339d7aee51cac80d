//! Configuration management for linkpeek.
//!
//! Configuration is read from `~/.config/linkpeek/config.toml` at startup.
//! If the file doesn't exist, a default configuration with comments is created.
//! `LINKPEEK_*` environment variables override file values.

use crate::scraper::ScraperConfig;
use serde::Deserialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration struct.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scraper: ScraperConfig,
    pub cache: CacheConfig,
}

/// Result cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// SQLite file; defaults to `<data_dir>/linkpeek/cache.db`
    pub path: Option<PathBuf>,
    /// Days a cached result stays valid (default: 30)
    pub ttl_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: None,
            ttl_days: 30,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_days.saturating_mul(24 * 60 * 60))
    }
}

impl Config {
    /// Load configuration from the default path, then apply environment overrides.
    ///
    /// If the config file doesn't exist, creates a default one with comments.
    /// If the config file exists but is invalid, returns an error.
    /// Missing fields in the config file will use default values.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::default_config_path()?;

        if !config_path.exists() {
            Self::create_default_config(&config_path)?;
        }

        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse the file at `path` without touching the environment.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Apply `LINKPEEK_*` overrides looked up through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.scraper.apply_env(&lookup).map_err(ConfigError::Env)?;

        if let Some(raw) = lookup("LINKPEEK_CACHE_TTL_DAYS") {
            self.cache.ttl_days = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env(format!("Invalid value for LINKPEEK_CACHE_TTL_DAYS: {:?}", raw)))?;
        }
        if let Some(raw) = lookup("LINKPEEK_CACHE_PATH") {
            self.cache.path = Some(PathBuf::from(raw));
        }

        Ok(())
    }

    /// Get the default config file path: `~/.config/linkpeek/config.toml`
    pub fn default_config_path() -> Result<PathBuf, ConfigError> {
        let config_dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(config_dir.join("linkpeek").join("config.toml"))
    }

    /// Create a default config file with comments.
    fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let mut file = fs::File::create(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        file.write_all(Self::default_config_content().as_bytes())
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;

        Ok(())
    }

    /// Generate the default config file content with comments.
    fn default_config_content() -> String {
        r##"# linkpeek configuration
#
# Every key is optional; removing one restores its default.
# Environment variables (LINKPEEK_MAX_CONCURRENCY, LINKPEEK_HEADLESS, ...)
# take precedence over this file.

[scraper]
headless = true
# chrome_executable = "/usr/bin/chromium"

# Rendering tasks running at once, and their deadline including queue wait
max_concurrency = 4
task_timeout_secs = 60
navigation_timeout_secs = 30

# Browser-less metadata fetch
lightweight_timeout_secs = 8
max_body_bytes = 2097152

wait_after_load_ms = 1000
content_ready_timeout_ms = 8000

# Browser lifecycle
recycle_after_uses = 50
idle_shutdown_secs = 300

# Retries for blocked or timed-out renders; delay grows as (attempt + 1) * base
preview_max_retries = 2
article_max_retries = 1
retry_base_delay_ms = 1000

# Anti-bot challenges
challenge_wait_secs = 15
hold_duration_ms = 8000

block_images = true
block_stylesheets = true
block_fonts = true
block_media = true
# Replaces the built-in tracker/ad denylist when set
# blocked_domains = ["doubleclick.net", "google-analytics.com"]
# Replaces the built-in noise selectors when set
# noise_selectors = ["nav", "footer", ".comments"]

link_density_threshold = 0.5
allow_private_hosts = false
cache_failed_articles = true

[cache]
# path = "/var/tmp/linkpeek.db"
ttl_days = 30
"##
        .to_string()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to read/write config file at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{0}")]
    Env(String),
}
