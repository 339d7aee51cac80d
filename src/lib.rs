//! # linkpeek
//!
//! Link previews and reader-mode articles for arbitrary URLs, backed by a
//! shared headless browser when a plain HTTP fetch is not enough.
//!
//! ## Architecture
//!
//! ```text
//! ScrapeService → ContentCache
//!               → HttpFetcher (static metadata)
//!               → RetryPolicy → ScrapeQueue → RenderRunner → BrowserManager → Chrome
//!                                                          → WafChallengeHandler
//!                                                          → extraction scripts
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! # Preview one or more links
//! linkpeek preview https://blog.rust-lang.org/
//!
//! # Reader-mode article as plain text
//! linkpeek read https://example.com/post --text
//!
//! # Drop expired cache entries
//! linkpeek cache purge
//! ```

/// Application context and error handling.
///
/// The [`AppContext`](app::AppContext) struct wires together all components:
/// store, cache, fetcher, queue, browser manager and service.
pub mod app;

/// Command-line interface using clap.
///
/// - `preview <url>...` - Link previews as JSON
/// - `read <url> [--text]` - Reader-mode article
/// - `cache purge|stats` - Cache maintenance
pub mod cli;

/// Configuration loaded from `~/.config/linkpeek/config.toml` plus
/// `LINKPEEK_*` environment overrides.
pub mod config;

/// Result types shared by every layer: previews, articles, statuses, tasks.
pub mod domain;

/// Browser-less HTTP fetching.
///
/// - [`Fetcher`](fetcher::Fetcher): Async trait for page fetching
/// - [`HttpFetcher`](fetcher::http_fetcher::HttpFetcher): reqwest-based implementation
pub mod fetcher;

/// Scrape orchestration: queue, browser lifecycle, challenge handling,
/// extraction and retry.
///
/// - [`ScrapeService`](scraper::ScrapeService): `get_preview` / `get_reader_content`
/// - [`BrowserManager`](scraper::BrowserManager): Shared browser with idle shutdown
/// - [`ScrapeQueue`](scraper::ScrapeQueue): Bounded-concurrency task queue
pub mod scraper;

/// SQLite persistence for cached results.
///
/// - [`ContentCache`](store::ContentCache): TTL-aware cache over a store
/// - [`SqliteStore`](store::SqliteStore): SQLite implementation
pub mod store;
