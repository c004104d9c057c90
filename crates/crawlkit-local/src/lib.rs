//! Local crawl-core implementations for crawlkit.
//!
//! Everything the pipeline needs on one machine: the URL normalizer, the
//! robots gate, the two-tier cache (SQLite metadata + hash-addressed blobs),
//! the freshness validator, the plain-HTTP fetcher, the scraper/markdown/
//! extraction stages, and the rate-limited memory-adaptive dispatcher. The
//! entry point is [`pipeline::CrawlerCore`].

use std::path::PathBuf;

pub mod cache;
pub mod chunking;
pub mod config;
pub mod content_store;
pub mod deep_crawl;
pub mod dispatcher;
pub mod extraction;
pub mod fetcher;
pub mod fingerprint;
pub mod markdown;
pub mod metadata_store;
pub mod pipeline;
pub mod rate_limit;
pub mod robots;
pub mod scrape;
pub mod urls;
pub mod validator;

pub use config::CrawlerRunConfig;
pub use fetcher::HttpFetcher;
pub use pipeline::CrawlerCore;

/// Environment variable selecting the cache root directory.
pub const BASE_DIRECTORY_ENV: &str = "CRAWL4_AI_BASE_DIRECTORY";

/// Cache root: `$CRAWL4_AI_BASE_DIRECTORY`, else the home directory, else
/// the current directory. The `.crawl4ai/` layout is created beneath it.
pub fn default_base_directory() -> PathBuf {
    if let Some(dir) = std::env::var_os(BASE_DIRECTORY_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    if let Some(home) = std::env::var_os("HOME") {
        if !home.is_empty() {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(".")
}
