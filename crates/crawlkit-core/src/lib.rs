//! Backend-agnostic types and traits for the crawlkit crawl core.
//!
//! This crate intentionally contains no IO. It defines the error kinds, the
//! data model flowing through the pipeline (`FetchResponse`, `CrawlResult`),
//! the per-fetch option set, and the `Fetcher` trait that concrete backends
//! (plain HTTP, browser automation) implement in other crates.

use std::collections::BTreeMap;
use std::sync::Arc;

pub mod config;
pub mod models;

pub use config::{CacheMode, FetchOptions};
pub use models::{
    CrawlResult, FetchResponse, Link, Links, MarkdownResult, Media, MediaItem, MediaKind,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid selector: {0}")]
    InvalidSelector(String),
    #[error("denied by robots.txt: {0}")]
    RobotsDenied(String),
    #[error("fetch timed out: {0}")]
    FetchTimeout(String),
    #[error("network error: {0}")]
    FetchNetwork(String),
    #[error("http status {status} for {url}")]
    FetchHttp { status: u16, url: String },
    #[error("tls error: {0}")]
    FetchSsl(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("parse error: {0}")]
    Parse(String),
    #[error("extraction failed: {0}")]
    Extraction(String),
    #[error("cache io: {0}")]
    CacheIo(String),
    #[error("validator error: {0}")]
    Validator(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// HTTP status carried by the error, when the failure was an HTTP response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::FetchHttp { status, .. } => Some(*status),
            Error::RobotsDenied(_) => Some(403),
            _ => None,
        }
    }
}

/// Callback invoked just before a request is sent. Receives the URL and the
/// mutable outgoing header map.
pub type BeforeRequestHook = Arc<dyn Fn(&str, &mut BTreeMap<String, String>) + Send + Sync>;

/// Callback invoked after a response has been fully materialized.
pub type AfterResponseHook = Arc<dyn Fn(&FetchResponse) + Send + Sync>;

/// A hook registration for a [`Fetcher`].
#[derive(Clone)]
pub enum FetchHook {
    BeforeRequest(BeforeRequestHook),
    AfterResponse(AfterResponseHook),
}

impl std::fmt::Debug for FetchHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchHook::BeforeRequest(_) => f.write_str("FetchHook::BeforeRequest"),
            FetchHook::AfterResponse(_) => f.write_str("FetchHook::AfterResponse"),
        }
    }
}

/// A pluggable page fetcher.
///
/// Implementations produce a [`FetchResponse`] for a URL. The crawl pipeline
/// never cares how the bytes were obtained: a plain HTTP client and a full
/// browser-automation backend both satisfy this trait.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str, opts: &FetchOptions) -> Result<FetchResponse>;

    /// Sequential fallback; concurrent backends override this.
    async fn fetch_many(&self, urls: &[String], opts: &FetchOptions) -> Vec<Result<FetchResponse>> {
        let mut out = Vec::with_capacity(urls.len());
        for url in urls {
            out.push(self.fetch(url, opts).await);
        }
        out
    }

    fn set_hook(&self, hook: FetchHook);

    fn update_user_agent(&self, user_agent: &str);

    /// Release any held resources (connections, browser contexts).
    async fn close(&self) {}
}
