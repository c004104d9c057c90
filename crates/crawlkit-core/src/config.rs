//! Cache policy and per-fetch options shared by all backends.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Caching behavior for a crawl run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Read and write.
    #[default]
    Enabled,
    /// No caching at all.
    Disabled,
    /// Only read from cache, never write.
    ReadOnly,
    /// Only write to cache, never read.
    WriteOnly,
    /// Skip the cache for this run without touching stored entries.
    Bypass,
    /// Read, validate freshness via conditional requests / head
    /// fingerprinting, and fall back to a full fetch on staleness.
    Smart,
}

/// Options a [`crate::Fetcher`] needs to produce one response.
///
/// This is the backend-facing subset of the run configuration; the full crawl
/// configuration lives with the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchOptions {
    /// HTTP method for plain-HTTP backends. Browser backends ignore it.
    pub method: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub verify_ssl: bool,
    pub follow_redirects: bool,
    /// Whole-page deadline; stages past it surface a timeout error.
    #[serde(with = "duration_ms")]
    pub page_timeout: Duration,
    /// JavaScript snippets for browser backends to run after load.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub js_code: Vec<String>,
    /// CSS selector or JS predicate the browser backend waits on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_for: Option<String>,
    pub screenshot: bool,
    pub pdf: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: "GET".to_string(),
            headers: BTreeMap::new(),
            body: None,
            user_agent: None,
            verify_ssl: true,
            follow_redirects: true,
            page_timeout: Duration::from_secs(30),
            js_code: Vec::new(),
            wait_for: None,
            screenshot: false,
            pdf: false,
        }
    }
}

mod duration_ms {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

impl CacheMode {
    /// True when entries may be loaded for this mode.
    pub fn reads(self) -> bool {
        matches!(self, CacheMode::Enabled | CacheMode::ReadOnly | CacheMode::Smart)
    }

    /// True when fresh results should be persisted for this mode.
    pub fn writes(self) -> bool {
        matches!(self, CacheMode::Enabled | CacheMode::WriteOnly | CacheMode::Smart)
    }

    /// True when a cache hit must be revalidated before use.
    pub fn validates(self) -> bool {
        matches!(self, CacheMode::Smart)
    }
}
