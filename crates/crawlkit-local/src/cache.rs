//! Per-run cache policy arbitration.
//!
//! A [`CacheContext`] pairs the run's [`CacheMode`] with what the URL itself
//! permits: only `http`, `https`, and `file` URLs are cacheable; `raw://`
//! input never is, regardless of mode.

use crawlkit_core::CacheMode;

#[derive(Debug, Clone)]
pub struct CacheContext {
    pub url: String,
    pub cache_mode: CacheMode,
    always_bypass: bool,
    is_cacheable: bool,
    is_raw: bool,
}

impl CacheContext {
    pub fn new(url: &str, cache_mode: CacheMode, always_bypass: bool) -> Self {
        let is_cacheable = url.starts_with("http://")
            || url.starts_with("https://")
            || url.starts_with("file://");
        let is_raw = url.starts_with("raw:");
        Self {
            url: url.to_string(),
            cache_mode,
            always_bypass,
            is_cacheable,
            is_raw,
        }
    }

    pub fn should_read(&self) -> bool {
        !self.always_bypass && self.is_cacheable && self.cache_mode.reads()
    }

    pub fn should_write(&self) -> bool {
        !self.always_bypass && self.is_cacheable && self.cache_mode.writes()
    }

    pub fn should_validate(&self) -> bool {
        self.should_read() && self.cache_mode.validates()
    }

    /// URL suitable for log lines; raw HTML input is elided.
    pub fn display_url(&self) -> &str {
        if self.is_raw {
            "Raw HTML"
        } else {
            &self.url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_reads_and_writes_on_cacheable_schemes() {
        for url in [
            "https://example.com/a",
            "http://example.com/a",
            "file:///tmp/page.html",
        ] {
            let ctx = CacheContext::new(url, CacheMode::Enabled, false);
            assert!(ctx.should_read(), "{url}");
            assert!(ctx.should_write(), "{url}");
            assert!(!ctx.should_validate(), "{url}");
        }
    }

    #[test]
    fn raw_html_is_never_cacheable() {
        let ctx = CacheContext::new("raw://<p>x</p>", CacheMode::Enabled, false);
        assert!(!ctx.should_read());
        assert!(!ctx.should_write());
        assert_eq!(ctx.display_url(), "Raw HTML");
    }

    #[test]
    fn smart_reads_writes_and_validates() {
        let ctx = CacheContext::new("https://example.com/", CacheMode::Smart, false);
        assert!(ctx.should_read());
        assert!(ctx.should_write());
        assert!(ctx.should_validate());
    }

    #[test]
    fn read_only_and_write_only_split() {
        let ro = CacheContext::new("https://example.com/", CacheMode::ReadOnly, false);
        assert!(ro.should_read() && !ro.should_write());
        let wo = CacheContext::new("https://example.com/", CacheMode::WriteOnly, false);
        assert!(!wo.should_read() && wo.should_write());
    }

    #[test]
    fn always_bypass_overrides_mode() {
        let ctx = CacheContext::new("https://example.com/", CacheMode::Enabled, true);
        assert!(!ctx.should_read());
        assert!(!ctx.should_write());
        assert!(!ctx.should_validate());
    }
}
