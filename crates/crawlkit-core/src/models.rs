//! Data model for crawl results.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Raw outcome of fetching a single URL, before any scraping or extraction.
///
/// Immutable after construction; the pipeline only reads from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResponse {
    pub html: String,
    pub status_code: u16,
    /// Final URL after following redirects.
    pub redirected_url: String,
    pub response_headers: BTreeMap<String, String>,
    /// Base64-encoded PNG, when the backend captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<Vec<u8>>,
    /// Result of executed page JavaScript, backend-dependent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub js_result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub downloaded_files: Vec<String>,
}

impl FetchResponse {
    /// Minimal successful response around a body, used for `raw://` and
    /// `file://` sources which have no wire exchange.
    pub fn synthetic(url: &str, html: String) -> Self {
        Self {
            html,
            status_code: 200,
            redirected_url: url.to_string(),
            response_headers: BTreeMap::new(),
            screenshot: None,
            pdf: None,
            js_result: None,
            downloaded_files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaItem {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
    /// Nearest ancestor text that plausibly describes the media.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    pub score: i32,
    #[serde(rename = "type")]
    pub kind: MediaKind,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Media {
    pub images: Vec<MediaItem>,
    pub videos: Vec<MediaItem>,
    pub audios: Vec<MediaItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Link {
    /// Normalized absolute URL.
    pub href: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Links {
    pub internal: Vec<Link>,
    pub external: Vec<Link>,
}

/// Markdown renditions of the cleaned page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkdownResult {
    /// Full conversion of the cleaned HTML.
    pub raw_markdown: String,
    /// Conversion of only the content blocks the filter kept.
    pub fit_markdown: String,
    /// The filtered HTML the fit markdown was generated from.
    pub fit_html: String,
}

/// Everything the pipeline knows about one crawled URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlResult {
    pub url: String,
    pub html: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleaned_html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub markdown: Option<MarkdownResult>,
    #[serde(default)]
    pub media: Media,
    #[serde(default)]
    pub links: Links,
    /// Head metadata (`title`, `description`, `og:*`, ...) plus crawl
    /// annotations such as deep-crawl depth.
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub downloaded_files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl CrawlResult {
    /// Empty failed result carrying a human-readable reason.
    pub fn failure(url: impl Into<String>, error_message: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            html: String::new(),
            success: false,
            cleaned_html: None,
            markdown: None,
            media: Media::default(),
            links: Links::default(),
            metadata: BTreeMap::new(),
            extracted_content: None,
            screenshot: None,
            pdf: None,
            status_code: None,
            response_headers: BTreeMap::new(),
            downloaded_files: Vec::new(),
            error_message: Some(error_message.into()),
            session_id: None,
        }
    }

    /// Empty successful skeleton for `url`; the pipeline fills the rest in.
    pub fn empty(url: impl Into<String>) -> Self {
        let mut r = Self::failure(url, "");
        r.error_message = None;
        r.success = true;
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_kind_serializes_lowercase() {
        let item = MediaItem {
            src: "/a.png".into(),
            alt: Some("a".into()),
            desc: None,
            score: 3,
            kind: MediaKind::Image,
        };
        let v = serde_json::to_value(&item).unwrap();
        assert_eq!(v["type"], "image");
        assert_eq!(v["score"], 3);
    }

    #[test]
    fn failure_result_is_unsuccessful() {
        let r = CrawlResult::failure("https://example.com/", "boom");
        assert!(!r.success);
        assert_eq!(r.error_message.as_deref(), Some("boom"));
        assert!(r.html.is_empty());
    }

    #[test]
    fn synthetic_response_has_empty_headers_and_200() {
        let r = FetchResponse::synthetic("raw://x", "<p>x</p>".into());
        assert_eq!(r.status_code, 200);
        assert!(r.response_headers.is_empty());
        assert_eq!(r.redirected_url, "raw://x");
    }
}
