//! Cache freshness validation without a full fetch.
//!
//! Two layers, cheapest first:
//!
//! 1. HTTP conditional requests: a HEAD with `If-None-Match` /
//!    `If-Modified-Since`; a 304 proves freshness.
//! 2. Head fingerprinting: a streamed GET aborted after `</head>` (or 64
//!    KiB), fingerprinted and compared against the stored digest. Catches
//!    unchanged pages on servers that never answer 304.
//!
//! The validator only reports; it never touches the cache. Fresh validator
//! metadata (new ETag, Last-Modified, fingerprint) rides along in the report
//! for the pipeline to persist.

use crate::fingerprint::compute_head_fingerprint;
use crawlkit_core::{Error, Result};
use futures_util::StreamExt;
use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; Crawlkit/1.0)";
const MAX_HEAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationStatus {
    /// Content unchanged; the cached entry is usable.
    Fresh,
    /// Content changed; a full recrawl is needed.
    Stale,
    /// No validation data available; callers treat this as stale.
    Unknown,
    /// The validation request itself failed; policy decides whether the
    /// cached entry serves as a fallback.
    Error,
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub status: ValidationStatus,
    pub new_etag: Option<String>,
    pub new_last_modified: Option<String>,
    pub new_head_fingerprint: Option<String>,
    pub reason: String,
}

impl ValidationReport {
    fn new(status: ValidationStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            new_etag: None,
            new_last_modified: None,
            new_head_fingerprint: None,
            reason: reason.into(),
        }
    }
}

pub struct CacheValidator {
    client: reqwest::Client,
}

impl CacheValidator {
    pub fn new(timeout: Option<Duration>, user_agent: Option<&str>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout.unwrap_or(DEFAULT_TIMEOUT))
            .build()
            .map_err(|e| Error::Validator(e.to_string()))?;
        Ok(Self { client })
    }

    /// Decide whether the cached entry for `url` is still usable.
    ///
    /// Infallible by design: request failures come back as
    /// [`ValidationStatus::Error`] with a human-readable reason.
    pub async fn validate(
        &self,
        url: &str,
        stored_etag: Option<&str>,
        stored_last_modified: Option<&str>,
        stored_head_fingerprint: Option<&str>,
    ) -> ValidationReport {
        match self
            .validate_inner(url, stored_etag, stored_last_modified, stored_head_fingerprint)
            .await
        {
            Ok(report) => {
                tracing::debug!(url, status = ?report.status, reason = %report.reason, "cache validation");
                report
            }
            Err(e) => {
                let reason = classify_request_error(&e);
                tracing::debug!(url, reason, "cache validation errored");
                ValidationReport::new(ValidationStatus::Error, reason)
            }
        }
    }

    async fn validate_inner(
        &self,
        url: &str,
        stored_etag: Option<&str>,
        stored_last_modified: Option<&str>,
        stored_head_fingerprint: Option<&str>,
    ) -> std::result::Result<ValidationReport, reqwest::Error> {
        let has_conditional = stored_etag.is_some() || stored_last_modified.is_some();

        if has_conditional {
            let mut req = self.client.head(url);
            if let Some(etag) = stored_etag {
                req = req.header(reqwest::header::IF_NONE_MATCH, etag);
            }
            if let Some(lm) = stored_last_modified {
                req = req.header(reqwest::header::IF_MODIFIED_SINCE, lm);
            }
            let resp = req.send().await?;

            if resp.status() == reqwest::StatusCode::NOT_MODIFIED {
                return Ok(ValidationReport::new(
                    ValidationStatus::Fresh,
                    "server returned 304 Not Modified",
                ));
            }

            let new_etag = header_string(&resp, reqwest::header::ETAG);
            let new_last_modified = header_string(&resp, reqwest::header::LAST_MODIFIED);

            if let Some(stored_fp) = stored_head_fingerprint {
                if let Some(mut report) = self.fingerprint_check(url, stored_fp).await? {
                    report.new_etag = report.new_etag.or(new_etag);
                    report.new_last_modified = report.new_last_modified.or(new_last_modified);
                    return Ok(report);
                }
            }

            let mut report = ValidationReport::new(
                ValidationStatus::Stale,
                "server returned 200, content may have changed",
            );
            report.new_etag = new_etag;
            report.new_last_modified = new_last_modified;
            return Ok(report);
        }

        if let Some(stored_fp) = stored_head_fingerprint {
            if let Some(report) = self.fingerprint_check(url, stored_fp).await? {
                return Ok(report);
            }
        }

        Ok(ValidationReport::new(
            ValidationStatus::Unknown,
            "no validation data available (no etag, last-modified, or fingerprint)",
        ))
    }

    /// Compare a freshly computed head fingerprint against `stored_fp`.
    /// `None` when the page yielded no fingerprintable head.
    async fn fingerprint_check(
        &self,
        url: &str,
        stored_fp: &str,
    ) -> std::result::Result<Option<ValidationReport>, reqwest::Error> {
        let (head_html, etag, last_modified) = self.fetch_head(url).await?;
        let Some(head_html) = head_html else {
            return Ok(None);
        };
        let new_fp = compute_head_fingerprint(&head_html);
        if new_fp.is_empty() {
            return Ok(None);
        }

        let (status, reason) = if new_fp == stored_fp {
            (ValidationStatus::Fresh, "head fingerprint matches")
        } else {
            (ValidationStatus::Stale, "head fingerprint changed")
        };
        let mut report = ValidationReport::new(status, reason);
        report.new_etag = etag;
        report.new_last_modified = last_modified;
        report.new_head_fingerprint = Some(new_fp);
        Ok(Some(report))
    }

    /// Stream the response body only as far as `</head>` (cap 64 KiB).
    async fn fetch_head(
        &self,
        url: &str,
    ) -> std::result::Result<(Option<String>, Option<String>, Option<String>), reqwest::Error>
    {
        // Compression off so the closing tag is visible in the raw stream.
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT_ENCODING, "identity")
            .send()
            .await?;

        let etag = header_string(&resp, reqwest::header::ETAG);
        let last_modified = header_string(&resp, reqwest::header::LAST_MODIFIED);

        if resp.status() != reqwest::StatusCode::OK {
            return Ok((None, etag, last_modified));
        }

        let mut buf: Vec<u8> = Vec::with_capacity(8 * 1024);
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            buf.extend_from_slice(&chunk);
            if find_head_end(&buf).is_some() || buf.len() >= MAX_HEAD_BYTES {
                break;
            }
        }

        let mut html = String::from_utf8_lossy(&buf).into_owned();
        // Byte search keeps the cut on a char boundary (the needle is ASCII).
        if let Some(end) = find_head_end(html.as_bytes()) {
            html.truncate(end + "</head>".len());
        }
        Ok((Some(html), etag, last_modified))
    }
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    let needle = b"</head>";
    buf.windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}

fn header_string(resp: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    resp.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn classify_request_error(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "validation request timed out"
    } else if e.is_connect() {
        "validation request failed: connection error"
    } else {
        "validation request failed"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::{header, HeaderMap, StatusCode},
        routing::{get, head},
        Router,
    };
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn conditional_head_304_is_fresh() {
        let app = Router::new().route(
            "/",
            head(|headers: HeaderMap| async move {
                if headers
                    .get(header::IF_NONE_MATCH)
                    .is_some_and(|v| v == "\"v1\"")
                {
                    StatusCode::NOT_MODIFIED
                } else {
                    StatusCode::OK
                }
            }),
        );
        let addr = serve(app).await;

        let v = CacheValidator::new(Some(Duration::from_secs(2)), None).unwrap();
        let report = v
            .validate(&format!("http://{addr}/"), Some("\"v1\""), None, None)
            .await;
        assert_eq!(report.status, ValidationStatus::Fresh);
        assert!(report.reason.contains("304"));
    }

    #[tokio::test]
    async fn matching_fingerprint_is_fresh_and_reports_new_validators() {
        const PAGE: &str = r#"<html><head><title>Stable</title>
            <meta name="description" content="same"></head><body>x</body></html>"#;
        let stored = compute_head_fingerprint(PAGE);

        let app = Router::new().route(
            "/",
            // axum's `get` also answers HEAD, which the conditional probe uses.
            get(|| async { ([(header::ETAG, "\"fresh-etag\"")], PAGE) }),
        );
        let addr = serve(app).await;

        let v = CacheValidator::new(Some(Duration::from_secs(2)), None).unwrap();
        let report = v
            .validate(&format!("http://{addr}/"), Some("\"old\""), None, Some(&stored))
            .await;
        assert_eq!(report.status, ValidationStatus::Fresh);
        assert_eq!(report.new_etag.as_deref(), Some("\"fresh-etag\""));
        assert_eq!(report.new_head_fingerprint.as_deref(), Some(stored.as_str()));
    }

    #[tokio::test]
    async fn changed_fingerprint_is_stale() {
        let stored = compute_head_fingerprint(
            r#"<head><title>Old Title</title><meta name="description" content="old"></head>"#,
        );
        let app = Router::new().route(
            "/",
            get(|| async {
                r#"<html><head><title>New Title</title>
                   <meta name="description" content="new"></head><body>y</body></html>"#
            }),
        );
        let addr = serve(app).await;

        let v = CacheValidator::new(Some(Duration::from_secs(2)), None).unwrap();
        let report = v
            .validate(&format!("http://{addr}/"), None, None, Some(&stored))
            .await;
        assert_eq!(report.status, ValidationStatus::Stale);
        assert!(report.new_head_fingerprint.is_some());
    }

    #[tokio::test]
    async fn no_validation_data_is_unknown() {
        let v = CacheValidator::new(Some(Duration::from_secs(2)), None).unwrap();
        let report = v.validate("http://127.0.0.1:1/", None, None, None).await;
        // Unknown short-circuits before any request is made.
        assert_eq!(report.status, ValidationStatus::Unknown);
    }

    #[tokio::test]
    async fn connection_failure_is_error() {
        let v = CacheValidator::new(Some(Duration::from_millis(500)), None).unwrap();
        let report = v
            .validate("http://127.0.0.1:1/", Some("\"x\""), None, None)
            .await;
        assert_eq!(report.status, ValidationStatus::Error);
        assert!(!report.reason.is_empty());
    }

    #[test]
    fn head_end_scan_is_case_insensitive() {
        assert!(find_head_end(b"<html><head>x</HEAD><body>").is_some());
        assert!(find_head_end(b"<html><head>x").is_none());
    }
}
