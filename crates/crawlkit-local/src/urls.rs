//! URL normalization and link classification.
//!
//! Every URL entering the cache or the link inventories passes through
//! [`normalize`] first, so lookups and dedupe compare canonical strings:
//! lowercased host, default ports stripped, tracking query parameters
//! dropped, remaining query keys lowercased and sorted, fragment removed.

use crawlkit_core::{Error, Result};
use std::collections::BTreeSet;
use url::Url;

/// Query parameters dropped during normalization unless the caller disables
/// tracking removal. Any `utm_`-prefixed key is dropped as well; this set
/// covers the rest. Extendable per run via `extra_drop_params`.
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "gclid",
    "fbclid",
    "ref",
    "ref_src",
];

/// Second-level labels that indicate a two-part public suffix (co.uk,
/// com.au, ...). Kept deliberately small; unlisted domains fall back to the
/// last two labels.
const TWO_PART_TLD_LABELS: &[&str] = &[
    "co", "com", "org", "gov", "edu", "net", "mil", "int", "ac", "ad", "ae", "af", "ag",
];

/// Schemes that always classify as external and are never crawled.
const NON_WEB_SCHEMES: &[&str] = &["mailto:", "tel:", "ftp:", "javascript:", "data:"];

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub drop_query_tracking: bool,
    pub sort_query: bool,
    pub keep_fragment: bool,
    pub extra_drop_params: Vec<String>,
    /// Rewrite same-host `http` links back to `https` when the page itself
    /// was served over https. Protocol-relative references still follow the
    /// base scheme.
    pub preserve_https: bool,
    pub original_scheme: Option<String>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            drop_query_tracking: true,
            sort_query: true,
            keep_fragment: false,
            extra_drop_params: Vec::new(),
            preserve_https: false,
            original_scheme: None,
        }
    }
}

/// Canonicalize `href` against `base_url`.
///
/// Returns `Ok(None)` for empty or whitespace-only input and an
/// `InvalidUrl` error when the base URL has no scheme or host.
pub fn normalize(href: &str, base_url: &str, opts: &NormalizeOptions) -> Result<Option<String>> {
    let href = href.trim();
    if href.is_empty() {
        return Ok(None);
    }

    let base = Url::parse(base_url).map_err(|e| Error::InvalidUrl(format!("{base_url}: {e}")))?;
    if base.scheme().is_empty() || !base.has_host() {
        return Err(Error::InvalidUrl(format!(
            "base url must have scheme and host: {base_url}"
        )));
    }

    let mut resolved = base
        .join(href)
        .map_err(|e| Error::InvalidUrl(format!("{href}: {e}")))?;

    // mailto:, data:, javascript: and friends have no hierarchical parts to
    // canonicalize.
    if resolved.cannot_be_a_base() {
        return Ok(Some(resolved.to_string()));
    }

    if opts.preserve_https
        && opts.original_scheme.as_deref() == Some("https")
        && resolved.scheme() == "http"
        && resolved.host_str() == base.host_str()
        && !href.starts_with("//")
    {
        let _ = resolved.set_scheme("https");
    }

    // The url crate already lowercases the host and elides default ports on
    // serialization; path and query still need manual work.
    let path = resolved.path().to_string();
    let collapsed = collapse_slashes(&path);
    let trimmed = if collapsed.len() > 1 && collapsed.ends_with('/') {
        collapsed.trim_end_matches('/').to_string()
    } else {
        collapsed
    };
    if trimmed != path {
        resolved.set_path(&trimmed);
    }

    let query = build_query(&resolved, opts);
    resolved.set_query(query.as_deref());

    if !opts.keep_fragment {
        resolved.set_fragment(None);
    }

    Ok(Some(resolved.to_string()))
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for c in path.chars() {
        if c == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(c);
    }
    out
}

fn build_query(url: &Url, opts: &NormalizeOptions) -> Option<String> {
    url.query()?;

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if opts.drop_query_tracking {
        let mut drop: BTreeSet<String> = DEFAULT_TRACKING_PARAMS
            .iter()
            .map(|s| s.to_string())
            .collect();
        drop.extend(opts.extra_drop_params.iter().map(|p| p.to_lowercase()));
        // The whole utm_ family is tracking, not just the canonical five.
        params.retain(|(k, _)| !drop.contains(k) && !k.to_lowercase().starts_with("utm_"));
    }

    for (k, _) in params.iter_mut() {
        *k = k.to_lowercase();
    }

    if opts.sort_query {
        params.sort_by(|a, b| a.0.cmp(&b.0));
    }

    if params.is_empty() {
        return None;
    }

    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &params {
        ser.append_pair(k, v);
    }
    Some(ser.finish())
}

/// Registrable domain (eTLD+1) of `url`, with any `www.` prefix removed.
///
/// Uses a small two-part-TLD whitelist rather than the full public-suffix
/// list; unknown hosts keep their last two labels. Returns an empty string
/// when the URL has no host.
pub fn base_domain(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return String::new();
    };
    let Some(host) = parsed.host_str() else {
        return String::new();
    };

    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);

    let parts: Vec<&str> = host.split('.').collect();
    if parts.len() > 2 && TWO_PART_TLD_LABELS.contains(&parts[parts.len() - 2]) {
        parts[parts.len() - 3..].join(".")
    } else if parts.len() >= 2 {
        parts[parts.len() - 2..].join(".")
    } else {
        host.to_string()
    }
}

/// True when `url` points outside `base_domain`.
///
/// Non-web schemes (mailto:, tel:, ...) always classify as external;
/// relative references always classify as internal.
pub fn is_external(url: &str, base_domain: &str) -> bool {
    let lower = url.to_lowercase();
    if NON_WEB_SCHEMES.iter().any(|p| lower.starts_with(p)) {
        return true;
    }

    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };

    let host = host.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let base = base_domain.to_lowercase();
    let base = base.strip_prefix("www.").unwrap_or(&base);

    // Suffix match must respect label boundaries: notexample.com is not
    // inside example.com, blog.example.com is.
    !(host == base || host.ends_with(&format!(".{base}")))
}
