//! Head fingerprinting for cheap change detection.
//!
//! A fingerprint digests the semantically stable subset of a page `<head>`:
//! the title, the description/keywords/author metas, every `og:*` and
//! `twitter:*` meta, and `article:modified_time`. Sites that rotate ad
//! markup or nonces on every response usually keep these stable, so an equal
//! fingerprint is strong evidence the content itself did not change.

use crate::content_store::content_hash;
use scraper::{Html, Selector};
use std::collections::BTreeMap;

/// Meta names that contribute to the fingerprint verbatim.
const TRACKED_NAMES: &[&str] = &["description", "keywords", "author"];

/// Compute the fingerprint of a `<head>` fragment.
///
/// Tag and attribute name comparison is case-insensitive (the HTML parser
/// lowercases them) and attribute order is irrelevant: signals are collected
/// into a sorted map before hashing. Returns the empty string when the head
/// carries no signal at all.
pub fn compute_head_fingerprint(head_html: &str) -> String {
    let doc = Html::parse_document(head_html);

    let mut signals: BTreeMap<String, String> = BTreeMap::new();

    if let Ok(sel) = Selector::parse("title") {
        if let Some(title) = doc.select(&sel).next() {
            let text = title.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                signals.insert("title".to_string(), text);
            }
        }
    }

    if let Ok(sel) = Selector::parse("meta") {
        for meta in doc.select(&sel) {
            let Some(content) = meta.value().attr("content") else {
                continue;
            };
            let name = meta
                .value()
                .attr("name")
                .or_else(|| meta.value().attr("property"))
                .map(|s| s.to_lowercase());
            let Some(name) = name else { continue };

            let tracked = TRACKED_NAMES.contains(&name.as_str())
                || name.starts_with("og:")
                || name.starts_with("twitter:")
                || name == "article:modified_time";
            if tracked {
                signals.insert(name, content.trim().to_string());
            }
        }
    }

    if signals.is_empty() {
        return String::new();
    }

    let mut canonical = String::new();
    for (k, v) in &signals {
        canonical.push_str(k);
        canonical.push('=');
        canonical.push_str(v);
        canonical.push('\n');
    }
    content_hash(&canonical)
}
