//! HTML scraping: cleaned HTML, link/media inventories, head metadata.
//!
//! The raw document is parsed once and walked into a small owned tree
//! ([`CleanNode`]) rather than mutated in place. The walk simultaneously
//! collects links and media, drops boilerplate elements, strips attributes,
//! prunes low-text subtrees, and the result renders back to a cleaned HTML
//! string. Head metadata always comes from the original document, not the
//! cleaned tree.

use crate::urls::{self, NormalizeOptions};
use crawlkit_core::{Error, Link, Links, Media, MediaItem, MediaKind, Result};
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Hosts whose links are dropped under `exclude_social_media_links`.
pub const SOCIAL_MEDIA_DOMAINS: &[&str] = &[
    "facebook.com",
    "twitter.com",
    "x.com",
    "linkedin.com",
    "instagram.com",
    "pinterest.com",
    "tiktok.com",
    "snapchat.com",
    "reddit.com",
];

/// Tags removed outright during cleaning.
const STRIPPED_TAGS: &[&str] = &["script", "style", "link", "meta", "noscript", "head", "title"];

/// Inline formatting tags that unwrap into their children.
const INLINE_TAGS: &[&str] = &[
    "b", "i", "u", "span", "del", "ins", "sub", "sup", "strong", "em", "code", "kbd", "var", "s",
    "q", "abbr", "cite", "dfn", "time", "small", "mark",
];

/// Attributes that survive cleaning.
const KEPT_ATTRS: &[&str] = &["src", "href", "alt", "title", "width", "height"];

const VOID_TAGS: &[&str] = &["img", "br", "hr", "input", "source", "area", "col", "embed", "wbr"];

#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    pub word_count_threshold: usize,
    pub css_selector: Option<String>,
    pub excluded_tags: Vec<String>,
    pub keep_data_attributes: bool,
    pub exclude_external_links: bool,
    pub exclude_social_media_links: bool,
    pub exclude_external_images: bool,
    pub exclude_domains: Vec<String>,
    pub image_score_threshold: i32,
    pub image_description_min_words: usize,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        Self {
            word_count_threshold: 1,
            css_selector: None,
            excluded_tags: Vec::new(),
            keep_data_attributes: false,
            exclude_external_links: false,
            exclude_social_media_links: false,
            exclude_external_images: false,
            exclude_domains: Vec::new(),
            image_score_threshold: 2,
            image_description_min_words: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScrapeResult {
    pub cleaned_html: String,
    pub media: Media,
    pub links: Links,
    pub metadata: BTreeMap<String, Value>,
    pub success: bool,
    /// Non-fatal observation, e.g. an empty CSS-selector match.
    pub note: Option<String>,
}

struct CleanNode {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<CleanChild>,
}

enum CleanChild {
    Text(String),
    Node(CleanNode),
}

struct Walker<'a> {
    url: &'a str,
    base_domain: String,
    opts: &'a ScrapeOptions,
    links: Links,
    media: Media,
    seen_links: BTreeSet<String>,
    image_index: usize,
    image_total: usize,
}

/// Scrape `html` fetched from `url` into cleaned HTML plus inventories.
pub fn scrape(url: &str, html: &str, opts: &ScrapeOptions) -> Result<ScrapeResult> {
    let doc = Html::parse_document(html);
    let metadata = extract_metadata(&doc);

    // Scope selection happens before cleaning so exclusions and counters see
    // only the selected subtree.
    let roots: Vec<ElementRef<'_>> = if let Some(css) = &opts.css_selector {
        let sel =
            Selector::parse(css).map_err(|e| Error::InvalidSelector(format!("{css}: {e}")))?;
        let matched: Vec<ElementRef<'_>> = doc.select(&sel).collect();
        if matched.is_empty() {
            return Ok(ScrapeResult {
                cleaned_html: String::new(),
                media: Media::default(),
                links: Links::default(),
                metadata,
                success: true,
                note: Some(format!("no elements matched css selector: {css}")),
            });
        }
        matched
    } else {
        let body = Selector::parse("body").expect("static selector");
        match doc.select(&body).next() {
            Some(b) => vec![b],
            None => vec![doc.root_element()],
        }
    };

    let mut walker = Walker {
        url,
        base_domain: urls::base_domain(url),
        opts,
        links: Links::default(),
        media: Media::default(),
        seen_links: BTreeSet::new(),
        image_index: 0,
        image_total: roots.iter().map(|r| count_images(*r)).sum::<usize>().max(1),
    };

    let mut out = String::new();
    for root in roots {
        if let Some(node) = walker.clean_element(root) {
            render(&CleanChild::Node(node), &mut out);
        }
    }

    Ok(ScrapeResult {
        cleaned_html: out,
        media: walker.media,
        links: walker.links,
        metadata,
        success: true,
        note: None,
    })
}

fn count_images(el: ElementRef<'_>) -> usize {
    let sel = Selector::parse("img").expect("static selector");
    el.select(&sel).count() + usize::from(el.value().name() == "img")
}

impl<'a> Walker<'a> {
    /// Clean one element; `None` means the subtree is dropped.
    fn clean_element(&mut self, el: ElementRef<'a>) -> Option<CleanNode> {
        let tag = el.value().name().to_lowercase();

        if STRIPPED_TAGS.contains(&tag.as_str())
            || self.opts.excluded_tags.iter().any(|t| t == &tag)
        {
            return None;
        }

        if tag == "a" {
            return self.clean_anchor(el);
        }
        if tag == "img" {
            return self.clean_image(el);
        }
        if tag == "video" || tag == "audio" {
            return Some(self.clean_media_element(el, &tag));
        }

        let (children, has_kept_element) = self.clean_children(el);

        // An element survives on its own text or on retained descendants
        // (anchors, media, blocks that themselves passed).
        if !has_kept_element && text_words(&children) < self.opts.word_count_threshold {
            return None;
        }

        Some(flatten(CleanNode {
            attrs: self.kept_attrs(el),
            tag,
            children,
        }))
    }

    /// Clean the children of `el`. Returns the kept children and whether any
    /// retained element (as opposed to bare text) is among them.
    fn clean_children(&mut self, el: ElementRef<'a>) -> (Vec<CleanChild>, bool) {
        let mut out = Vec::new();
        let mut has_kept_element = false;
        for child in el.children() {
            match child.value() {
                Node::Text(t) => {
                    let text = t.text.to_string();
                    // Indentation-only nodes would defeat wrapper flattening.
                    if text.trim().is_empty() && text.contains('\n') {
                        continue;
                    }
                    out.push(CleanChild::Text(text));
                }
                Node::Element(_) => {
                    let child_el = ElementRef::wrap(child).expect("element node");
                    let child_tag = child_el.value().name().to_lowercase();
                    if INLINE_TAGS.contains(&child_tag.as_str()) {
                        // Unwrap formatting tags: their children are promoted.
                        let (unwrapped, nested_kept) = self.clean_children(child_el);
                        has_kept_element |= nested_kept;
                        out.extend(unwrapped);
                    } else if let Some(cleaned) = self.clean_element(child_el) {
                        has_kept_element = true;
                        out.push(CleanChild::Node(cleaned));
                    }
                }
                _ => {} // comments and friends vanish
            }
        }
        (out, has_kept_element)
    }

    fn clean_anchor(&mut self, el: ElementRef<'a>) -> Option<CleanNode> {
        let (children, _) = self.clean_children(el);
        let text = normalize_ws(&element_text(el));

        let href = el.value().attr("href").unwrap_or_default().trim().to_string();
        if href.is_empty() {
            return Some(CleanNode {
                tag: "a".into(),
                attrs: self.kept_attrs(el),
                children,
            });
        }

        let normalized = match urls::normalize(&href, self.url, &NormalizeOptions::default()) {
            Ok(Some(n)) => n,
            Ok(None) => return None,
            // Unresolvable base (raw HTML input): keep the anchor, skip the
            // inventory.
            Err(_) => {
                return Some(CleanNode {
                    tag: "a".into(),
                    attrs: self.kept_attrs(el),
                    children,
                })
            }
        };

        let external = urls::is_external(&normalized, &self.base_domain);
        let link_domain = urls::base_domain(&normalized);

        let excluded = (self.opts.exclude_external_links && external)
            || (self.opts.exclude_social_media_links
                && SOCIAL_MEDIA_DOMAINS
                    .iter()
                    .any(|d| link_domain == *d || link_domain.ends_with(&format!(".{d}"))))
            || self
                .opts
                .exclude_domains
                .iter()
                .any(|d| link_domain == *d || link_domain.ends_with(&format!(".{d}")));

        if excluded {
            // Content survives; the href does not.
            if children.is_empty() {
                return None;
            }
            return Some(CleanNode {
                tag: "span".into(),
                attrs: Vec::new(),
                children,
            });
        }

        if self.seen_links.insert(normalized.clone()) {
            let link = Link {
                href: normalized,
                text,
                title: el.value().attr("title").map(|s| s.to_string()),
            };
            if external {
                self.links.external.push(link);
            } else {
                self.links.internal.push(link);
            }
        }

        Some(CleanNode {
            tag: "a".into(),
            attrs: self.kept_attrs(el),
            children,
        })
    }

    fn clean_image(&mut self, el: ElementRef<'a>) -> Option<CleanNode> {
        let index = self.image_index;
        self.image_index += 1;

        let src = el.value().attr("src").unwrap_or_default().trim().to_string();
        if !self.image_is_valid(el, &src) {
            return None;
        }

        if self.opts.exclude_external_images {
            if let Ok(Some(abs)) = urls::normalize(&src, self.url, &NormalizeOptions::default()) {
                if urls::is_external(&abs, &self.base_domain) {
                    return None;
                }
            }
        }

        let score = self.score_image(el, &src, index);
        if score <= self.opts.image_score_threshold {
            return None;
        }

        let alt = el.value().attr("alt").map(|s| s.to_string());
        self.media.images.push(MediaItem {
            src: src.clone(),
            alt: alt.filter(|a| !a.is_empty()),
            desc: self.closest_descriptive_text(el),
            score,
            kind: MediaKind::Image,
        });

        Some(CleanNode {
            tag: "img".into(),
            attrs: self.kept_attrs(el),
            children: Vec::new(),
        })
    }

    fn image_is_valid(&self, el: ElementRef<'a>, src: &str) -> bool {
        if src.is_empty() || src.starts_with("data:") {
            return false;
        }
        let style = el.value().attr("style").unwrap_or_default();
        if style.replace(' ', "").contains("display:none") {
            return false;
        }

        let parent = el.parent().and_then(ElementRef::wrap);
        if let Some(parent) = &parent {
            if matches!(parent.value().name(), "button" | "input") {
                return false;
            }
        }

        let alt = el.value().attr("alt").unwrap_or_default();
        let parent_classes = parent
            .map(|p| p.value().classes().collect::<Vec<_>>().join(" "))
            .unwrap_or_default();
        let haystacks = [src, alt, parent_classes.as_str()];
        for marker in ["button", "icon", "logo"] {
            if haystacks.iter().any(|h| h.to_lowercase().contains(marker)) {
                return false;
            }
        }
        true
    }

    /// Score 0..=6 from dimensions, byte size, alt text, format, and document
    /// position. Byte size is only known when the markup carries it.
    fn score_image(&self, el: ElementRef<'a>, src: &str, index: usize) -> i32 {
        let mut score = 0;

        for attr in ["height", "width"] {
            if let Some((value, unit)) = parse_dimension(el.value().attr(attr)) {
                match unit.as_str() {
                    "px" | "" => {
                        if value > 150.0 {
                            score += 1;
                        }
                    }
                    "%" | "vh" | "vw" | "vmin" | "vmax" => {
                        if value > 30.0 {
                            score += 1;
                        }
                    }
                    _ => {}
                }
            }
        }

        let byte_size: u64 = el
            .value()
            .attr("data-size")
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        if byte_size > 10_000 {
            score += 1;
        }

        if el.value().attr("alt").is_some_and(|a| !a.is_empty()) {
            score += 1;
        }

        let path = src.split(['?', '#']).next().unwrap_or(src);
        let ext = path.rsplit('.').next().unwrap_or_default().to_lowercase();
        if matches!(ext.as_str(), "jpg" | "jpeg" | "png" | "webp") {
            score += 1;
        }

        if (index as f64) / (self.image_total as f64) < 0.5 {
            score += 1;
        }

        score
    }

    fn clean_media_element(&mut self, el: ElementRef<'a>, tag: &str) -> CleanNode {
        let kind = if tag == "video" {
            MediaKind::Video
        } else {
            MediaKind::Audio
        };
        let alt = el.value().attr("alt").map(|s| s.to_string());
        let desc = self.closest_descriptive_text(el);

        let mut push = |src: Option<&str>, media: &mut Media| {
            if let Some(src) = src.filter(|s| !s.trim().is_empty()) {
                let bucket = match kind {
                    MediaKind::Video => &mut media.videos,
                    _ => &mut media.audios,
                };
                bucket.push(MediaItem {
                    src: src.trim().to_string(),
                    alt: alt.clone(),
                    desc: desc.clone(),
                    score: 0,
                    kind,
                });
            }
        };

        push(el.value().attr("src"), &mut self.media);
        let source_sel = Selector::parse("source").expect("static selector");
        for source in el.select(&source_sel) {
            push(source.value().attr("src"), &mut self.media);
        }

        CleanNode {
            tag: tag.to_string(),
            attrs: self.kept_attrs(el),
            children: Vec::new(),
        }
    }

    /// Walk ancestors for the first one whose text is long enough to serve
    /// as a description.
    fn closest_descriptive_text(&self, el: ElementRef<'a>) -> Option<String> {
        let mut current = el.parent();
        while let Some(node) = current {
            if let Some(parent) = ElementRef::wrap(node) {
                let text = normalize_ws(&element_text(parent));
                if !text.is_empty() && word_count(&text) >= self.opts.image_description_min_words {
                    return Some(text);
                }
            }
            current = node.parent();
        }
        None
    }

    fn kept_attrs(&self, el: ElementRef<'a>) -> Vec<(String, String)> {
        el.value()
            .attrs()
            .filter(|(k, _)| {
                KEPT_ATTRS.contains(k) || (self.opts.keep_data_attributes && k.starts_with("data-"))
            })
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

/// Collapse chains of single-child same-tag wrappers (`<div><div>x</div></div>`).
fn flatten(mut node: CleanNode) -> CleanNode {
    loop {
        let sole_same_tag = matches!(
            node.children.as_slice(),
            [CleanChild::Node(child)] if child.tag == node.tag
        );
        if !sole_same_tag {
            return node;
        }
        let Some(CleanChild::Node(child)) = node.children.pop() else {
            return node;
        };
        node = child;
    }
}

fn text_words(children: &[CleanChild]) -> usize {
    children
        .iter()
        .map(|c| match c {
            CleanChild::Text(t) => word_count(t),
            CleanChild::Node(n) => text_words(&n.children),
        })
        .sum()
}

fn render(child: &CleanChild, out: &mut String) {
    match child {
        CleanChild::Text(t) => out.push_str(&escape_text(t)),
        CleanChild::Node(n) => {
            out.push('<');
            out.push_str(&n.tag);
            for (k, v) in &n.attrs {
                out.push(' ');
                out.push_str(k);
                out.push_str("=\"");
                out.push_str(&escape_attr(v));
                out.push('"');
            }
            out.push('>');
            if VOID_TAGS.contains(&n.tag.as_str()) {
                return;
            }
            for c in &n.children {
                render(c, out);
            }
            out.push_str("</");
            out.push_str(&n.tag);
            out.push('>');
        }
    }
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

fn parse_dimension(raw: Option<&str>) -> Option<(f64, String)> {
    let raw = raw?.trim();
    let digits_end = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let value: f64 = raw[..digits_end].parse().ok()?;
    Some((value, raw[digits_end..].trim().to_lowercase()))
}

/// Head metadata from the original document: title, description, keywords,
/// author, and every `og:` / `twitter:` / `article:` property.
pub fn extract_metadata(doc: &Html) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();

    if let Ok(sel) = Selector::parse("head > title") {
        if let Some(title) = doc.select(&sel).next() {
            let text = normalize_ws(&title.text().collect::<String>());
            if !text.is_empty() {
                out.insert("title".to_string(), Value::String(text));
            }
        }
    }

    if let Ok(sel) = Selector::parse("head meta") {
        for meta in doc.select(&sel) {
            let Some(content) = meta.value().attr("content") else {
                continue;
            };
            let Some(name) = meta
                .value()
                .attr("name")
                .or_else(|| meta.value().attr("property"))
            else {
                continue;
            };
            let name = name.to_lowercase();
            let tracked = matches!(name.as_str(), "description" | "keywords" | "author")
                || name.starts_with("og:")
                || name.starts_with("twitter:")
                || name.starts_with("article:");
            if tracked {
                out.insert(name, Value::String(content.trim().to_string()));
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://example.com/blog/post";

    fn run(html: &str, opts: &ScrapeOptions) -> ScrapeResult {
        scrape(URL, html, opts).unwrap()
    }

    #[test]
    fn removes_scripts_styles_and_comments() {
        let html = r#"<html><head><script>evil()</script></head><body>
            <style>.x{}</style>
            <!-- hidden -->
            <p>visible text here</p>
            <noscript>fallback</noscript>
        </body></html>"#;
        let r = run(html, &ScrapeOptions::default());
        assert!(r.cleaned_html.contains("visible text here"));
        assert!(!r.cleaned_html.contains("evil"));
        assert!(!r.cleaned_html.contains(".x{}"));
        assert!(!r.cleaned_html.contains("hidden"));
        assert!(!r.cleaned_html.contains("fallback"));
    }

    #[test]
    fn classifies_and_dedupes_links() {
        let html = r#"<body>
            <a href="/about">About</a>
            <a href="/about?utm_source=x">About again</a>
            <a href="https://other.com/page" title="Other">Other site</a>
        </body>"#;
        let r = run(html, &ScrapeOptions::default());
        assert_eq!(r.links.internal.len(), 1, "{:?}", r.links.internal);
        assert_eq!(r.links.internal[0].href, "https://example.com/about");
        assert_eq!(r.links.external.len(), 1);
        assert_eq!(r.links.external[0].href, "https://other.com/page");
        assert_eq!(r.links.external[0].title.as_deref(), Some("Other"));
    }

    #[test]
    fn exclude_external_links_drops_href_from_cleaned_html() {
        let html = r#"<body><p>Read
            <a href="https://other.com/x?utm_source=a">elsewhere</a> maybe</p></body>"#;
        let opts = ScrapeOptions {
            exclude_external_links: true,
            ..Default::default()
        };
        let r = run(html, &opts);
        assert!(r.links.external.is_empty());
        assert!(!r.cleaned_html.contains("other.com"));
        assert!(!r.cleaned_html.contains("href"));
        // Anchor text is preserved.
        assert!(r.cleaned_html.contains("elsewhere"));
    }

    #[test]
    fn social_and_domain_exclusions() {
        let html = r#"<body>
            <a href="https://twitter.com/someone">tweet</a>
            <a href="https://spam.example.net/offer">spam</a>
            <a href="https://example.com/fine">fine</a>
        </body>"#;
        let opts = ScrapeOptions {
            exclude_social_media_links: true,
            exclude_domains: vec!["example.net".to_string()],
            ..Default::default()
        };
        let r = run(html, &opts);
        let all: Vec<&str> = r
            .links
            .internal
            .iter()
            .chain(&r.links.external)
            .map(|l| l.href.as_str())
            .collect();
        assert_eq!(all, vec!["https://example.com/fine"]);
    }

    #[test]
    fn css_selector_scopes_and_empty_match_is_soft() {
        let html = r#"<body><div id="main"><p>inside</p></div><p>outside</p></body>"#;
        let opts = ScrapeOptions {
            css_selector: Some("#main".to_string()),
            ..Default::default()
        };
        let r = run(html, &opts);
        assert!(r.cleaned_html.contains("inside"));
        assert!(!r.cleaned_html.contains("outside"));

        let opts = ScrapeOptions {
            css_selector: Some("#missing".to_string()),
            ..Default::default()
        };
        let r = run(html, &opts);
        assert!(r.success);
        assert!(r.cleaned_html.is_empty());
        assert!(r.note.unwrap().contains("#missing"));
    }

    #[test]
    fn invalid_css_selector_errors() {
        let opts = ScrapeOptions {
            css_selector: Some(":::bad".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            scrape(URL, "<p>x</p>", &opts),
            Err(Error::InvalidSelector(_))
        ));
    }

    #[test]
    fn excluded_tags_are_removed() {
        let html = r#"<body><nav>menu items here</nav><p>content words</p></body>"#;
        let opts = ScrapeOptions {
            excluded_tags: vec!["nav".to_string()],
            ..Default::default()
        };
        let r = run(html, &opts);
        assert!(!r.cleaned_html.contains("menu"));
        assert!(r.cleaned_html.contains("content words"));
    }

    #[test]
    fn image_scoring_keeps_good_drops_bad() {
        let html = r#"<body><div>
            <p>A descriptive paragraph about the gallery of products.</p>
            <img src="/big.png" width="600" height="400" alt="product photo">
            <img src="/pixel.gif" width="1" height="1">
        </div></body>"#;
        let r = run(html, &ScrapeOptions::default());
        assert_eq!(r.media.images.len(), 1, "{:?}", r.media.images);
        let img = &r.media.images[0];
        assert_eq!(img.src, "/big.png");
        // width + height + alt + format + first-half position
        assert_eq!(img.score, 5);
        assert!(img.desc.as_deref().unwrap_or("").contains("descriptive"));
        assert!(r.cleaned_html.contains("big.png"));
        assert!(!r.cleaned_html.contains("pixel.gif"));
    }

    #[test]
    fn icon_and_hidden_images_are_invalid() {
        let html = r#"<body>
            <img src="/icon-search.png" width="600" height="600" alt="search">
            <img src="/real.jpg" width="600" height="600" style="display: none" alt="x">
            <button><img src="/inside.jpg" width="600" height="600" alt="y"></button>
        </body>"#;
        let r = run(html, &ScrapeOptions::default());
        assert!(r.media.images.is_empty(), "{:?}", r.media.images);
    }

    #[test]
    fn exclude_external_images() {
        let html = r#"<body><p>some words</p>
            <img src="https://cdn.other.com/a.png" width="600" height="600" alt="ext">
            <img src="/local.png" width="600" height="600" alt="local">
        </body>"#;
        let opts = ScrapeOptions {
            exclude_external_images: true,
            ..Default::default()
        };
        let r = run(html, &opts);
        assert_eq!(r.media.images.len(), 1);
        assert_eq!(r.media.images[0].src, "/local.png");
    }

    #[test]
    fn video_audio_and_sources_recorded() {
        let html = r#"<body><div>
            <p>Watch the conference talk recording below.</p>
            <video src="/talk.mp4"></video>
            <audio><source src="/ep1.mp3"><source src="/ep1.ogg"></audio>
        </div></body>"#;
        let r = run(html, &ScrapeOptions::default());
        assert_eq!(r.media.videos.len(), 1);
        assert_eq!(r.media.videos[0].src, "/talk.mp4");
        assert_eq!(r.media.videos[0].kind, MediaKind::Video);
        assert_eq!(r.media.audios.len(), 2);
        assert!(r.media.videos[0]
            .desc
            .as_deref()
            .unwrap_or("")
            .contains("conference"));
    }

    #[test]
    fn word_count_threshold_prunes_sparse_subtrees() {
        let html = r#"<body>
            <div><span>ok</span></div>
            <div><p>this paragraph definitely has more than five words total</p></div>
        </body>"#;
        let opts = ScrapeOptions {
            word_count_threshold: 5,
            ..Default::default()
        };
        let r = run(html, &opts);
        assert!(!r.cleaned_html.contains(">ok<"), "{}", r.cleaned_html);
        assert!(r.cleaned_html.contains("more than five words"));
    }

    #[test]
    fn anchors_survive_regardless_of_word_count() {
        let html = r#"<body><ul>
            <li><a href="/one">One</a></li>
            <li><a href="/two">Two</a></li>
        </ul></body>"#;
        let opts = ScrapeOptions {
            word_count_threshold: 10,
            ..Default::default()
        };
        let r = run(html, &opts);
        assert_eq!(r.links.internal.len(), 2);
        assert!(r.cleaned_html.contains("href=\"/one\""));
    }

    #[test]
    fn inline_tags_unwrap_and_wrappers_flatten() {
        let html =
            r#"<body><div><div><p>Some <b>bold</b> and <em>emphasis</em> text</p></div></div></body>"#;
        let r = run(html, &ScrapeOptions::default());
        assert!(!r.cleaned_html.contains("<b>"));
        assert!(!r.cleaned_html.contains("<em>"));
        assert!(r.cleaned_html.contains("bold"));
        // The double div chain collapses to one.
        assert!(!r.cleaned_html.contains("<div><div>"), "{}", r.cleaned_html);
    }

    #[test]
    fn attributes_stripped_except_whitelist_and_data_opt_in() {
        let html =
            r#"<body><p class="x" id="y" onclick="z()" data-k="v" title="keep">words here</p></body>"#;
        let r = run(html, &ScrapeOptions::default());
        assert!(!r.cleaned_html.contains("class="));
        assert!(!r.cleaned_html.contains("onclick"));
        assert!(!r.cleaned_html.contains("data-k"));
        assert!(r.cleaned_html.contains("title=\"keep\""));

        let opts = ScrapeOptions {
            keep_data_attributes: true,
            ..Default::default()
        };
        let r = run(html, &opts);
        assert!(r.cleaned_html.contains("data-k=\"v\""));
    }

    #[test]
    fn metadata_comes_from_original_head() {
        let html = r#"<html><head>
            <title>Page Title</title>
            <meta name="description" content="A description">
            <meta name="author" content="Ada">
            <meta property="og:image" content="https://example.com/og.png">
            <meta name="twitter:card" content="summary">
            <meta property="article:modified_time" content="2024-03-01">
            <meta name="viewport" content="width=device-width">
        </head><body><p>body text</p></body></html>"#;
        let r = run(html, &ScrapeOptions::default());
        assert_eq!(r.metadata["title"], "Page Title");
        assert_eq!(r.metadata["description"], "A description");
        assert_eq!(r.metadata["author"], "Ada");
        assert_eq!(r.metadata["og:image"], "https://example.com/og.png");
        assert_eq!(r.metadata["twitter:card"], "summary");
        assert_eq!(r.metadata["article:modified_time"], "2024-03-01");
        assert!(!r.metadata.contains_key("viewport"));
    }
}
