//! Cleaned HTML to markdown, plus the "fit" content filter.
//!
//! `raw_markdown` converts everything; `fit_markdown` converts only the
//! blocks a [`ContentFilter`] kept. The default pruning filter drops
//! link-dense and near-empty blocks, which removes most navigation and
//! footer residue that survives scraping.

use crawlkit_core::MarkdownResult;
use scraper::{ElementRef, Html, Node, Selector};
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone)]
pub struct MarkdownGenerator {
    pub content_filter: ContentFilter,
    /// Tags emitted verbatim as HTML instead of being converted.
    pub preserve_tags: Vec<String>,
}

impl Default for MarkdownGenerator {
    fn default() -> Self {
        Self {
            content_filter: ContentFilter::default(),
            preserve_tags: Vec::new(),
        }
    }
}

impl MarkdownGenerator {
    pub fn generate(&self, cleaned_html: &str, base_url: &str) -> MarkdownResult {
        let raw_markdown = html_to_markdown(cleaned_html, base_url, &self.preserve_tags);
        let fit_html = self.content_filter.filter(cleaned_html);
        let fit_markdown = html_to_markdown(&fit_html, base_url, &self.preserve_tags);
        MarkdownResult {
            raw_markdown,
            fit_markdown,
            fit_html,
        }
    }
}

/// Pluggable block filter computing the "fit" rendition.
#[derive(Clone)]
pub enum ContentFilter {
    /// Score blocks by text volume and link density; drop the low-value ones.
    Pruning(PruningFilter),
    /// Keep everything.
    Passthrough,
    /// Caller-supplied filter.
    Plugin(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl Default for ContentFilter {
    fn default() -> Self {
        ContentFilter::Pruning(PruningFilter::default())
    }
}

impl std::fmt::Debug for ContentFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContentFilter::Pruning(p) => write!(f, "Pruning({p:?})"),
            ContentFilter::Passthrough => f.write_str("Passthrough"),
            ContentFilter::Plugin(_) => f.write_str("Plugin"),
        }
    }
}

impl ContentFilter {
    pub fn filter(&self, html: &str) -> String {
        match self {
            ContentFilter::Pruning(p) => p.filter(html),
            ContentFilter::Passthrough => html.to_string(),
            ContentFilter::Plugin(f) => f(html),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PruningFilter {
    /// Blocks below this word count are dropped (headings are exempt).
    pub min_word_threshold: usize,
    /// Blocks whose link text exceeds this share of all text are dropped.
    pub link_density_threshold: f64,
}

impl Default for PruningFilter {
    fn default() -> Self {
        Self {
            min_word_threshold: 5,
            link_density_threshold: 0.6,
        }
    }
}

impl PruningFilter {
    fn filter(&self, html: &str) -> String {
        let doc = Html::parse_document(html);
        let candidates =
            Selector::parse("p, h1, h2, h3, h4, h5, h6, li, pre, blockquote, table")
                .expect("static selector");
        let anchor = Selector::parse("a").expect("static selector");

        let mut kept: Vec<String> = Vec::new();
        for block in doc.select(&candidates) {
            // Nested candidates (li inside table, p inside blockquote) are
            // covered by their outermost kept ancestor.
            if has_candidate_ancestor(block) {
                continue;
            }

            let tag = block.value().name();
            let words = word_count(&block.text().collect::<Vec<_>>().join(" "));
            if tag.starts_with('h') {
                if words > 0 {
                    kept.push(block.html());
                }
                continue;
            }

            if words < self.min_word_threshold {
                continue;
            }
            let link_words: usize = block
                .select(&anchor)
                .map(|a| word_count(&a.text().collect::<Vec<_>>().join(" ")))
                .sum();
            let density = link_words as f64 / words.max(1) as f64;
            if density > self.link_density_threshold {
                continue;
            }
            kept.push(block.html());
        }
        kept.join("\n")
    }
}

fn has_candidate_ancestor(el: ElementRef<'_>) -> bool {
    const CANDIDATES: &[&str] = &[
        "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "pre", "blockquote", "table",
    ];
    let mut current = el.parent();
    while let Some(node) = current {
        if let Some(parent) = ElementRef::wrap(node) {
            if CANDIDATES.contains(&parent.value().name()) {
                return true;
            }
        }
        current = node.parent();
    }
    false
}

/// Convert an HTML string (fragment or document) to markdown.
pub fn html_to_markdown(html: &str, base_url: &str, preserve_tags: &[String]) -> String {
    if html.trim().is_empty() {
        return String::new();
    }
    let doc = Html::parse_document(html);
    let base = Url::parse(base_url).ok();
    let mut w = Writer {
        base,
        preserve_tags,
        blocks: Vec::new(),
    };
    w.walk_blocks(doc.root_element());
    w.blocks.join("\n\n")
}

struct Writer<'a> {
    base: Option<Url>,
    preserve_tags: &'a [String],
    blocks: Vec<String>,
}

impl<'a> Writer<'a> {
    fn push_block(&mut self, block: String) {
        let trimmed = block.trim().to_string();
        if !trimmed.is_empty() {
            self.blocks.push(trimmed);
        }
    }

    fn resolve(&self, href: &str) -> String {
        match &self.base {
            Some(base) => base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        }
    }

    /// Walk container content, emitting one markdown block per block-level
    /// child. Loose inline content between blocks accumulates into
    /// synthetic paragraphs.
    fn walk_blocks(&mut self, el: ElementRef<'_>) {
        let mut pending_inline = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(t) => {
                    push_inline_text(&mut pending_inline, &t.text);
                }
                Node::Element(_) => {
                    let child_el = ElementRef::wrap(child).expect("element node");
                    let tag = child_el.value().name();
                    if self.preserve_tags.iter().any(|p| p == tag) {
                        self.flush_inline(&mut pending_inline);
                        self.push_block(child_el.html());
                    } else if is_block_tag(tag) {
                        self.flush_inline(&mut pending_inline);
                        self.block_element(child_el);
                    } else {
                        push_inline_fragment(
                            &mut pending_inline,
                            &self.inline_element(child_el),
                        );
                    }
                }
                _ => {}
            }
        }
        self.flush_inline(&mut pending_inline);
    }

    fn flush_inline(&mut self, pending: &mut String) {
        if !pending.trim().is_empty() {
            let block = std::mem::take(pending);
            self.push_block(block);
        } else {
            pending.clear();
        }
    }

    fn block_element(&mut self, el: ElementRef<'_>) {
        let tag = el.value().name();
        match tag {
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = tag[1..].parse::<usize>().unwrap_or(1);
                let text = self.inline_children(el);
                self.push_block(format!("{} {}", "#".repeat(level), text));
            }
            "p" => {
                let text = self.inline_children(el);
                self.push_block(text);
            }
            "pre" => {
                let code = el.text().collect::<String>();
                self.push_block(format!("```\n{}\n```", code.trim_end()));
            }
            "blockquote" => {
                let inner = self.inline_children(el);
                let quoted = inner
                    .lines()
                    .map(|l| format!("> {l}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                self.push_block(quoted);
            }
            "ul" | "ol" => {
                let rendered = self.list(el, 0);
                self.push_block(rendered);
            }
            "hr" => self.push_block("---".to_string()),
            "table" => {
                let rendered = self.table(el);
                self.push_block(rendered);
            }
            // Generic containers recurse.
            _ => self.walk_blocks(el),
        }
    }

    fn list(&mut self, el: ElementRef<'_>, depth: usize) -> String {
        let ordered = el.value().name() == "ol";
        let indent = "  ".repeat(depth);
        let mut lines = Vec::new();
        let mut index = 0usize;
        for child in el.children() {
            let Some(item) = ElementRef::wrap(child) else {
                continue;
            };
            if item.value().name() != "li" {
                continue;
            }
            index += 1;
            let marker = if ordered {
                format!("{index}.")
            } else {
                "-".to_string()
            };

            let mut text = String::new();
            let mut nested = Vec::new();
            for li_child in item.children() {
                match li_child.value() {
                    Node::Text(t) => push_inline_text(&mut text, &t.text),
                    Node::Element(_) => {
                        let li_el = ElementRef::wrap(li_child).expect("element node");
                        match li_el.value().name() {
                            "ul" | "ol" => nested.push(self.list(li_el, depth + 1)),
                            _ => push_inline_fragment(&mut text, &self.inline_element(li_el)),
                        }
                    }
                    _ => {}
                }
            }
            lines.push(format!("{indent}{marker} {}", text.trim()));
            lines.extend(nested);
        }
        lines.join("\n")
    }

    fn table(&mut self, el: ElementRef<'_>) -> String {
        let row_sel = Selector::parse("tr").expect("static selector");
        let cell_sel = Selector::parse("th, td").expect("static selector");
        let mut lines = Vec::new();
        for (i, row) in el.select(&row_sel).enumerate() {
            let cells: Vec<String> = row
                .select(&cell_sel)
                .map(|c| self.inline_children(c).trim().to_string())
                .collect();
            if cells.is_empty() {
                continue;
            }
            lines.push(format!("| {} |", cells.join(" | ")));
            if i == 0 {
                lines.push(format!(
                    "|{}|",
                    cells.iter().map(|_| " --- ").collect::<Vec<_>>().join("|")
                ));
            }
        }
        lines.join("\n")
    }

    /// Inline markdown for all children of `el`.
    fn inline_children(&mut self, el: ElementRef<'_>) -> String {
        let mut out = String::new();
        for child in el.children() {
            match child.value() {
                Node::Text(t) => push_inline_text(&mut out, &t.text),
                Node::Element(_) => {
                    let child_el = ElementRef::wrap(child).expect("element node");
                    push_inline_fragment(&mut out, &self.inline_element(child_el));
                }
                _ => {}
            }
        }
        out.trim().to_string()
    }

    fn inline_element(&mut self, el: ElementRef<'_>) -> String {
        let tag = el.value().name();
        if self.preserve_tags.iter().any(|p| p == tag) {
            return el.html();
        }
        match tag {
            "b" | "strong" => format!("**{}**", self.inline_children(el)),
            "i" | "em" => format!("*{}*", self.inline_children(el)),
            "code" => format!("`{}`", el.text().collect::<String>().trim()),
            "a" => {
                let text = self.inline_children(el);
                match el.value().attr("href") {
                    Some(href) => format!("[{}]({})", text, self.resolve(href)),
                    None => text,
                }
            }
            "img" => {
                let alt = el.value().attr("alt").unwrap_or_default();
                match el.value().attr("src") {
                    Some(src) => format!("![{}]({})", alt, self.resolve(src)),
                    None => String::new(),
                }
            }
            "br" => "\n".to_string(),
            // Unknown inline wrappers contribute their content.
            _ => self.inline_children(el),
        }
    }
}

fn is_block_tag(tag: &str) -> bool {
    matches!(
        tag,
        "html"
            | "body"
            | "div"
            | "section"
            | "article"
            | "main"
            | "aside"
            | "header"
            | "footer"
            | "nav"
            | "p"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "ul"
            | "ol"
            | "pre"
            | "blockquote"
            | "hr"
            | "table"
            | "figure"
            | "figcaption"
            | "form"
            | "fieldset"
    )
}

fn push_inline_text(out: &mut String, text: &str) {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return;
    }
    if !out.is_empty() && !out.ends_with([' ', '\n']) && text.starts_with(char::is_whitespace) {
        out.push(' ');
    } else if !out.is_empty() && !out.ends_with([' ', '\n']) {
        out.push(' ');
    }
    out.push_str(&normalized);
    if text.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn push_inline_fragment(out: &mut String, fragment: &str) {
    if fragment.is_empty() {
        return;
    }
    if !out.is_empty() && !out.ends_with([' ', '\n']) {
        out.push(' ');
    }
    out.push_str(fragment);
}

fn word_count(s: &str) -> usize {
    s.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com/docs/";

    fn raw(html: &str) -> String {
        html_to_markdown(html, BASE, &[])
    }

    #[test]
    fn headings_paragraphs_and_emphasis() {
        let md = raw("<h2>Title Here</h2><p>Some <b>bold</b> and <em>soft</em> words.</p>");
        assert!(md.contains("## Title Here"));
        assert!(md.contains("**bold**"));
        assert!(md.contains("*soft*"));
    }

    #[test]
    fn code_spans_and_fenced_blocks() {
        let md = raw("<p>Run <code>cargo test</code> now.</p><pre>fn main() {}\n</pre>");
        assert!(md.contains("`cargo test`"));
        assert!(md.contains("```\nfn main() {}\n```"));
    }

    #[test]
    fn links_and_images_resolve_against_base() {
        let md = raw(r#"<p><a href="guide">The guide</a></p><p><img src="/img/x.png" alt="pic"></p>"#);
        assert!(md.contains("[The guide](https://example.com/docs/guide)"), "{md}");
        assert!(md.contains("![pic](https://example.com/img/x.png)"), "{md}");
    }

    #[test]
    fn lists_render_with_markers_and_nesting() {
        let md = raw("<ul><li>alpha</li><li>beta<ul><li>nested</li></ul></li></ul><ol><li>one</li><li>two</li></ol>");
        assert!(md.contains("- alpha"));
        assert!(md.contains("- beta"));
        assert!(md.contains("  - nested"));
        assert!(md.contains("1. one"));
        assert!(md.contains("2. two"));
    }

    #[test]
    fn blockquote_and_hr() {
        let md = raw("<blockquote>wise words</blockquote><hr>");
        assert!(md.contains("> wise words"));
        assert!(md.contains("---"));
    }

    #[test]
    fn tables_render_rows() {
        let md = raw("<table><tr><th>Name</th><th>Price</th></tr><tr><td>Widget</td><td>$10</td></tr></table>");
        assert!(md.contains("| Name | Price |"));
        assert!(md.contains("| --- | --- |"));
        assert!(md.contains("| Widget | $10 |"));
    }

    #[test]
    fn bare_text_becomes_a_paragraph() {
        let md = raw("<html><body>ok</body></html>");
        assert_eq!(md, "ok");
    }

    #[test]
    fn preserved_tags_pass_through_verbatim() {
        let md = html_to_markdown(
            "<p>before</p><math><mi>x</mi></math>",
            BASE,
            &["math".to_string()],
        );
        assert!(md.contains("<math><mi>x</mi></math>"), "{md}");
        assert!(md.contains("before"));
    }

    #[test]
    fn pruning_filter_drops_link_farms_and_stubs() {
        let html = r#"<body>
            <h1>Article</h1>
            <p>This substantial paragraph carries the actual content of the page in question.</p>
            <p><a href="/1">one</a> <a href="/2">two</a> <a href="/3">three</a></p>
            <p>tiny</p>
        </body>"#;
        let fit = PruningFilter::default().filter(html);
        assert!(fit.contains("substantial paragraph"));
        assert!(fit.contains("Article"));
        assert!(!fit.contains(">tiny<"));
        assert!(!fit.contains("href=\"/1\""));
    }

    #[test]
    fn generator_produces_all_three_renditions() {
        let html = r#"<body>
            <h1>Doc</h1>
            <p>A real paragraph with enough words to clear the pruning filter easily.</p>
            <p><a href="/a">a</a> <a href="/b">b</a></p>
        </body>"#;
        let gen = MarkdownGenerator::default();
        let result = gen.generate(html, BASE);
        assert!(result.raw_markdown.contains("# Doc"));
        assert!(result.raw_markdown.contains("[a](https://example.com/a)"));
        assert!(result.fit_markdown.contains("real paragraph"));
        assert!(!result.fit_markdown.contains("[a]"));
        assert!(result.fit_html.contains("real paragraph"));
    }

    #[test]
    fn passthrough_filter_keeps_everything() {
        let gen = MarkdownGenerator {
            content_filter: ContentFilter::Passthrough,
            preserve_tags: Vec::new(),
        };
        let result = gen.generate("<p>x y z</p>", BASE);
        assert_eq!(result.fit_html, "<p>x y z</p>");
        assert_eq!(result.raw_markdown, result.fit_markdown);
    }

    #[test]
    fn plugin_filter_is_applied() {
        let gen = MarkdownGenerator {
            content_filter: ContentFilter::Plugin(Arc::new(|_html| {
                "<p>replaced entirely by plugin</p>".to_string()
            })),
            preserve_tags: Vec::new(),
        };
        let result = gen.generate("<p>original</p>", BASE);
        assert!(result.fit_markdown.contains("replaced entirely by plugin"));
    }
}
