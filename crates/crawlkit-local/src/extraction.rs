//! Structured extraction over cleaned crawl content.
//!
//! One tagged union, one arm per built-in strategy plus a plugin arm holding
//! a caller-supplied function. The pipeline feeds each strategy the content
//! format it declares (`markdown`, `html`, or `fit_markdown`) pre-chunked
//! into sections, and persists whatever JSON records come back.

use crawlkit_core::{Error, Result};
use regex::RegexBuilder;
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Content rendition a strategy consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Markdown,
    Html,
    FitMarkdown,
}

/// Built-in labeled span patterns for [`RegexExtraction`].
pub const BUILTIN_PATTERNS: &[(&str, &str)] = &[
    ("email", r"[\w.+-]+@[\w-]+\.[\w.-]+"),
    ("phone_intl", r"\+?\d[\d .()-]{7,}\d"),
    ("phone_us", r"\(?\d{3}\)?[ -.]?\d{3}[ -.]?\d{4}"),
    ("url", r#"https?://[^\s"'<>]+"#),
    ("ipv4", r"(?:\d{1,3}\.){3}\d{1,3}"),
    ("ipv6", r"[A-F0-9]{1,4}(?::[A-F0-9]{1,4}){7}"),
    (
        "uuid",
        r"[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}",
    ),
    ("currency", r"(?:USD|EUR|RM|\$|€|£)\s?\d+(?:[.,]\d{2})?"),
    ("percentage", r"\d+(?:\.\d+)?%"),
    ("number", r"\b\d{1,3}(?:[,.\s]\d{3})*(?:\.\d+)?\b"),
    ("date_iso", r"\d{4}-\d{2}-\d{2}"),
    ("date_us", r"\d{1,2}/\d{1,2}/\d{2,4}"),
    ("time_24h", r"\b(?:[01]?\d|2[0-3]):[0-5]\d(?:[:.][0-5]\d)?\b"),
    ("postal_us", r"\b\d{5}(?:-\d{4})?\b"),
    ("postal_uk", r"\b[A-Z]{1,2}\d[A-Z\d]? ?\d[A-Z]{2}\b"),
    ("html_color_hex", r"#[0-9A-Fa-f]{6}\b"),
    ("twitter_handle", r"@\w{1,15}"),
    ("hashtag", r"#[\w-]+"),
    ("mac_addr", r"(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}"),
    ("iban", r"[A-Z]{2}\d{2}[A-Z0-9]{11,30}"),
    (
        "credit_card",
        r"\b(?:4\d{12}(?:\d{3})?|5[1-5]\d{14}|3[47]\d{13}|6(?:011|5\d{2})\d{12})\b",
    ),
];

#[derive(Clone)]
pub enum ExtractionStrategy {
    /// Pass sections through unchanged.
    NoExtraction,
    Regex(RegexExtraction),
    JsonCss(JsonCssExtraction),
    Cosine(CosineExtraction),
    Llm(LlmExtraction),
    /// Registered out-of-tree strategy.
    Plugin(PluginExtraction),
}

impl Default for ExtractionStrategy {
    fn default() -> Self {
        ExtractionStrategy::NoExtraction
    }
}

impl std::fmt::Debug for ExtractionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractionStrategy::NoExtraction => f.write_str("NoExtraction"),
            ExtractionStrategy::Regex(_) => f.write_str("Regex"),
            ExtractionStrategy::JsonCss(_) => f.write_str("JsonCss"),
            ExtractionStrategy::Cosine(_) => f.write_str("Cosine"),
            ExtractionStrategy::Llm(_) => f.write_str("Llm"),
            ExtractionStrategy::Plugin(p) => write!(f, "Plugin({})", p.name),
        }
    }
}

impl ExtractionStrategy {
    pub fn input_format(&self) -> InputFormat {
        match self {
            ExtractionStrategy::NoExtraction => InputFormat::Markdown,
            ExtractionStrategy::Regex(r) => r.input_format,
            ExtractionStrategy::JsonCss(_) => InputFormat::Html,
            ExtractionStrategy::Cosine(c) => c.input_format,
            ExtractionStrategy::Llm(l) => l.input_format,
            ExtractionStrategy::Plugin(p) => p.input_format,
        }
    }

    /// True when running this strategy does real work worth caching.
    pub fn is_noop(&self) -> bool {
        matches!(self, ExtractionStrategy::NoExtraction)
    }

    pub async fn run(&self, url: &str, sections: &[String]) -> Result<Vec<Value>> {
        match self {
            ExtractionStrategy::NoExtraction => Ok(sections
                .iter()
                .enumerate()
                .map(|(i, s)| json!({ "index": i, "content": s }))
                .collect()),
            ExtractionStrategy::Regex(r) => Ok(r.extract(url, sections)),
            ExtractionStrategy::JsonCss(c) => c.extract(sections),
            ExtractionStrategy::Cosine(c) => Ok(c.extract(sections)),
            ExtractionStrategy::Llm(l) => l.extract(url, sections).await,
            ExtractionStrategy::Plugin(p) => (p.func)(url, sections),
        }
    }
}

// ---------------------------------------------------------------------------
// Regex
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct RegexExtraction {
    patterns: Vec<(String, regex::Regex)>,
    pub input_format: InputFormat,
}

impl RegexExtraction {
    /// Strategy over a subset of the built-in catalog; `labels` empty means
    /// the whole catalog.
    pub fn builtin(labels: &[&str]) -> Self {
        let patterns = BUILTIN_PATTERNS
            .iter()
            .filter(|(label, _)| labels.is_empty() || labels.contains(label))
            .filter_map(|(label, pattern)| {
                compile_pattern(pattern).map(|re| (label.to_string(), re))
            })
            .collect();
        Self {
            patterns,
            input_format: InputFormat::FitMarkdown,
        }
    }

    /// Add a user-supplied pattern. Patterns that fail to compile are
    /// recompiled with their control characters escaped; if that still
    /// fails the pattern is matched literally.
    pub fn with_custom(mut self, label: &str, pattern: &str) -> Self {
        if let Some(re) = compile_user_pattern(pattern) {
            self.patterns.push((label.to_string(), re));
        }
        self
    }

    fn extract(&self, url: &str, sections: &[String]) -> Vec<Value> {
        let text = sections.join("\n");
        let mut out = Vec::new();
        for (label, re) in &self.patterns {
            for m in re.find_iter(&text) {
                out.push(json!({
                    "url": url,
                    "label": label,
                    "value": m.as_str(),
                    "span": [m.start(), m.end()],
                }));
            }
        }
        out
    }
}

fn compile_pattern(pattern: &str) -> Option<regex::Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .multi_line(true)
        .build()
        .ok()
}

fn compile_user_pattern(pattern: &str) -> Option<regex::Regex> {
    if let Some(re) = compile_pattern(pattern) {
        return Some(re);
    }
    // Stray control characters are the common source of bad user patterns.
    let cleaned: String = pattern.chars().filter(|c| !c.is_control()).collect();
    if let Some(re) = compile_pattern(&cleaned) {
        return Some(re);
    }
    compile_pattern(&regex::escape(&cleaned))
}

// ---------------------------------------------------------------------------
// CSS JSON schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct JsonCssSchema {
    #[serde(rename = "baseSelector")]
    pub base_selector: String,
    #[serde(rename = "baseFields", default)]
    pub base_fields: Vec<FieldSpec>,
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default)]
    pub attribute: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub transform: Option<Transform>,
    #[serde(default)]
    pub default: Option<Value>,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Attribute,
    Html,
    Regex,
    Nested,
    List,
    NestedList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transform {
    Lowercase,
    Uppercase,
    Strip,
}

#[derive(Debug, Clone)]
pub struct JsonCssExtraction {
    pub schema: JsonCssSchema,
}

impl JsonCssExtraction {
    pub fn new(schema: JsonCssSchema) -> Self {
        Self { schema }
    }

    pub fn from_value(schema: Value) -> Result<Self> {
        let schema: JsonCssSchema =
            serde_json::from_value(schema).map_err(|e| Error::InvalidSelector(e.to_string()))?;
        Ok(Self { schema })
    }

    fn extract(&self, sections: &[String]) -> Result<Vec<Value>> {
        let doc = Html::parse_document(&sections.join("\n"));
        let base = parse_selector(&self.schema.base_selector)?;

        let mut out = Vec::new();
        for element in doc.select(&base) {
            let mut item = Map::new();
            for field in &self.schema.base_fields {
                if let Some(v) = extract_field(element, field) {
                    item.insert(field.name.clone(), v);
                }
            }
            for field in &self.schema.fields {
                if let Some(v) = extract_field(element, field) {
                    item.insert(field.name.clone(), v);
                }
            }
            if !item.is_empty() {
                out.push(Value::Object(item));
            }
        }
        Ok(out)
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| Error::InvalidSelector(format!("{s}: {e}")))
}

/// Resolve `selector` relative to `element`.
///
/// Plain selectors search descendants. A leading sibling combinator (`+` or
/// `~`) is applied against the element's tail siblings: the first compound of
/// the selector must match a following sibling (the immediate one for `+`),
/// and any remainder searches inside that sibling. Applying the combinator to
/// the whole document instead would match rows from unrelated subtrees.
fn select_relative<'a>(element: ElementRef<'a>, selector: &str) -> Result<Vec<ElementRef<'a>>> {
    let trimmed = selector.trim();
    let (combinator, rest) = match trimmed.chars().next() {
        Some('+') => ('+', trimmed[1..].trim()),
        Some('~') => ('~', trimmed[1..].trim()),
        _ => {
            let sel = parse_selector(trimmed)?;
            return Ok(element.select(&sel).collect());
        }
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let compound = parts.next().unwrap_or_default();
    let remainder = parts.next().map(str::trim).unwrap_or_default();
    let compound_sel = parse_selector(compound)?;

    let siblings: Vec<ElementRef<'a>> = element
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .collect();

    let mut matched = Vec::new();
    for (i, sib) in siblings.into_iter().enumerate() {
        if combinator == '+' && i > 0 {
            break;
        }
        if compound_sel.matches(&sib) {
            matched.push(sib);
        }
    }

    if remainder.is_empty() {
        return Ok(matched);
    }
    let rest_sel = parse_selector(remainder)?;
    Ok(matched
        .into_iter()
        .flat_map(|m| m.select(&rest_sel).collect::<Vec<_>>())
        .collect())
}

fn extract_field(element: ElementRef<'_>, field: &FieldSpec) -> Option<Value> {
    let result = match field.kind {
        FieldKind::Nested => {
            let target = field
                .selector
                .as_deref()
                .and_then(|s| select_relative(element, s).ok())
                .and_then(|v| v.into_iter().next());
            target.map(|el| {
                let mut obj = Map::new();
                for f in &field.fields {
                    if let Some(v) = extract_field(el, f) {
                        obj.insert(f.name.clone(), v);
                    }
                }
                Value::Object(obj)
            })
        }
        FieldKind::List | FieldKind::NestedList => {
            let targets = field
                .selector
                .as_deref()
                .and_then(|s| select_relative(element, s).ok())
                .unwrap_or_default();
            if targets.is_empty() {
                None
            } else {
                Some(Value::Array(
                    targets
                        .into_iter()
                        .map(|el| {
                            let mut obj = Map::new();
                            for f in &field.fields {
                                if let Some(v) = extract_field(el, f) {
                                    obj.insert(f.name.clone(), v);
                                }
                            }
                            Value::Object(obj)
                        })
                        .collect(),
                ))
            }
        }
        _ => extract_scalar(element, field),
    };

    result.or_else(|| field.default.clone())
}

fn extract_scalar(element: ElementRef<'_>, field: &FieldSpec) -> Option<Value> {
    let target = match field.selector.as_deref() {
        Some(sel) => select_relative(element, sel).ok()?.into_iter().next()?,
        None => element,
    };

    let raw = match field.kind {
        FieldKind::Text => Some(normalize_ws(&target.text().collect::<String>())),
        FieldKind::Attribute => field
            .attribute
            .as_deref()
            .and_then(|a| target.value().attr(a))
            .map(|s| s.to_string()),
        FieldKind::Html => Some(target.html()),
        FieldKind::Regex => {
            let pattern = field.pattern.as_deref()?;
            let re = compile_user_pattern(pattern)?;
            let text = normalize_ws(&target.text().collect::<String>());
            re.captures(&text)
                .and_then(|c| c.get(1).or_else(|| c.get(0)))
                .map(|m| m.as_str().to_string())
        }
        _ => None,
    }?;

    let transformed = match field.transform {
        Some(Transform::Lowercase) => raw.to_lowercase(),
        Some(Transform::Uppercase) => raw.to_uppercase(),
        Some(Transform::Strip) => raw.trim().to_string(),
        None => raw,
    };
    Some(Value::String(transformed))
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Cosine clustering
// ---------------------------------------------------------------------------

/// Pluggable text embedding backend for [`CosineExtraction`].
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>>;
}

/// Deterministic hashed term-frequency embedding. Crude but dependency-free;
/// swap in a model-backed [`Embedder`] for semantic quality.
pub struct TfEmbedder {
    dims: usize,
}

impl Default for TfEmbedder {
    fn default() -> Self {
        Self { dims: 256 }
    }
}

impl Embedder for TfEmbedder {
    fn embed(&self, texts: &[String]) -> Vec<Vec<f32>> {
        texts
            .iter()
            .map(|t| {
                let mut v = vec![0f32; self.dims];
                for word in t.to_lowercase().split_whitespace() {
                    let h = xxhash_rust::xxh64::xxh64(word.as_bytes(), 0);
                    v[(h % self.dims as u64) as usize] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in v.iter_mut() {
                        *x /= norm;
                    }
                }
                v
            })
            .collect()
    }
}

#[derive(Clone)]
pub struct CosineExtraction {
    pub threshold: f32,
    pub input_format: InputFormat,
    embedder: Arc<dyn Embedder>,
}

impl CosineExtraction {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            input_format: InputFormat::Markdown,
            embedder: Arc::new(TfEmbedder::default()),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = embedder;
        self
    }

    fn extract(&self, sections: &[String]) -> Vec<Value> {
        let sections: Vec<String> = sections
            .iter()
            .filter(|s| !s.trim().is_empty())
            .cloned()
            .collect();
        if sections.is_empty() {
            return Vec::new();
        }
        let vectors = self.embedder.embed(&sections);

        // Greedy single-pass clustering against running centroids.
        let mut centroids: Vec<Vec<f32>> = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        for (i, v) in vectors.iter().enumerate() {
            let best = centroids
                .iter()
                .enumerate()
                .map(|(c, centroid)| (c, cosine(v, centroid)))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            match best {
                Some((c, sim)) if sim >= self.threshold => {
                    members[c].push(i);
                    let n = members[c].len() as f32;
                    for (slot, x) in centroids[c].iter_mut().zip(v) {
                        *slot += (x - *slot) / n;
                    }
                }
                _ => {
                    centroids.push(v.clone());
                    members.push(vec![i]);
                }
            }
        }

        members
            .into_iter()
            .enumerate()
            .map(|(c, idxs)| {
                let texts: Vec<&str> = idxs.iter().map(|&i| sections[i].as_str()).collect();
                json!({
                    "cluster": c,
                    "label": cluster_label(&texts),
                    "sections": texts,
                })
            })
            .collect()
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>()
        / (a.iter().map(|x| x * x).sum::<f32>().sqrt()
            * b.iter().map(|x| x * x).sum::<f32>().sqrt())
        .max(f32::EPSILON)
}

/// Three most frequent words of length >= 4 across the cluster.
fn cluster_label(texts: &[&str]) -> String {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for t in texts {
        for w in t.to_lowercase().split_whitespace() {
            let w: String = w.chars().filter(|c| c.is_alphanumeric()).collect();
            if w.len() >= 4 {
                *counts.entry(w).or_default() += 1;
            }
        }
    }
    let mut sorted: Vec<(String, usize)> = counts.into_iter().collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted
        .into_iter()
        .take(3)
        .map(|(w, _)| w)
        .collect::<Vec<_>>()
        .join(" ")
}

// ---------------------------------------------------------------------------
// LLM-backed extraction
// ---------------------------------------------------------------------------

/// Response message from an LLM provider. Providers differ in where usable
/// content lands, hence the multiple slots.
#[derive(Debug, Clone, Default)]
pub struct LlmMessage {
    pub content: Option<Value>,
    pub reasoning_content: Option<Value>,
    /// Provider-specific refusal payload.
    pub refusal: Option<Value>,
}

impl LlmMessage {
    /// First non-falsy slot along `content -> reasoning_content -> refusal`.
    ///
    /// A present-but-falsy value (empty string, 0, false, null) falls through
    /// to the next source rather than masking it.
    pub fn usable_content(&self) -> Option<&Value> {
        [&self.content, &self.reasoning_content, &self.refusal]
            .into_iter()
            .flatten()
            .find(|v| is_truthy(v))
    }
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(_) => true,
    }
}

/// Minimal LLM provider seam; the concrete client lives outside this crate.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<LlmMessage>;
}

#[derive(Clone)]
pub struct LlmExtraction {
    provider: Arc<dyn LlmProvider>,
    pub instruction: String,
    pub input_format: InputFormat,
}

const PROMPT_TEMPLATE: &str = "Extract structured records from the content below.\n\
Instruction: {instruction}\n\
URL: {url}\n\
Content:\n{content}\n\
Respond with a JSON array of records.";

impl LlmExtraction {
    pub fn new(provider: Arc<dyn LlmProvider>, instruction: impl Into<String>) -> Self {
        Self {
            provider,
            instruction: instruction.into(),
            input_format: InputFormat::Markdown,
        }
    }

    async fn extract(&self, url: &str, sections: &[String]) -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for section in sections {
            let prompt = PROMPT_TEMPLATE
                .replace("{instruction}", &self.instruction)
                .replace("{url}", url)
                .replace("{content}", section);
            let message = self.provider.complete(&prompt).await?;
            let Some(content) = message.usable_content() else {
                continue;
            };
            match content {
                Value::String(s) => match serde_json::from_str::<Value>(s) {
                    Ok(Value::Array(records)) => out.extend(records),
                    Ok(v) => out.push(v),
                    Err(_) => out.push(json!({ "content": s })),
                },
                Value::Array(records) => out.extend(records.clone()),
                other => out.push(other.clone()),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Plugin
// ---------------------------------------------------------------------------

pub type PluginFn = Arc<dyn Fn(&str, &[String]) -> Result<Vec<Value>> + Send + Sync>;

#[derive(Clone)]
pub struct PluginExtraction {
    pub name: String,
    pub input_format: InputFormat,
    pub func: PluginFn,
    /// Opaque configuration the plugin may consult.
    pub config: Value,
}
