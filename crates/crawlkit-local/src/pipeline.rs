//! The per-URL crawl pipeline and its batch and deep-crawl entry points.
//!
//! `arun` is an ordered chain: normalize, robots gate, cache read (+SMART
//! validation), fetch, scrape, markdown, extract, cache write. Each stage
//! returns a `Result`; the first failure short-circuits and is converted
//! into a failed `CrawlResult` carrying stage and source-location context.
//! Nothing escapes `arun` as an error.

use crate::cache::CacheContext;
use crate::config::CrawlerRunConfig;
use crate::content_store::{ContentKind, ContentStore};
use crate::deep_crawl::Frontier;
use crate::dispatcher::MemoryAdaptiveDispatcher;
use crate::extraction::InputFormat;
use crate::fetcher::HttpFetcher;
use crate::fingerprint::compute_head_fingerprint;
use crate::metadata_store::{CacheEntry, MetadataStore};
use crate::rate_limit::RateLimiter;
use crate::robots::RobotsChecker;
use crate::urls::{self, NormalizeOptions};
use crate::validator::{CacheValidator, ValidationStatus};
use crawlkit_core::{CrawlResult, Error, FetchResponse, Fetcher, Links, Media, Result};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (compatible; Crawlkit/1.0)";

/// A stage error plus where it was raised, for the bounded diagnostic line
/// in failed results.
struct StageFailure {
    stage: &'static str,
    file: &'static str,
    line: u32,
    error: Error,
}

impl StageFailure {
    fn message(&self) -> String {
        format!(
            "{} stage failed at {}:{}: {}",
            self.stage, self.file, self.line, self.error
        )
    }
}

trait StageCtx<T> {
    fn stage(self, stage: &'static str) -> std::result::Result<T, StageFailure>;
}

impl<T> StageCtx<T> for Result<T> {
    #[track_caller]
    fn stage(self, stage: &'static str) -> std::result::Result<T, StageFailure> {
        self.map_err(|error| {
            let loc = std::panic::Location::caller();
            StageFailure {
                stage,
                file: loc.file(),
                line: loc.line(),
                error,
            }
        })
    }
}

/// All state a crawl needs: the stores, the robots gate, the validator, and
/// the fetchers. Construct one per cache root; it is cheap to share behind
/// an `Arc`.
pub struct CrawlerCore {
    content_store: ContentStore,
    metadata_store: MetadataStore,
    robots: RobotsChecker,
    validator: CacheValidator,
    http_fetcher: Arc<dyn Fetcher>,
    browser_fetcher: Option<Arc<dyn Fetcher>>,
    pub always_bypass_cache: bool,
}

impl CrawlerCore {
    /// Open under the default base directory
    /// (`CRAWL4_AI_BASE_DIRECTORY`, falling back to the home directory).
    pub fn new() -> Result<Self> {
        Self::with_base_dir(&crate::default_base_directory())
    }

    /// Open the cache layout under `<base>/.crawl4ai/`.
    pub fn with_base_dir(base: &Path) -> Result<Self> {
        let root = base.join(".crawl4ai");
        std::fs::create_dir_all(&root).map_err(|e| Error::CacheIo(e.to_string()))?;
        Ok(Self {
            content_store: ContentStore::new(&root)?,
            metadata_store: MetadataStore::open(&root.join("crawl4ai.db"))?,
            robots: RobotsChecker::open(&root.join("robots"), None)?,
            validator: CacheValidator::new(Some(Duration::from_secs(10)), None)?,
            http_fetcher: Arc::new(HttpFetcher::new()?),
            browser_fetcher: None,
            always_bypass_cache: false,
        })
    }

    /// Install a browser-automation backend; runs needing JavaScript,
    /// screenshots, or PDFs route to it.
    pub fn with_browser_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.browser_fetcher = Some(fetcher);
        self
    }

    fn fetcher_for(&self) -> Arc<dyn Fetcher> {
        match &self.browser_fetcher {
            Some(browser) => Arc::clone(browser),
            None => Arc::clone(&self.http_fetcher),
        }
    }

    /// Crawl a single URL (`http(s)://`, `file://`, or `raw://`).
    pub async fn arun(&self, url: &str, cfg: &CrawlerRunConfig) -> CrawlResult {
        self.arun_with_cancel(url, cfg, CancellationToken::new()).await
    }

    pub async fn arun_with_cancel(
        &self,
        url: &str,
        cfg: &CrawlerRunConfig,
        cancel: CancellationToken,
    ) -> CrawlResult {
        let started = Instant::now();
        match self.run_one(url, cfg, &cancel).await {
            Ok(result) => {
                tracing::info!(
                    url = %display_url(url),
                    status = result.status_code,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "crawl complete"
                );
                result
            }
            Err(failure) => {
                tracing::error!(
                    url = %display_url(url),
                    stage = failure.stage,
                    error = %failure.error,
                    "crawl failed"
                );
                let mut result = CrawlResult::failure(url, failure.message());
                result.status_code = failure.error.status_code();
                result.session_id = cfg.session_id.clone();
                if matches!(failure.error, Error::RobotsDenied(_)) {
                    result.error_message = Some("Access denied by robots.txt".to_string());
                    result.response_headers.insert(
                        "X-Robots-Status".to_string(),
                        "Blocked by robots.txt".to_string(),
                    );
                }
                if matches!(failure.error, Error::Cancelled) {
                    result.error_message = Some("crawl cancelled".to_string());
                }
                result
            }
        }
    }

    async fn run_one(
        &self,
        url: &str,
        cfg: &CrawlerRunConfig,
        cancel: &CancellationToken,
    ) -> std::result::Result<CrawlResult, StageFailure> {
        // Stage 1: initialize.
        if url.trim().is_empty() {
            return Err(Error::InvalidUrl("empty url".to_string())).stage("initialize");
        }
        let is_web = url.starts_with("http://") || url.starts_with("https://");
        let target = if is_web {
            let norm_opts = NormalizeOptions {
                extra_drop_params: cfg.extra_drop_params.clone(),
                ..Default::default()
            };
            urls::normalize(url, url, &norm_opts)
                .stage("initialize")?
                .unwrap_or_else(|| url.to_string())
        } else {
            url.to_string()
        };
        let cache_ctx = CacheContext::new(&target, cfg.cache_mode, self.always_bypass_cache);

        // Stage 2: robots gate.
        if cfg.check_robots_txt && is_web {
            let ua = cfg.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
            if !self.robots.can_fetch(&target, ua).await {
                return Err(Error::RobotsDenied(target.clone())).stage("robots");
            }
        }

        // Stage 3: cache read.
        let mut cached: Option<(CrawlResult, CacheEntry)> = None;
        if cache_ctx.should_read() {
            // Cache IO failures downgrade to a fresh fetch.
            match self.metadata_store.get(&target).await {
                Ok(Some(entry)) => match self.materialize(&entry, cfg).await {
                    Ok(Some(result)) => {
                        let missing_artifact = (cfg.screenshot && result.screenshot.is_none())
                            || (cfg.pdf && result.pdf.is_none());
                        if !missing_artifact && !result.html.is_empty() {
                            cached = Some((result, entry));
                        }
                    }
                    Ok(None) => {}
                    Err(e) => {
                        tracing::warn!(url = %target, error = %e, "cache materialization failed");
                    }
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(url = %target, error = %e, "cache lookup failed");
                }
            }
        }

        if let Some((mut result, entry)) = cached {
            if !cache_ctx.should_validate() {
                tracing::debug!(url = %target, "cache hit");
                result.session_id = cfg.session_id.clone();
                return Ok(result);
            }

            let report = self
                .validator
                .validate(
                    &target,
                    entry.etag.as_deref(),
                    entry.last_modified.as_deref(),
                    entry.head_fingerprint.as_deref(),
                )
                .await;
            if report.status == ValidationStatus::Fresh {
                // Refresh validator metadata opportunistically; failures
                // here must not cost us the fresh hit.
                let mut refreshed = entry;
                let mut changed = false;
                if let Some(etag) = report.new_etag {
                    changed |= refreshed.etag.as_deref() != Some(etag.as_str());
                    refreshed.etag = Some(etag);
                }
                if let Some(lm) = report.new_last_modified {
                    changed |= refreshed.last_modified.as_deref() != Some(lm.as_str());
                    refreshed.last_modified = Some(lm);
                }
                if let Some(fp) = report.new_head_fingerprint {
                    changed |= refreshed.head_fingerprint.as_deref() != Some(fp.as_str());
                    refreshed.head_fingerprint = Some(fp);
                }
                if changed {
                    if let Err(e) = self.metadata_store.put(refreshed).await {
                        tracing::warn!(url = %target, error = %e, "validator metadata refresh failed");
                    }
                }
                tracing::debug!(url = %target, reason = %report.reason, "cache validated fresh");
                result.session_id = cfg.session_id.clone();
                return Ok(result);
            }
            tracing::debug!(url = %target, status = ?report.status, "cache not fresh, refetching");
        }

        // Stage 4: fetch.
        let fetcher = self.fetcher_for();
        let fetch_url = if is_web { target.as_str() } else { url };
        let fetch_opts = cfg.fetch_options();
        let response = tokio::select! {
            r = fetcher.fetch(fetch_url, &fetch_opts) => r.stage("fetch")?,
            _ = cancel.cancelled() => return Err(Error::Cancelled).stage("fetch"),
        };

        // Stage 5: scrape.
        let scraped = {
            let html = response.html.clone();
            let opts = cfg.scrape_options();
            let base = target.clone();
            tokio::task::spawn_blocking(move || crate::scrape::scrape(&base, &html, &opts))
                .await
                .map_err(|e| Error::Parse(format!("scrape task join: {e}")))
                .stage("scrape")?
                .stage("scrape")?
        };

        // Stage 6: markdown.
        let markdown = cfg
            .markdown_generator
            .generate(&scraped.cleaned_html, &target);

        // Stage 7: extraction.
        let extracted_content = if cfg.extraction_strategy.is_noop() {
            None
        } else {
            let input = match cfg.extraction_strategy.input_format() {
                InputFormat::Html => scraped.cleaned_html.clone(),
                InputFormat::Markdown => markdown.raw_markdown.clone(),
                InputFormat::FitMarkdown => {
                    if markdown.fit_markdown.trim().is_empty() {
                        markdown.raw_markdown.clone()
                    } else {
                        markdown.fit_markdown.clone()
                    }
                }
            };
            // HTML input stays whole: chunking would split tags mid-element.
            let sections = match cfg.extraction_strategy.input_format() {
                InputFormat::Html => vec![input],
                _ => cfg.chunking_strategy.chunk(&input),
            };
            let records = cfg
                .extraction_strategy
                .run(&target, &sections)
                .await
                .stage("extract")?;
            Some(serde_json::to_string(&records).unwrap_or_else(|_| "[]".to_string()))
        };

        // Stage 8: assemble + cache write.
        let mut result = CrawlResult {
            url: target.clone(),
            success: !response.html.is_empty(),
            html: response.html.clone(),
            cleaned_html: Some(scraped.cleaned_html),
            markdown: Some(markdown),
            media: scraped.media,
            links: scraped.links,
            metadata: scraped.metadata,
            extracted_content,
            screenshot: response.screenshot.clone(),
            pdf: response.pdf.clone(),
            status_code: Some(response.status_code),
            response_headers: response.response_headers.clone(),
            downloaded_files: response.downloaded_files.clone(),
            error_message: None,
            session_id: cfg.session_id.clone(),
        };
        if let Some(note) = scraped.note {
            result.metadata.insert("note".to_string(), json!(note));
        }

        if cache_ctx.should_write() && result.success {
            if let Err(e) = self.write_cache(&target, &result, &response).await {
                // A cache write failure is not a crawl failure.
                tracing::warn!(url = %target, error = %e, "cache write failed");
            }
        }

        Ok(result)
    }

    /// Rebuild a `CrawlResult` from a metadata row and its blobs.
    /// `None` when the HTML blob is missing.
    async fn materialize(
        &self,
        entry: &CacheEntry,
        cfg: &CrawlerRunConfig,
    ) -> Result<Option<CrawlResult>> {
        let Some(html) = self
            .content_store
            .load(ContentKind::Html, &entry.html_hash)
            .await?
        else {
            return Ok(None);
        };
        let cleaned_html = self
            .content_store
            .load(ContentKind::Cleaned, &entry.cleaned_html_hash)
            .await?
            .unwrap_or_default();
        let stored_markdown = self
            .content_store
            .load(ContentKind::Markdown, &entry.markdown_hash)
            .await?
            .unwrap_or_default();
        let extracted = self
            .content_store
            .load(ContentKind::Extracted, &entry.extracted_content_hash)
            .await?
            .unwrap_or_default();
        let screenshot = self
            .content_store
            .load(ContentKind::Screenshot, &entry.screenshot_hash)
            .await?
            .filter(|s| !s.is_empty());

        // Only the raw markdown is cached; the fit renditions are recomputed
        // from the cached cleaned HTML under the current filter.
        let mut markdown = cfg.markdown_generator.generate(&cleaned_html, &entry.url);
        if !stored_markdown.is_empty() {
            markdown.raw_markdown = stored_markdown;
        }

        let media: Media = serde_json::from_str(&entry.media).unwrap_or_default();
        let links: Links = serde_json::from_str(&entry.links).unwrap_or_default();
        let metadata = serde_json::from_str(&entry.metadata).unwrap_or_default();
        let response_headers = serde_json::from_str(&entry.response_headers).unwrap_or_default();
        let downloaded_files: Vec<String> =
            serde_json::from_str(&entry.downloaded_files).unwrap_or_default();

        Ok(Some(CrawlResult {
            url: entry.url.clone(),
            success: entry.success,
            html,
            cleaned_html: Some(cleaned_html),
            markdown: Some(markdown),
            media,
            links,
            metadata,
            extracted_content: Some(extracted).filter(|e| !e.is_empty() && e.as_str() != "[]"),
            screenshot,
            pdf: None,
            status_code: Some(200),
            response_headers,
            downloaded_files,
            error_message: None,
            session_id: None,
        }))
    }

    async fn write_cache(
        &self,
        url: &str,
        result: &CrawlResult,
        response: &FetchResponse,
    ) -> Result<()> {
        let mut entry = CacheEntry::new(url);
        entry.html_hash = self
            .content_store
            .store(ContentKind::Html, &result.html)
            .await?;
        entry.cleaned_html_hash = self
            .content_store
            .store(ContentKind::Cleaned, result.cleaned_html.as_deref().unwrap_or(""))
            .await?;
        entry.markdown_hash = self
            .content_store
            .store(
                ContentKind::Markdown,
                result
                    .markdown
                    .as_ref()
                    .map(|m| m.raw_markdown.as_str())
                    .unwrap_or(""),
            )
            .await?;
        entry.extracted_content_hash = self
            .content_store
            .store(
                ContentKind::Extracted,
                result.extracted_content.as_deref().unwrap_or(""),
            )
            .await?;
        entry.screenshot_hash = self
            .content_store
            .store(ContentKind::Screenshot, result.screenshot.as_deref().unwrap_or(""))
            .await?;

        entry.success = result.success;
        entry.media = serde_json::to_string(&result.media).unwrap_or_else(|_| "{}".into());
        entry.links = serde_json::to_string(&result.links).unwrap_or_else(|_| "{}".into());
        entry.metadata = serde_json::to_string(&result.metadata).unwrap_or_else(|_| "{}".into());
        entry.response_headers =
            serde_json::to_string(&result.response_headers).unwrap_or_else(|_| "{}".into());
        entry.downloaded_files =
            serde_json::to_string(&result.downloaded_files).unwrap_or_else(|_| "{}".into());

        entry.etag = lookup_header(&response.response_headers, "etag");
        entry.last_modified = lookup_header(&response.response_headers, "last-modified");
        entry.head_fingerprint =
            Some(compute_head_fingerprint(&result.html)).filter(|fp| !fp.is_empty());
        entry.cached_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs() as i64;

        self.metadata_store.put(entry).await
    }

    /// Crawl many URLs through the memory-adaptive dispatcher, buffered.
    pub async fn arun_many(
        self: &Arc<Self>,
        urls: &[String],
        cfg: &CrawlerRunConfig,
    ) -> Vec<CrawlResult> {
        use tokio_stream::StreamExt;
        let mut stream =
            self.arun_many_stream(urls.to_vec(), cfg.clone(), CancellationToken::new());
        let mut out = Vec::new();
        while let Some(result) = stream.next().await {
            out.push(result);
        }
        out
    }

    /// Streaming variant of [`CrawlerCore::arun_many`].
    pub fn arun_many_stream(
        self: &Arc<Self>,
        urls: Vec<String>,
        cfg: CrawlerRunConfig,
        cancel: CancellationToken,
    ) -> ReceiverStream<CrawlResult> {
        let limiter = Arc::new(RateLimiter::from_delays(cfg.mean_delay, cfg.max_range));
        let dispatcher = MemoryAdaptiveDispatcher::new(
            cfg.memory_threshold_percent,
            cfg.check_interval,
            cfg.max_session_permit,
            Some(limiter),
        );
        let core = Arc::clone(self);
        let cfg = Arc::new(cfg);
        let job_cancel = cancel.clone();
        dispatcher.run_stream(
            urls,
            move |url| {
                let core = Arc::clone(&core);
                let cfg = Arc::clone(&cfg);
                let cancel = job_cancel.clone();
                async move { core.arun_with_cancel(&url, &cfg, cancel).await }
            },
            cancel,
        )
    }

    /// Crawl `seed` and expand its links breadth- or depth-first under the
    /// configured budget, buffered.
    pub async fn run_deep(
        self: &Arc<Self>,
        seed: &str,
        cfg: &CrawlerRunConfig,
    ) -> Vec<CrawlResult> {
        use tokio_stream::StreamExt;
        let mut stream =
            self.run_deep_stream(seed.to_string(), cfg.clone(), CancellationToken::new());
        let mut out = Vec::new();
        while let Some(result) = stream.next().await {
            out.push(result);
        }
        out
    }

    /// Streaming variant of [`CrawlerCore::run_deep`].
    pub fn run_deep_stream(
        self: &Arc<Self>,
        seed: String,
        cfg: CrawlerRunConfig,
        cancel: CancellationToken,
    ) -> ReceiverStream<CrawlResult> {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let strategy = cfg.deep_crawl_strategy.clone().unwrap_or_default();
            let child_cfg = cfg.without_deep_crawl();
            let mut frontier = Frontier::new(strategy.order, strategy.max_depth);
            frontier.push(&seed, 0);

            let mut pages = 0usize;
            while let Some((url, depth)) = frontier.pop() {
                if cancel.is_cancelled() {
                    break;
                }
                if strategy.max_pages.is_some_and(|max| pages >= max) {
                    tracing::debug!(pages, "deep crawl page budget reached");
                    break;
                }

                let mut result = core.arun_with_cancel(&url, &child_cfg, cancel.clone()).await;
                result.metadata.insert("depth".to_string(), json!(depth));
                pages += 1;

                if depth < strategy.max_depth {
                    let mut discovered: Vec<String> =
                        result.links.internal.iter().map(|l| l.href.clone()).collect();
                    if strategy.include_external {
                        discovered.extend(result.links.external.iter().map(|l| l.href.clone()));
                    }
                    for href in discovered {
                        frontier.push(&href, depth + 1);
                    }
                }

                if tx.send(result).await.is_err() {
                    break;
                }
            }
        });
        ReceiverStream::new(rx)
    }

    /// Delete all cached rows, keeping blobs and schema.
    pub async fn clear_cache(&self) -> Result<()> {
        self.metadata_store.clear().await
    }

    /// Drop the metadata table and every stored blob.
    pub async fn flush_cache(&self) -> Result<()> {
        self.metadata_store.drop_store().await?;
        self.content_store.clear().await
    }

    /// Number of cached URLs.
    pub async fn cache_size(&self) -> Result<u64> {
        self.metadata_store.count().await
    }
}

fn display_url(url: &str) -> &str {
    if url.starts_with("raw:") {
        "Raw HTML"
    } else {
        url
    }
}

fn lookup_header(
    headers: &std::collections::BTreeMap<String, String>,
    name: &str,
) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.clone())
}
