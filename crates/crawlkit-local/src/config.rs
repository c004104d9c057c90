//! Per-run crawl configuration.
//!
//! One flat struct covering cache policy, fetch behavior, scraping knobs,
//! batch control, and the pluggable strategies. Projections (`fetch_options`,
//! `scrape_options`) hand each component only the slice it needs.

use crate::chunking::ChunkingStrategy;
use crate::deep_crawl::DeepCrawlStrategy;
use crate::extraction::ExtractionStrategy;
use crate::markdown::MarkdownGenerator;
use crate::scrape::ScrapeOptions;
use crawlkit_core::{CacheMode, FetchOptions};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CrawlerRunConfig {
    pub cache_mode: CacheMode,

    // Scraping
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

    // Fetching
    pub method: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub user_agent: Option<String>,
    pub verify_ssl: bool,
    pub follow_redirects: bool,
    pub page_timeout: Duration,
    pub js_code: Vec<String>,
    pub wait_for: Option<String>,
    pub screenshot: bool,
    pub pdf: bool,

    // Policy
    pub check_robots_txt: bool,
    /// Extra query parameters stripped during URL normalization.
    pub extra_drop_params: Vec<String>,

    // Batch control
    pub mean_delay: f64,
    pub max_range: f64,
    pub max_session_permit: usize,
    pub memory_threshold_percent: f32,
    pub check_interval: Duration,
    pub stream: bool,

    // Strategies
    pub extraction_strategy: ExtractionStrategy,
    pub chunking_strategy: ChunkingStrategy,
    pub markdown_generator: MarkdownGenerator,
    pub deep_crawl_strategy: Option<DeepCrawlStrategy>,

    pub session_id: Option<String>,
}

impl Default for CrawlerRunConfig {
    fn default() -> Self {
        Self {
            cache_mode: CacheMode::Enabled,
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
            check_robots_txt: false,
            extra_drop_params: Vec::new(),
            mean_delay: 0.1,
            max_range: 0.3,
            max_session_permit: 20,
            memory_threshold_percent: 70.0,
            check_interval: Duration::from_secs(1),
            stream: false,
            extraction_strategy: ExtractionStrategy::default(),
            chunking_strategy: ChunkingStrategy::default(),
            markdown_generator: MarkdownGenerator::default(),
            deep_crawl_strategy: None,
            session_id: None,
        }
    }
}

impl CrawlerRunConfig {
    /// Fetch-facing projection handed to [`crawlkit_core::Fetcher`].
    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            method: self.method.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            user_agent: self.user_agent.clone(),
            verify_ssl: self.verify_ssl,
            follow_redirects: self.follow_redirects,
            page_timeout: self.page_timeout,
            js_code: self.js_code.clone(),
            wait_for: self.wait_for.clone(),
            screenshot: self.screenshot,
            pdf: self.pdf,
        }
    }

    /// Scraper-facing projection.
    pub fn scrape_options(&self) -> ScrapeOptions {
        ScrapeOptions {
            word_count_threshold: self.word_count_threshold,
            css_selector: self.css_selector.clone(),
            excluded_tags: self.excluded_tags.clone(),
            keep_data_attributes: self.keep_data_attributes,
            exclude_external_links: self.exclude_external_links,
            exclude_social_media_links: self.exclude_social_media_links,
            exclude_external_images: self.exclude_external_images,
            exclude_domains: self.exclude_domains.clone(),
            image_score_threshold: self.image_score_threshold,
            image_description_min_words: self.image_description_min_words,
        }
    }

    /// Copy for child requests spawned by deep crawl; prevents recursive
    /// expansion.
    pub fn without_deep_crawl(&self) -> Self {
        let mut child = self.clone();
        child.deep_crawl_strategy = None;
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = CrawlerRunConfig::default();
        assert_eq!(cfg.cache_mode, CacheMode::Enabled);
        assert_eq!(cfg.word_count_threshold, 1);
        assert_eq!(cfg.image_score_threshold, 2);
        assert_eq!(cfg.page_timeout, Duration::from_secs(30));
        assert_eq!(cfg.max_session_permit, 20);
        assert!((cfg.memory_threshold_percent - 70.0).abs() < f32::EPSILON);
        assert!(!cfg.stream);
        assert!(!cfg.check_robots_txt);
    }

    #[test]
    fn projections_carry_the_right_fields() {
        let mut cfg = CrawlerRunConfig::default();
        cfg.method = "POST".into();
        cfg.css_selector = Some("#main".into());
        cfg.screenshot = true;

        let f = cfg.fetch_options();
        assert_eq!(f.method, "POST");
        assert!(f.screenshot);

        let s = cfg.scrape_options();
        assert_eq!(s.css_selector.as_deref(), Some("#main"));
    }

    #[test]
    fn without_deep_crawl_strips_only_the_strategy() {
        let mut cfg = CrawlerRunConfig::default();
        cfg.deep_crawl_strategy = Some(crate::deep_crawl::DeepCrawlStrategy::default());
        cfg.stream = true;

        let child = cfg.without_deep_crawl();
        assert!(child.deep_crawl_strategy.is_none());
        assert!(child.stream);
        assert!(cfg.deep_crawl_strategy.is_some());
    }
}
