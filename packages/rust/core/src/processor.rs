//! End-to-end site processing: lock → sitemap discovery → crawl → enrichment.
//!
//! [`SiteProcessor`] wires the storage, fetcher, change detector, crawler,
//! and enricher together for one run against one output directory, and emits
//! the per-phase summary counters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, instrument, warn};
use url::Url;

use site2rag_crawler::{ChangeDetector, Crawler};
use site2rag_discovery::SitemapDiscoverer;
use site2rag_enrich::{AiClient, AiRequestTracker, EnrichProgress, Enricher, TrackerSnapshot};
use site2rag_fetch::Fetcher;
use site2rag_shared::{CrawlConfig, CrawlStats, EnrichConfig, Result, SitemapUrl, urls};
use site2rag_storage::Storage;

use crate::lock::ProcessLock;

/// Name of the state directory under the output directory.
const STATE_DIR: &str = ".site2rag";

/// Database file inside the state directory.
const DB_FILE: &str = "site2rag.db";

// ---------------------------------------------------------------------------
// Config, summary, progress
// ---------------------------------------------------------------------------

/// Everything one run needs.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Seed URL for the crawl.
    pub seed: Url,
    /// Output directory for Markdown and documents.
    pub output_dir: PathBuf,
    /// Crawl settings.
    pub crawl: CrawlConfig,
    /// Enrichment settings.
    pub enrich: EnrichConfig,
}

/// Per-phase summary reported at the end of a run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub crawl: CrawlStats,
    pub crawl_errors: Vec<(String, String)>,
    pub limit_reached: bool,
    pub enriched: usize,
    pub enrich_failed: usize,
    pub tokens: TrackerSnapshot,
    pub elapsed: std::time::Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Fine-grained progress within the current phase.
    fn detail(&self, current: usize, total: usize, detail: &str);
    /// Called once when the run completes.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn detail(&self, _current: usize, _total: usize, _detail: &str) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Owns one run's lifecycle over one output directory.
pub struct SiteProcessor {
    config: ProcessorConfig,
}

impl SiteProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        Self { config }
    }

    /// Run the full pipeline. Holding the process lock for the whole run.
    #[instrument(skip_all, fields(seed = %self.config.seed))]
    pub async fn run(&self, progress: &dyn ProgressReporter) -> Result<RunSummary> {
        let start = Instant::now();
        let state_dir = self.config.output_dir.join(STATE_DIR);

        let _lock = ProcessLock::acquire(&state_dir)?;
        let storage = Storage::open(&state_dir.join(DB_FILE)).await?;
        let session_id = storage.start_session(self.config.seed.as_str()).await?;

        // --- Phase 1: sitemap discovery ---
        progress.phase("Discovering sitemaps");
        let sitemap_seeds = self.discover_sitemaps(&storage).await;

        // --- Phase 2: crawl ---
        progress.phase("Crawling site");
        let fetcher = Arc::new(Fetcher::new(self.config.crawl.politeness_ms)?);
        let detector = Arc::new(ChangeDetector::new(
            self.config.crawl.min_age_hours,
            self.config.crawl.fast_recheck_hours,
        ));
        let crawler = Crawler::new(
            self.config.crawl.clone(),
            fetcher,
            detector,
            &self.config.output_dir,
        );

        let crawl = crawler
            .crawl(&self.config.seed, &sitemap_seeds, &storage)
            .await?;

        info!(
            "crawled {}, unchanged {}, failed {}, binaries {}",
            crawl.stats.pages_crawled,
            crawl.stats.pages_unchanged,
            crawl.stats.pages_failed,
            crawl.stats.binaries_saved,
        );

        // --- Phase 3: enrichment ---
        let tracker = Arc::new(AiRequestTracker::new());
        let (enriched, enrich_failed, tokens) = if self.config.enrich.enabled {
            progress.phase("Enriching content");
            let client = Arc::new(AiClient::new(
                &self.config.enrich.host,
                &self.config.enrich.model,
                tracker.clone(),
            )?);
            let enricher = Enricher::new(client, &self.config.output_dir);
            let adapter = ProcessorEnrichProgress { inner: progress };

            let outcome = enricher
                .enrich_pages(&storage, &crawl.crawled_urls, &adapter)
                .await?;
            (outcome.enriched, outcome.failed, outcome.tokens)
        } else {
            (0, 0, tracker.snapshot())
        };

        // --- Finish ---
        let stats_json = serde_json::json!({
            "pages_crawled": crawl.stats.pages_crawled,
            "pages_unchanged": crawl.stats.pages_unchanged,
            "pages_failed": crawl.stats.pages_failed,
            "binaries_saved": crawl.stats.binaries_saved,
            "enriched": enriched,
            "enrich_failed": enrich_failed,
            "limit_reached": crawl.limit_reached,
        });
        storage.finish_session(&session_id, &stats_json.to_string()).await?;
        storage.close();

        let summary = RunSummary {
            crawl: crawl.stats,
            crawl_errors: crawl.errors,
            limit_reached: crawl.limit_reached,
            enriched,
            enrich_failed,
            tokens,
            elapsed: start.elapsed(),
        };

        info!(
            "crawled {}, enriched {}, tokens {}, cost ${:.4}",
            summary.crawl.pages_crawled,
            summary.enriched,
            summary.tokens.total_tokens(),
            summary.tokens.estimated_cost,
        );

        progress.done(&summary);
        Ok(summary)
    }

    /// Discover and persist sitemap URLs, returning the pending set scoped
    /// to the crawl's domain and patterns. Discovery failures never abort
    /// the run.
    async fn discover_sitemaps(&self, storage: &Storage) -> Vec<SitemapUrl> {
        let discoverer = match SitemapDiscoverer::new() {
            Ok(d) => d,
            Err(e) => {
                warn!(error = %e, "sitemap discovery unavailable");
                return Vec::new();
            }
        };

        let sitemaps = match discoverer.discover_sitemaps(&self.config.seed).await {
            Ok(list) => list,
            Err(e) => {
                warn!(error = %e, "sitemap discovery failed, crawling from seed only");
                return Vec::new();
            }
        };

        let records = match discoverer.collect_urls(&sitemaps).await {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "sitemap parsing failed, crawling from seed only");
                return Vec::new();
            }
        };

        let base_host = self.config.seed.host_str().unwrap_or_default();
        let in_scope: Vec<SitemapUrl> = records
            .into_iter()
            .filter(|record| {
                (!self.config.crawl.same_domain || urls::is_same_domain(&record.url, base_host))
                    && Url::parse(&record.url)
                        .map(|u| urls::matches_patterns(u.path(), &self.config.crawl.patterns))
                        .unwrap_or(false)
            })
            .collect();

        if let Err(e) = storage.insert_sitemap_urls(&in_scope).await {
            warn!(error = %e, "failed to persist sitemap URLs");
        }

        // Freshly discovered URLs are re-seeded every run (the change
        // detector decides whether their content is refetched); leftovers
        // from earlier interrupted runs join them.
        let mut seeds = in_scope;
        if let Ok(pending) = storage.unprocessed_sitemap_urls().await {
            let known: std::collections::HashSet<String> =
                seeds.iter().map(|s| s.url.clone()).collect();
            seeds.extend(pending.into_iter().filter(|p| !known.contains(&p.url)));
        }
        seeds
    }
}

/// Adapts a [`ProgressReporter`] to the enrichment progress interface.
struct ProcessorEnrichProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl EnrichProgress for ProcessorEnrichProgress<'_> {
    fn phase(&self, name: &str) {
        self.inner.phase(name);
    }

    fn document(&self, current: usize, total: usize, detail: &str) {
        self.inner.detail(current, total, detail);
    }
}
