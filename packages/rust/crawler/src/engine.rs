//! Crawl orchestrator: frontier, per-URL state machine, binary/HTML dispatch.
//!
//! The crawler drains a BFS frontier in batches of `concurrency`, fetching in
//! spawned workers and serializing all storage writes through the main loop.
//! Reaching the page limit raises the `CrawlLimitReached` sentinel, which
//! [`Crawler::crawl`] converts into a clean return.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use site2rag_extract::{DocumentMetadata, extract_content, extract_metadata};
use site2rag_fetch::{FetchOptions, Fetcher};
use site2rag_markdown::{ConvertOptions, FrontmatterValue, frontmatter};
use site2rag_shared::{
    ContentStatus, CrawlConfig, CrawlStats, PageRecord, PageUpdate, Result, Site2RagError,
    SitemapUrl, urls,
};
use site2rag_storage::Storage;

use crate::change::{ChangeDetector, Decision};

/// Content-type prefixes routed to the binary path.
const BINARY_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument",
    "application/zip",
    "application/octet-stream",
    "image/",
    "audio/",
    "video/",
];

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Summary of a completed crawl.
#[derive(Debug, Clone)]
pub struct CrawlOutcome {
    /// Per-run counters.
    pub stats: CrawlStats,
    /// Errors encountered (URL, message); the crawl continues past them.
    pub errors: Vec<(String, String)>,
    /// Normalized URLs visited with a 2xx/304 this run, for enrichment scoping.
    pub crawled_urls: Vec<String>,
    /// Whether the run stopped at the page limit.
    pub limit_reached: bool,
}

/// What a fetch worker produced for one URL.
enum Fetched {
    NotModified {
        sent_etag: bool,
    },
    HttpError {
        status: u16,
    },
    FetchFailed {
        message: String,
    },
    Binary {
        file_name: String,
        bytes: Vec<u8>,
        oversize: bool,
    },
    Html(Box<HtmlPage>),
}

/// A processed HTML response, ready for the change decision.
struct HtmlPage {
    etag: Option<String>,
    last_modified: Option<String>,
    status: u16,
    markdown: String,
    content_hash: u32,
    title: Option<String>,
    metadata: DocumentMetadata,
    links: Vec<String>,
    extract_empty: bool,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Frontier-driven site crawler.
pub struct Crawler {
    config: CrawlConfig,
    fetcher: Arc<Fetcher>,
    detector: Arc<ChangeDetector>,
    output_dir: PathBuf,
}

/// Mutable per-run state owned by the frontier loop.
struct FrontierState {
    visited: HashSet<String>,
    queue: Vec<(Url, u32)>,
    /// Markdown files + binaries written this run; gates the page limit.
    found: usize,
    stats: CrawlStats,
    errors: Vec<(String, String)>,
    crawled_urls: Vec<String>,
    /// Body hashes of saved binaries, for cross-URL duplicate detection.
    binary_hashes: HashSet<String>,
    /// Normalized sitemap URLs still awaiting their processed flag.
    sitemap_pending: HashSet<String>,
}

impl Crawler {
    pub fn new(
        config: CrawlConfig,
        fetcher: Arc<Fetcher>,
        detector: Arc<ChangeDetector>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            config,
            fetcher,
            detector,
            output_dir: output_dir.into(),
        }
    }

    /// Crawl from `seed`, with sitemap-discovered URLs joining the frontier
    /// at depth 0. Hitting the page limit is a success, not an error.
    #[instrument(skip_all, fields(seed = %seed))]
    pub async fn crawl(
        &self,
        seed: &Url,
        sitemap_seeds: &[SitemapUrl],
        storage: &Storage,
    ) -> Result<CrawlOutcome> {
        let mut state = FrontierState {
            visited: HashSet::new(),
            queue: Vec::new(),
            found: 0,
            stats: CrawlStats::default(),
            errors: Vec::new(),
            crawled_urls: Vec::new(),
            binary_hashes: HashSet::new(),
            sitemap_pending: sitemap_seeds
                .iter()
                .map(|s| urls::normalize(&s.url))
                .collect(),
        };

        state.queue.push((seed.clone(), 0));
        for record in sitemap_seeds {
            if let Ok(url) = Url::parse(&record.url) {
                state.queue.push((url, 0));
            }
        }

        info!(
            max_pages = self.config.max_pages,
            max_depth = self.config.max_depth,
            concurrency = self.config.concurrency,
            sitemap_seeds = sitemap_seeds.len(),
            "starting crawl"
        );

        let limit_reached = match self.run_frontier(seed, storage, &mut state).await {
            Ok(()) => false,
            Err(e) if e.is_crawl_limit() => {
                info!(found = state.found, "crawl page limit reached, stopping cleanly");
                true
            }
            Err(e) => return Err(e),
        };

        let detector = self.detector.stats();
        state.stats.skipped_by_age = detector.skipped_by_age;
        state.stats.skipped_by_etag = detector.skipped_by_etag;
        state.stats.skipped_by_last_modified = detector.skipped_by_last_modified;
        state.stats.skipped_by_hash = detector.skipped_by_hash;

        info!(
            crawled = state.stats.pages_crawled,
            unchanged = state.stats.pages_unchanged,
            failed = state.stats.pages_failed,
            binaries = state.stats.binaries_saved,
            errors = state.errors.len(),
            "crawl complete"
        );

        Ok(CrawlOutcome {
            stats: state.stats,
            errors: state.errors,
            crawled_urls: state.crawled_urls,
            limit_reached,
        })
    }

    /// Drain the frontier; returns the `CrawlLimitReached` sentinel when the
    /// page limit is hit.
    async fn run_frontier(
        &self,
        seed: &Url,
        storage: &Storage,
        state: &mut FrontierState,
    ) -> Result<()> {
        let base_host = seed
            .host_str()
            .ok_or_else(|| Site2RagError::InvalidUrl(format!("seed has no host: {seed}")))?
            .to_string();

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));

        while !state.queue.is_empty() {
            let remaining = self.config.max_pages.saturating_sub(state.found);
            if remaining == 0 {
                return Err(Site2RagError::CrawlLimitReached);
            }

            // Take a batch from the queue, never larger than the page budget
            let batch_size = state
                .queue
                .len()
                .min(self.config.concurrency)
                .min(remaining);
            let batch: Vec<(Url, u32)> = state.queue.drain(..batch_size).collect();

            let mut handles = Vec::new();

            for (url, depth) in batch {
                let normalized = urls::normalize(url.as_str());

                if !state.visited.insert(normalized.clone()) {
                    continue;
                }

                if !self.fetcher.can_crawl(url.as_str()).await {
                    debug!(%url, "blocked by robots.txt");
                    continue;
                }

                // Pre-fetch row: age tier + conditional headers
                let row = storage.get_page(&normalized).await?;
                if let Some(row) = &row {
                    if self.detector.skip_by_age(row) {
                        storage
                            .upsert_page(&normalized, &PageUpdate::touch(Utc::now()))
                            .await?;
                        state.stats.pages_unchanged += 1;
                        state.crawled_urls.push(normalized.clone());
                        self.mark_sitemap(&normalized, storage, state).await;
                        continue;
                    }
                }

                let headers = ChangeDetector::conditional_headers(row.as_ref());
                let sent_etag = headers.iter().any(|(name, _)| name == "If-None-Match");

                let fetcher = self.fetcher.clone();
                let semaphore = semaphore.clone();
                let max_body = self.config.max_body_bytes;
                let task_url = url.clone();

                handles.push((
                    normalized,
                    url,
                    depth,
                    row,
                    tokio::spawn(async move {
                        let _permit = semaphore.acquire().await.expect("semaphore closed");
                        fetch_and_process(&fetcher, &task_url, headers, sent_etag, max_body).await
                    }),
                ));
            }

            for (normalized, url, depth, row, handle) in handles {
                let fetched = match handle.await {
                    Ok(fetched) => fetched,
                    Err(e) => {
                        state.errors.push((normalized.clone(), e.to_string()));
                        state.stats.pages_failed += 1;
                        continue;
                    }
                };

                self.apply_outcome(
                    &normalized,
                    &url,
                    depth,
                    row,
                    fetched,
                    &base_host,
                    storage,
                    state,
                )
                .await?;

                self.mark_sitemap(&normalized, storage, state).await;

                if state.found >= self.config.max_pages {
                    return Err(Site2RagError::CrawlLimitReached);
                }
            }
        }

        Ok(())
    }

    /// Apply one worker result to storage, disk, and the frontier.
    #[allow(clippy::too_many_arguments)]
    async fn apply_outcome(
        &self,
        normalized: &str,
        url: &Url,
        depth: u32,
        row: Option<PageRecord>,
        fetched: Fetched,
        base_host: &str,
        storage: &Storage,
        state: &mut FrontierState,
    ) -> Result<()> {
        let now = Utc::now();

        match fetched {
            Fetched::NotModified { sent_etag } => {
                self.detector.note_not_modified(sent_etag);
                storage
                    .upsert_page(normalized, &PageUpdate::touch(now))
                    .await?;
                state.stats.pages_unchanged += 1;
                state.crawled_urls.push(normalized.to_string());
            }

            Fetched::HttpError { status } => {
                // Rows exist only for URLs that were ever fetched successfully;
                // record the failing status on those, drop the rest.
                if row.is_some() {
                    storage
                        .upsert_page(
                            normalized,
                            &PageUpdate {
                                status: Some(status),
                                last_crawled: Some(now),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                state.errors.push((normalized.to_string(), format!("HTTP {status}")));
                state.stats.pages_failed += 1;
            }

            Fetched::FetchFailed { message } => {
                if row.is_some() {
                    storage
                        .upsert_page(
                            normalized,
                            &PageUpdate {
                                status: Some(0),
                                last_crawled: Some(now),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                state.errors.push((normalized.to_string(), message));
                state.stats.pages_failed += 1;
            }

            Fetched::Binary {
                file_name,
                bytes,
                oversize,
            } => {
                if oversize {
                    state
                        .errors
                        .push((normalized.to_string(), "binary exceeds size cap".into()));
                    state.stats.pages_failed += 1;
                    return Ok(());
                }

                let body_hash = format!("{:x}", Sha256::digest(&bytes));
                let relative = format!("documents/{file_name}");

                if state.binary_hashes.insert(body_hash) {
                    let target = self.output_dir.join(&relative);
                    if let Some(parent) = target.parent() {
                        std::fs::create_dir_all(parent)
                            .map_err(|e| Site2RagError::io(parent, e))?;
                    }
                    std::fs::write(&target, &bytes)
                        .map_err(|e| Site2RagError::io(&target, e))?;
                    state.stats.binaries_saved += 1;
                    state.found += 1;
                } else {
                    debug!(url = %normalized, "duplicate binary body, not rewritten");
                }

                storage
                    .upsert_page(
                        normalized,
                        &PageUpdate {
                            status: Some(200),
                            last_crawled: Some(now),
                            last_updated: Some(now),
                            file_path: Some(relative),
                            ..Default::default()
                        },
                    )
                    .await?;
                state.crawled_urls.push(normalized.to_string());
            }

            Fetched::Html(page) => {
                let decision = self.detector.decide(
                    row.as_ref(),
                    page.etag.as_deref(),
                    page.last_modified.as_deref(),
                    page.content_hash,
                );

                match decision {
                    Decision::Unchanged(tier) => {
                        debug!(url = %normalized, ?tier, "unchanged, touching last_crawled");
                        storage
                            .upsert_page(normalized, &PageUpdate::touch(now))
                            .await?;
                        state.stats.pages_unchanged += 1;
                    }
                    Decision::New | Decision::Changed => {
                        if page.extract_empty {
                            // Keep the row, write no file: nothing to enrich.
                            storage
                                .upsert_page(
                                    normalized,
                                    &PageUpdate {
                                        etag: page.etag.clone(),
                                        last_modified: page.last_modified.clone(),
                                        content_hash: Some(page.content_hash),
                                        status: Some(page.status),
                                        last_crawled: Some(now),
                                        last_updated: Some(now),
                                        ..Default::default()
                                    },
                                )
                                .await?;
                            state
                                .errors
                                .push((normalized.to_string(), "no extractable content".into()));
                        } else {
                            let relative = self.page_file_path(normalized);
                            let target = self.output_dir.join(&relative);
                            if let Some(parent) = target.parent() {
                                std::fs::create_dir_all(parent)
                                    .map_err(|e| Site2RagError::io(parent, e))?;
                            }

                            let front = build_frontmatter(&page.metadata, normalized, now);
                            let content = format!("{front}\n{}", page.markdown);
                            std::fs::write(&target, &content)
                                .map_err(|e| Site2RagError::io(&target, e))?;

                            storage
                                .upsert_page(
                                    normalized,
                                    &PageUpdate {
                                        etag: page.etag.clone(),
                                        last_modified: page.last_modified.clone(),
                                        content_hash: Some(page.content_hash),
                                        status: Some(page.status),
                                        last_crawled: Some(now),
                                        last_updated: Some(now),
                                        title: page
                                            .metadata
                                            .title
                                            .clone()
                                            .or_else(|| page.title.clone()),
                                        file_path: Some(relative),
                                        content_status: Some(ContentStatus::Raw),
                                    },
                                )
                                .await?;

                            state.stats.pages_crawled += 1;
                            state.found += 1;
                        }
                    }
                }

                state.crawled_urls.push(normalized.to_string());

                // Enqueue children (unchanged pages yielded no links: body
                // processing was skipped upstream for those).
                self.enqueue_links(&page.links, url, depth, base_host, state);
            }
        }

        Ok(())
    }

    /// Gate and enqueue child links: depth, same-domain, patterns, dedup.
    fn enqueue_links(
        &self,
        links: &[String],
        parent: &Url,
        parent_depth: u32,
        base_host: &str,
        state: &mut FrontierState,
    ) {
        let child_depth = parent_depth + 1;
        if self.config.max_depth >= 0 && child_depth > self.config.max_depth as u32 {
            return;
        }

        for link in links {
            let Ok(resolved) = parent.join(link) else {
                continue;
            };
            if resolved.scheme() != "http" && resolved.scheme() != "https" {
                continue;
            }

            if self.config.same_domain && !urls::is_same_domain(resolved.as_str(), base_host) {
                continue;
            }

            if !urls::matches_patterns(resolved.path(), &self.config.patterns) {
                continue;
            }

            let normalized = urls::normalize(resolved.as_str());
            if state.visited.contains(&normalized) {
                continue;
            }

            // Pages gating a document download behind ?resource= are queued
            // both as the page and as the direct resource.
            if let Some(resource) = urls::resource_parameter(resolved.as_str()) {
                if urls::has_binary_extension(&resource) {
                    if let Ok(resource_url) = resolved.join(&resource) {
                        let resource_normalized = urls::normalize(resource_url.as_str());
                        if !state.visited.contains(&resource_normalized) {
                            state.queue.push((resource_url, child_depth));
                        }
                    }
                }
            }

            state.queue.push((resolved, child_depth));
        }
    }

    /// Relative Markdown path for a page URL.
    fn page_file_path(&self, normalized: &str) -> String {
        let stem = urls::safe_filename(normalized);
        if self.config.flat_output {
            format!("{}.md", stem.replace('/', "_"))
        } else {
            format!("{stem}.md")
        }
    }

    /// Flip the processed flag for sitemap-seeded URLs once visited.
    async fn mark_sitemap(&self, normalized: &str, storage: &Storage, state: &mut FrontierState) {
        if state.sitemap_pending.remove(normalized) {
            if let Err(e) = storage.mark_sitemap_url_processed(normalized).await {
                warn!(url = %normalized, error = %e, "failed to mark sitemap URL processed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Worker: fetch + classify + process
// ---------------------------------------------------------------------------

/// Fetch one URL and classify/process the response. Runs inside a spawned
/// worker; all storage access stays on the frontier loop.
async fn fetch_and_process(
    fetcher: &Fetcher,
    url: &Url,
    headers: Vec<(String, String)>,
    sent_etag: bool,
    max_body_bytes: u64,
) -> Fetched {
    let response = match fetcher
        .fetch(url.as_str(), FetchOptions {
            headers,
            ..Default::default()
        })
        .await
    {
        Ok(response) => response,
        Err(e) => {
            return Fetched::FetchFailed {
                message: e.to_string(),
            };
        }
    };

    match response.status {
        304 => Fetched::NotModified { sent_etag },
        200..=299 => {
            let content_type = response.content_type().unwrap_or("").to_string();
            let is_binary = BINARY_CONTENT_TYPES
                .iter()
                .any(|prefix| content_type.starts_with(prefix));

            if is_binary {
                Fetched::Binary {
                    file_name: binary_file_name(url),
                    oversize: response.len() as u64 > max_body_bytes,
                    bytes: response.bytes().to_vec(),
                }
            } else if response.len() as u64 > max_body_bytes {
                Fetched::FetchFailed {
                    message: "document exceeds size cap".into(),
                }
            } else {
                process_html(url, &response.text(), response.status, &response)
            }
        }
        status => Fetched::HttpError { status },
    }
}

/// Synchronous HTML processing: extraction, metadata, conversion, links.
/// No parsed document survives past this function.
fn process_html(
    url: &Url,
    html: &str,
    status: u16,
    response: &site2rag_fetch::FetchResponse,
) -> Fetched {
    let extracted = match extract_content(html, url.as_str()) {
        Ok(extracted) => extracted,
        Err(e) => {
            return Fetched::FetchFailed {
                message: format!("extraction failed: {e}"),
            };
        }
    };

    let metadata = extract_metadata(html, url.as_str());

    let converted = match site2rag_markdown::convert(&extracted.html, &ConvertOptions {
        base_url: url.to_string(),
    }) {
        Ok(converted) => converted,
        Err(e) => {
            return Fetched::FetchFailed {
                message: format!("conversion failed: {e}"),
            };
        }
    };

    let extract_empty = converted.markdown.trim().is_empty();
    let content_hash = crate::change::rolling_hash(&converted.markdown);

    Fetched::Html(Box::new(HtmlPage {
        etag: response.header("etag").map(String::from),
        last_modified: response.header("last-modified").map(String::from),
        status,
        content_hash,
        title: converted.title.clone(),
        links: extract_links(html, url),
        markdown: converted.markdown,
        metadata,
        extract_empty,
    }))
}

/// Extract all links from a document, resolved against the base URL.
fn extract_links(html: &str, base_url: &Url) -> Vec<String> {
    let doc = Html::parse_document(html);
    let link_sel = Selector::parse("a[href]").unwrap();
    let mut links = Vec::new();

    for el in doc.select(&link_sel) {
        if let Some(href) = el.value().attr("href") {
            if href.starts_with('#') || href.starts_with("javascript:") || href.starts_with("mailto:")
            {
                continue;
            }
            if let Ok(mut resolved) = base_url.join(href) {
                resolved.set_fragment(None);
                links.push(resolved.to_string());
            }
        }
    }

    links
}

/// File name for a saved binary, keeping the original extension.
fn binary_file_name(url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(String::from))
        .unwrap_or_default();

    let decoded = percent_encoding::percent_decode_str(&last).decode_utf8_lossy();
    let cleaned: String = decoded
        .chars()
        .filter(|c| !c.is_control() && *c != '/' && *c != '\\')
        .collect();

    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned
    }
}

// ---------------------------------------------------------------------------
// Front-matter assembly
// ---------------------------------------------------------------------------

/// Build the YAML front-matter block for a page.
fn build_frontmatter(meta: &DocumentMetadata, url: &str, crawled_at: chrono::DateTime<Utc>) -> String {
    let text = |value: &Option<String>| {
        FrontmatterValue::Text(value.clone().unwrap_or_default())
    };

    let entries: Vec<(&str, FrontmatterValue)> = vec![
        ("title", text(&meta.title)),
        ("url", FrontmatterValue::Text(url.to_string())),
        (
            "crawled_at",
            FrontmatterValue::Text(crawled_at.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        ),
        ("description", text(&meta.description)),
        ("keywords", FrontmatterValue::List(meta.keywords.clone())),
        ("author", text(&meta.author)),
        ("authorDescription", text(&meta.author_details.description)),
        ("authorJobTitle", text(&meta.author_details.job_title)),
        ("authorImage", text(&meta.author_details.image)),
        ("authorUrl", text(&meta.author_details.url)),
        ("authorOrganization", text(&meta.author_details.organization)),
        ("publisher", text(&meta.publisher)),
        ("publisherLogo", text(&meta.publisher_logo)),
        ("datePublished", text(&meta.date_published)),
        ("dateModified", text(&meta.date_modified)),
        ("language", text(&meta.language)),
        ("image", text(&meta.image)),
        ("section", text(&meta.section)),
        ("license", text(&meta.license)),
        ("audioDuration", text(&meta.audio_duration)),
        ("canonical", text(&meta.canonical)),
    ];

    frontmatter::render(&entries)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::rolling_hash;
    use site2rag_shared::AppConfig;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> CrawlConfig {
        let mut config = CrawlConfig::from(&AppConfig::default());
        config.politeness_ms = 0;
        config
    }

    async fn test_env(config: CrawlConfig) -> (Crawler, Storage, PathBuf) {
        let dir = std::env::temp_dir().join(format!("s2r_crawl_{}", Uuid::now_v7()));
        let storage = Storage::open(&dir.join(".site2rag/site2rag.db"))
            .await
            .expect("open storage");
        let fetcher = Arc::new(Fetcher::new(0).expect("fetcher"));
        let detector = Arc::new(ChangeDetector::new(
            config.min_age_hours,
            config.fast_recheck_hours,
        ));
        let crawler = Crawler::new(config, fetcher, detector, &dir);
        (crawler, storage, dir)
    }

    fn html_page(title: &str, body: &str) -> String {
        format!(
            "<html><head><title>{title}</title></head><body><nav><a href=\"/\">Home</a></nav>\
             <main><h1>{title}</h1>{body}</main><footer>Footer chrome</footer></body></html>"
        )
    }

    async fn mount_page(server: &MockServer, route: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(route.to_string()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string(body),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn crawl_writes_markdown_and_marks_raw() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            html_page("Root", "<p>Welcome to the site.</p><a href=\"/guide\">Guide</a>"),
        )
        .await;
        mount_page(
            &server,
            "/guide",
            html_page("Guide", "<p>A guide page with enough words to extract.</p>"),
        )
        .await;

        let (crawler, storage, dir) = test_env(test_config()).await;
        let seed = Url::parse(&server.uri()).unwrap();
        let outcome = crawler.crawl(&seed, &[], &storage).await.unwrap();

        assert_eq!(outcome.stats.pages_crawled, 2);
        assert!(!outcome.limit_reached);

        let root_md = std::fs::read_to_string(dir.join("index.md")).expect("root file");
        assert!(root_md.starts_with("---\n"));
        assert!(root_md.contains("# Root"));
        assert!(!root_md.contains("Footer chrome"));

        let page = storage
            .get_page(&urls::normalize(&format!("{}/guide", server.uri())))
            .await
            .unwrap()
            .expect("row");
        assert_eq!(page.content_status, Some(ContentStatus::Raw));
        assert_eq!(page.status, 200);
        assert!(page.file_path.as_deref().unwrap().ends_with("guide.md"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn page_limit_stops_cleanly_with_exact_count() {
        let server = MockServer::start().await;

        // Ten interlinked pages
        for i in 0..10 {
            let links: String = (0..10)
                .filter(|j| *j != i)
                .map(|j| format!("<a href=\"/p{j}\">p{j}</a>"))
                .collect();
            mount_page(
                &server,
                &format!("/p{i}"),
                html_page(
                    &format!("Page {i}"),
                    &format!("<p>Body text for page number {i} with substance.</p>{links}"),
                ),
            )
            .await;
        }

        let mut config = test_config();
        config.max_pages = 3;
        let (crawler, storage, dir) = test_env(config).await;

        let seed = Url::parse(&format!("{}/p0", server.uri())).unwrap();
        let outcome = crawler.crawl(&seed, &[], &storage).await.unwrap();

        assert!(outcome.limit_reached);
        assert_eq!(outcome.stats.pages_crawled, 3);

        let md_files: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "md"))
            .collect();
        assert_eq!(md_files.len(), 3);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn depth_gate_drops_deep_links() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            html_page("Root", "<p>Root body text here.</p><a href=\"/l1\">next</a>"),
        )
        .await;
        mount_page(
            &server,
            "/l1",
            html_page("L1", "<p>Level one body text.</p><a href=\"/l2\">next</a>"),
        )
        .await;
        mount_page(&server, "/l2", html_page("L2", "<p>Level two body text.</p>")).await;

        let mut config = test_config();
        config.max_depth = 1;
        let (crawler, storage, dir) = test_env(config).await;

        let seed = Url::parse(&server.uri()).unwrap();
        let outcome = crawler.crawl(&seed, &[], &storage).await.unwrap();

        // Root (depth 0) + l1 (depth 1); l2 is depth 2, dropped
        assert_eq!(outcome.stats.pages_crawled, 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn revalidation_304_preserves_contexted_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(304))
            .mount(&server)
            .await;

        let (crawler, storage, dir) = test_env(test_config()).await;
        let seed = Url::parse(&server.uri()).unwrap();
        let normalized = urls::normalize(seed.as_str());

        // Pre-seed a previously crawled, already enriched row
        let old_crawl = Utc::now() - chrono::Duration::hours(5);
        storage
            .upsert_page(
                &normalized,
                &PageUpdate {
                    etag: Some("W/\"abc\"".into()),
                    status: Some(200),
                    content_hash: Some(rolling_hash("old body")),
                    last_crawled: Some(old_crawl),
                    file_path: Some("index.md".into()),
                    content_status: Some(ContentStatus::Contexted),
                    title: Some("Old".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let outcome = crawler.crawl(&seed, &[], &storage).await.unwrap();
        assert_eq!(outcome.stats.pages_unchanged, 1);
        assert_eq!(outcome.stats.pages_crawled, 0);

        let page = storage.get_page(&normalized).await.unwrap().unwrap();
        assert_eq!(page.content_status, Some(ContentStatus::Contexted));
        assert_eq!(page.etag.as_deref(), Some("W/\"abc\""));
        assert!(page.last_crawled > old_crawl);
        // No markdown was written
        assert!(!dir.join("index.md").exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn same_domain_confinement() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            html_page(
                "Root",
                "<p>Root body text content.</p><a href=\"https://external.example.org/away\">out</a>",
            ),
        )
        .await;

        let (crawler, storage, dir) = test_env(test_config()).await;
        let seed = Url::parse(&server.uri()).unwrap();
        let outcome = crawler.crawl(&seed, &[], &storage).await.unwrap();

        assert_eq!(outcome.stats.pages_crawled, 1);
        assert!(outcome.errors.is_empty());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn http_404_is_recorded_without_a_row() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            html_page("Root", "<p>Root body with words.</p><a href=\"/gone\">gone</a>"),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let (crawler, storage, dir) = test_env(test_config()).await;
        let seed = Url::parse(&server.uri()).unwrap();
        let outcome = crawler.crawl(&seed, &[], &storage).await.unwrap();

        assert_eq!(outcome.stats.pages_failed, 1);
        assert!(outcome.errors.iter().any(|(_, msg)| msg.contains("404")));

        // Never successfully fetched → no row
        let gone = storage
            .get_page(&urls::normalize(&format!("{}/gone", server.uri())))
            .await
            .unwrap();
        assert!(gone.is_none());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn binaries_are_saved_under_documents() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            html_page(
                "Root",
                "<p>Root body content words.</p><a href=\"/files/report.pdf\">report</a>",
            ),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/files/report.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.4 fake".to_vec()),
            )
            .mount(&server)
            .await;

        let (crawler, storage, dir) = test_env(test_config()).await;
        let seed = Url::parse(&server.uri()).unwrap();
        let outcome = crawler.crawl(&seed, &[], &storage).await.unwrap();

        assert_eq!(outcome.stats.binaries_saved, 1);
        assert!(dir.join("documents/report.pdf").exists());

        let row = storage
            .get_page(&urls::normalize(&format!(
                "{}/files/report.pdf",
                server.uri()
            )))
            .await
            .unwrap()
            .expect("binary row");
        assert_eq!(row.file_path.as_deref(), Some("documents/report.pdf"));
        // Binaries never enter the enrichment lifecycle
        assert_eq!(row.content_status, None);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn sitemap_seeds_are_crawled_and_marked() {
        let server = MockServer::start().await;
        mount_page(&server, "/", html_page("Root", "<p>Root body words.</p>")).await;
        mount_page(
            &server,
            "/orphan",
            html_page("Orphan", "<p>Linked from nowhere, found via sitemap.</p>"),
        )
        .await;

        let (crawler, storage, dir) = test_env(test_config()).await;
        let orphan_url = format!("{}/orphan", server.uri());
        let seeds = vec![SitemapUrl {
            url: orphan_url.clone(),
            sitemap_url: format!("{}/sitemap.xml", server.uri()),
            language: "en".into(),
            priority: None,
            lastmod: None,
            changefreq: None,
            processed: false,
        }];
        storage.insert_sitemap_urls(&seeds).await.unwrap();

        let seed = Url::parse(&server.uri()).unwrap();
        let outcome = crawler.crawl(&seed, &seeds, &storage).await.unwrap();

        assert_eq!(outcome.stats.pages_crawled, 2);
        let pending = storage.unprocessed_sitemap_urls().await.unwrap();
        assert!(pending.is_empty(), "sitemap URL not marked processed");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn unchanged_hash_bumps_last_crawled_only() {
        let server = MockServer::start().await;
        mount_page(
            &server,
            "/",
            html_page("Stable", "<p>Identical content on both crawls.</p>"),
        )
        .await;

        let (crawler, storage, dir) = test_env(test_config()).await;
        let seed = Url::parse(&server.uri()).unwrap();
        let normalized = urls::normalize(seed.as_str());

        crawler.crawl(&seed, &[], &storage).await.unwrap();
        let first = storage.get_page(&normalized).await.unwrap().unwrap();

        // Simulate the first page having been enriched between runs
        storage
            .upsert_page(
                &normalized,
                &PageUpdate {
                    content_status: Some(ContentStatus::Contexted),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Second crawl with a fresh crawler (visited set is per-run)
        let fetcher = Arc::new(Fetcher::new(0).unwrap());
        let detector = Arc::new(ChangeDetector::new(None, None));
        let crawler2 = Crawler::new(test_config(), fetcher, detector, &dir);
        let outcome = crawler2.crawl(&seed, &[], &storage).await.unwrap();

        assert_eq!(outcome.stats.pages_unchanged, 1);
        assert_eq!(outcome.stats.pages_crawled, 0);

        let second = storage.get_page(&normalized).await.unwrap().unwrap();
        assert_eq!(second.content_status, Some(ContentStatus::Contexted));
        assert_eq!(second.content_hash, first.content_hash);
        assert!(second.last_crawled >= first.last_crawled);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn binary_file_name_keeps_extension() {
        let url = Url::parse("https://example.com/files/Annual%20Report.pdf").unwrap();
        assert_eq!(binary_file_name(&url), "Annual Report.pdf");

        let root = Url::parse("https://example.com/").unwrap();
        assert_eq!(binary_file_name(&root), "file");
    }
}
