//! Sitemap discovery for a crawl target.
//!
//! Before crawling, site2rag looks for XML sitemaps in two places: `Sitemap:`
//! declarations in `/robots.txt` and a fixed list of common paths probed via
//! HEAD. Discovered sitemaps are fetched and parsed recursively
//! (`sitemapindex` → child sitemaps), yielding page URLs with language and
//! freshness metadata for the crawl frontier.

mod parser;

use std::collections::HashSet;

use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use site2rag_shared::{Result, Site2RagError, SitemapUrl, USER_AGENT};

pub use parser::{ParsedSitemap, parse_sitemap};

/// Maximum sitemap document size we will parse (50 MB).
const MAX_SITEMAP_BYTES: u64 = 50 * 1024 * 1024;

/// Default timeout in seconds for discovery requests.
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Maximum `sitemapindex` nesting depth.
const MAX_INDEX_DEPTH: usize = 5;

/// Well-known sitemap locations probed when robots.txt declares none.
const COMMON_SITEMAP_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemaps.xml",
    "/sitemap/sitemap.xml",
    "/wp-sitemap.xml",
];

// ---------------------------------------------------------------------------
// Discoverer
// ---------------------------------------------------------------------------

/// Finds and walks a site's XML sitemaps.
pub struct SitemapDiscoverer {
    client: Client,
}

impl SitemapDiscoverer {
    /// Create a discoverer with its own HTTP client.
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(3))
            .timeout(std::time::Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(|e| Site2RagError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Discover sitemap document URLs for a base URL.
    ///
    /// Order: robots.txt `Sitemap:` declarations (case-insensitive, resolved
    /// against the base), then common-path HEAD probes accepted on an XML
    /// content-type or `.xml` suffix. The combined list is deduplicated.
    #[instrument(skip_all, fields(base = %base))]
    pub async fn discover_sitemaps(&self, base: &Url) -> Result<Vec<String>> {
        let origin = origin_url(base)?;
        let mut found: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        // --- robots.txt declarations ---
        let robots_url = format!("{origin}/robots.txt");
        match self.fetch_text(&robots_url).await {
            Ok(body) => {
                for line in body.lines() {
                    let Some((key, value)) = line.split_once(':') else {
                        continue;
                    };
                    if !key.trim().eq_ignore_ascii_case("sitemap") {
                        continue;
                    }
                    let value = value.trim();
                    let resolved = match Url::parse(value) {
                        Ok(abs) => abs.to_string(),
                        Err(_) => match base.join(value) {
                            Ok(joined) => joined.to_string(),
                            Err(_) => continue,
                        },
                    };
                    if seen.insert(resolved.clone()) {
                        found.push(resolved);
                    }
                }
            }
            Err(e) => debug!(error = %e, "robots.txt unavailable for sitemap discovery"),
        }

        // --- common path probes ---
        for path in COMMON_SITEMAP_PATHS {
            let candidate = format!("{origin}{path}");
            if seen.contains(&candidate) {
                continue;
            }
            if self.probe_is_sitemap(&candidate).await {
                seen.insert(candidate.clone());
                found.push(candidate);
            }
        }

        info!(count = found.len(), "sitemap discovery complete");
        Ok(found)
    }

    /// Fetch and parse the given sitemaps, recursing into index children.
    ///
    /// Returns up to 50 000 URL records across the whole tree. Individual
    /// sitemap failures are logged and skipped.
    #[instrument(skip_all, fields(roots = sitemap_urls.len()))]
    pub async fn collect_urls(&self, sitemap_urls: &[String]) -> Result<Vec<SitemapUrl>> {
        let mut results: Vec<SitemapUrl> = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        // (url, depth) work list
        let mut queue: Vec<(String, usize)> =
            sitemap_urls.iter().map(|u| (u.clone(), 0)).collect();

        while let Some((sitemap_url, depth)) = queue.pop() {
            if results.len() >= parser::MAX_URLS {
                warn!(cap = parser::MAX_URLS, "sitemap URL cap reached, stopping");
                break;
            }
            if !visited.insert(sitemap_url.clone()) {
                continue;
            }

            let xml = match self.fetch_sitemap_body(&sitemap_url).await {
                Ok(xml) => xml,
                Err(e) => {
                    warn!(url = %sitemap_url, error = %e, "sitemap fetch failed, skipping");
                    continue;
                }
            };

            let parsed = match parse_sitemap(&xml, &sitemap_url) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(url = %sitemap_url, error = %e, "sitemap parse failed, skipping");
                    continue;
                }
            };

            if depth < MAX_INDEX_DEPTH {
                for child in parsed.child_sitemaps {
                    queue.push((child, depth + 1));
                }
            }

            let room = parser::MAX_URLS - results.len();
            results.extend(parsed.urls.into_iter().take(room));
        }

        info!(urls = results.len(), "sitemap URLs collected");
        Ok(results)
    }

    /// Whether a HEAD probe at `url` looks like a sitemap.
    async fn probe_is_sitemap(&self, url: &str) -> bool {
        let response = match self.client.head(url).send().await {
            Ok(r) => r,
            Err(_) => return false,
        };
        if !response.status().is_success() {
            return false;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        content_type.contains("xml") || response.url().path().ends_with(".xml")
    }

    /// Fetch a sitemap body, enforcing the size cap.
    async fn fetch_sitemap_body(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Site2RagError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Site2RagError::Network(format!("{url}: HTTP {status}")));
        }

        if let Some(len) = response.content_length() {
            if len > MAX_SITEMAP_BYTES {
                return Err(Site2RagError::validation(format!(
                    "{url}: sitemap too large ({len} bytes, max {MAX_SITEMAP_BYTES})"
                )));
            }
        }

        let body = response
            .text()
            .await
            .map_err(|e| Site2RagError::Network(format!("{url}: body read: {e}")))?;

        if body.len() as u64 > MAX_SITEMAP_BYTES {
            return Err(Site2RagError::validation(format!(
                "{url}: sitemap too large ({} bytes)",
                body.len()
            )));
        }

        Ok(body)
    }

    /// Fetch a small text resource (robots.txt).
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Site2RagError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Site2RagError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .text()
            .await
            .map_err(|e| Site2RagError::Network(format!("{url}: body read: {e}")))
    }
}

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| Site2RagError::validation(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}
