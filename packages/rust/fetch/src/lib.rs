//! Polite HTTP fetcher with robots compliance, conditional requests,
//! cancellation, and streaming progress.
//!
//! One [`Fetcher`] is shared by the crawl workers. It enforces a minimum
//! spacing between request starts (sleeping, never dropping), consults
//! robots.txt once per host, follows up to 20 redirects, and surfaces
//! 4xx/5xx and 304 responses as data rather than errors.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use robotstxt::DefaultMatcher;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use site2rag_shared::{Result, Site2RagError, USER_AGENT};

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the per-host robots.txt probe.
const ROBOTS_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum redirects before a chain is rejected.
const MAX_REDIRECTS: usize = 20;

/// Progress callback: `(bytes_received, total_or_0)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Per-request options.
#[derive(Default, Clone)]
pub struct FetchOptions {
    /// Extra request headers (conditional headers go here).
    pub headers: Vec<(String, String)>,
    /// Override the default 30 s timeout.
    pub timeout: Option<Duration>,
    /// Streaming progress callback.
    pub on_progress: Option<ProgressFn>,
}

/// A completed fetch. 4xx/5xx and 304 land here too; only transport
/// failures become errors.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers, lowercased names.
    pub headers: HashMap<String, String>,
    /// Final URL after redirects.
    pub final_url: String,
    body: Vec<u8>,
}

impl FetchResponse {
    /// Body as text (lossy UTF-8).
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body as raw bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.body
    }

    /// Body length in bytes.
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Whether the body is empty.
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }

    /// A response header by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// The `Content-Type` header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Polite, robots-aware HTTP fetcher shared by all crawl workers.
pub struct Fetcher {
    client: reqwest::Client,
    user_agent: String,
    politeness_ms: u64,
    /// Start instant of the previous request; the politeness gate.
    last_start: Mutex<Option<Instant>>,
    /// Raw robots.txt body per host; empty string means allow-all.
    robots: Mutex<HashMap<String, String>>,
    cancel: CancellationToken,
}

impl Fetcher {
    /// Create a fetcher with the given politeness spacing.
    pub fn new(politeness_ms: u64) -> Result<Self> {
        Self::with_user_agent(politeness_ms, USER_AGENT)
    }

    /// Create a fetcher with a custom user agent.
    pub fn with_user_agent(politeness_ms: u64, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| Site2RagError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            user_agent: user_agent.to_string(),
            politeness_ms,
            last_start: Mutex::new(None),
            robots: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
        })
    }

    /// Handle that cancels every in-flight request when triggered.
    pub fn abort_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancel all in-flight requests and refuse new ones.
    pub fn cancel_all(&self) {
        self.cancel.cancel();
    }

    /// Fetch a URL, honoring politeness spacing and cancellation.
    pub async fn fetch(&self, url: &str, opts: FetchOptions) -> Result<FetchResponse> {
        if self.cancel.is_cancelled() {
            return Err(Site2RagError::Network("fetch cancelled".into()));
        }

        self.polite_wait().await;

        let mut request = self.client.get(url);
        for (name, value) in &opts.headers {
            request = request.header(name, value);
        }
        if let Some(timeout) = opts.timeout {
            request = request.timeout(timeout);
        }

        let send = async {
            let response = request.send().await.map_err(|e| {
                if e.is_redirect() {
                    Site2RagError::TooManyRedirects { url: url.to_string() }
                } else {
                    Site2RagError::Network(format!("{url}: {e}"))
                }
            })?;

            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
                })
                .collect();

            let total = response.content_length().unwrap_or(0);
            let body = if let Some(progress) = &opts.on_progress {
                let mut body: Vec<u8> = Vec::new();
                let mut stream = response.bytes_stream();
                while let Some(chunk) = stream.next().await {
                    let chunk = chunk
                        .map_err(|e| Site2RagError::Network(format!("{url}: body read: {e}")))?;
                    body.extend_from_slice(&chunk);
                    progress(body.len() as u64, total);
                }
                progress(body.len() as u64, total);
                body
            } else {
                response
                    .bytes()
                    .await
                    .map_err(|e| Site2RagError::Network(format!("{url}: body read: {e}")))?
                    .to_vec()
            };

            Ok(FetchResponse {
                status,
                headers,
                final_url,
                body,
            })
        };

        tokio::select! {
            _ = self.cancel.cancelled() => Err(Site2RagError::Network("fetch cancelled".into())),
            result = send => result,
        }
    }

    /// Issue a HEAD request (used by sitemap path probing).
    pub async fn head(&self, url: &str) -> Result<FetchResponse> {
        self.polite_wait().await;

        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| Site2RagError::Network(format!("{url}: {e}")))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        Ok(FetchResponse {
            status,
            headers,
            final_url,
            body: Vec::new(),
        })
    }

    /// Whether robots.txt allows this URL for the configured user agent.
    ///
    /// The first call per host fetches `/robots.txt`; any failure is treated
    /// as allow-all so an unreachable robots file never blocks a crawl.
    pub async fn can_crawl(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_string();

        let body = {
            let mut robots = self.robots.lock().await;
            match robots.get(&host) {
                Some(body) => body.clone(),
                None => {
                    let body = self.fetch_robots(&parsed).await;
                    robots.insert(host.clone(), body.clone());
                    body
                }
            }
        };

        if body.is_empty() {
            return true;
        }

        DefaultMatcher::default().one_agent_allowed_by_robots(&body, &self.user_agent, url)
    }

    /// Fetch robots.txt for a URL's origin; empty string on any failure.
    async fn fetch_robots(&self, url: &Url) -> String {
        let origin = match url.port() {
            Some(port) => format!(
                "{}://{}:{port}",
                url.scheme(),
                url.host_str().unwrap_or_default()
            ),
            None => format!("{}://{}", url.scheme(), url.host_str().unwrap_or_default()),
        };
        let robots_url = format!("{origin}/robots.txt");

        match self
            .client
            .get(&robots_url)
            .timeout(ROBOTS_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => {
                debug!(url = %robots_url, "robots.txt loaded");
                response.text().await.unwrap_or_default()
            }
            Ok(response) => {
                debug!(url = %robots_url, status = response.status().as_u16(), "no robots.txt, allowing all");
                String::new()
            }
            Err(e) => {
                warn!(url = %robots_url, error = %e, "robots.txt fetch failed, allowing all");
                String::new()
            }
        }
    }

    /// Sleep out the remainder of the politeness window, measured from the
    /// start of the previous request. Holding the lock across the sleep
    /// serializes request starts.
    async fn polite_wait(&self) {
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let min = Duration::from_millis(self.politeness_ms);
            let elapsed = prev.elapsed();
            if elapsed < min {
                tokio::time::sleep(min - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}
