//! Core domain types for site2rag page records and sitemap entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ContentStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of a page's extracted content, authoritative in the store.
///
/// `Raw` pages are eligible for enrichment; success moves them to `Contexted`.
/// The failure states are revisited by the post-enrichment cleanup phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentStatus {
    Raw,
    Contexted,
    RateLimited,
    Timeout,
    Failed,
    Processing,
}

impl ContentStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Contexted => "contexted",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Failed => "failed",
            Self::Processing => "processing",
        }
    }

    /// States the enrichment orchestrator selects for work.
    pub fn is_enrichable(&self) -> bool {
        matches!(self, Self::Raw | Self::Failed | Self::Processing)
    }

    /// States the cleanup phase retries after the main enrichment pass.
    pub fn is_retryable_failure(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Failed | Self::Processing)
    }
}

impl std::str::FromStr for ContentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "contexted" => Ok(Self::Contexted),
            "rate_limited" => Ok(Self::RateLimited),
            "timeout" => Ok(Self::Timeout),
            "failed" => Ok(Self::Failed),
            "processing" => Ok(Self::Processing),
            other => Err(format!("unknown content status: {other}")),
        }
    }
}

impl std::fmt::Display for ContentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// A crawled URL's durable record in the store, keyed by normalized URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// Canonical (normalized) URL.
    pub url: String,
    /// `ETag` response header from the last 2xx fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// `Last-Modified` response header from the last 2xx fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    /// 32-bit rolling hash of the extracted Markdown (not the raw HTML).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<u32>,
    /// HTTP status of the last fetch (0 for transport errors).
    pub status: u16,
    /// When the URL was last fetched (any outcome).
    pub last_crawled: DateTime<Utc>,
    /// When the content last changed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Page title from extraction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Path of the written Markdown (or binary) file, relative to the output dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Enrichment lifecycle state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_status: Option<ContentStatus>,
}

/// Merge patch for [`PageRecord`]: unspecified fields are preserved on upsert.
#[derive(Debug, Clone, Default)]
pub struct PageUpdate {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub content_hash: Option<u32>,
    pub status: Option<u16>,
    pub last_crawled: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub title: Option<String>,
    pub file_path: Option<String>,
    pub content_status: Option<ContentStatus>,
}

impl PageUpdate {
    /// A patch that only bumps `last_crawled`, used for unchanged pages.
    pub fn touch(now: DateTime<Utc>) -> Self {
        Self {
            last_crawled: Some(now),
            ..Self::default()
        }
    }
}

// ---------------------------------------------------------------------------
// SitemapUrl
// ---------------------------------------------------------------------------

/// A URL discovered in a sitemap, persisted until the crawler visits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapUrl {
    /// The page URL from `<loc>`.
    pub url: String,
    /// The sitemap document this URL came from.
    pub sitemap_url: String,
    /// Language from hreflang self-reference, `xhtml:link`, URL heuristic,
    /// or the `en` canonical fallback.
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastmod: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changefreq: Option<String>,
    /// Set once the crawl orchestrator has visited the URL.
    #[serde(default)]
    pub processed: bool,
}

// ---------------------------------------------------------------------------
// CrawlStats
// ---------------------------------------------------------------------------

/// Per-run counters reported in the end-of-phase summary line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlStats {
    pub pages_crawled: usize,
    pub pages_unchanged: usize,
    pub pages_failed: usize,
    pub binaries_saved: usize,
    /// Skips attributed to each change-detector tier.
    pub skipped_by_age: usize,
    pub skipped_by_etag: usize,
    pub skipped_by_last_modified: usize,
    pub skipped_by_hash: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_status_roundtrip() {
        for status in [
            ContentStatus::Raw,
            ContentStatus::Contexted,
            ContentStatus::RateLimited,
            ContentStatus::Timeout,
            ContentStatus::Failed,
            ContentStatus::Processing,
        ] {
            let parsed: ContentStatus = status.as_str().parse().expect("parse status");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn content_status_rejects_unknown() {
        assert!("enriched".parse::<ContentStatus>().is_err());
    }

    #[test]
    fn enrichable_states() {
        assert!(ContentStatus::Raw.is_enrichable());
        assert!(ContentStatus::Failed.is_enrichable());
        assert!(ContentStatus::Processing.is_enrichable());
        assert!(!ContentStatus::Contexted.is_enrichable());
        assert!(!ContentStatus::RateLimited.is_enrichable());
    }

    #[test]
    fn touch_patch_only_sets_last_crawled() {
        let now = Utc::now();
        let patch = PageUpdate::touch(now);
        assert_eq!(patch.last_crawled, Some(now));
        assert!(patch.etag.is_none());
        assert!(patch.content_status.is_none());
        assert!(patch.content_hash.is_none());
    }

    #[test]
    fn page_record_serialization() {
        let record = PageRecord {
            url: "https://example.com/a".into(),
            etag: Some("W/\"abc\"".into()),
            last_modified: None,
            content_hash: Some(0xdead_beef),
            status: 200,
            last_crawled: Utc::now(),
            last_updated: None,
            title: Some("A".into()),
            file_path: Some("a.md".into()),
            content_status: Some(ContentStatus::Raw),
        };
        let json = serde_json::to_string(&record).expect("serialize");
        assert!(json.contains(r#""content_status":"raw""#));
        let parsed: PageRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.content_hash, Some(0xdead_beef));
    }
}
