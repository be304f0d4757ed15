//! Tiered freshness decision for revisited URLs.
//!
//! Four tiers, fastest first: age filter (pre-fetch), ETag match,
//! Last-Modified match, extracted-content hash. Any tier that says
//! *unchanged* short-circuits body processing; only `last_crawled` is
//! bumped, so previously enriched content is never re-enriched.

use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::Utc;
use site2rag_shared::PageRecord;

// ---------------------------------------------------------------------------
// Rolling hash
// ---------------------------------------------------------------------------

/// Cheap 32-bit rolling hash over extracted Markdown.
///
/// Collisions are tolerated: three header-level tiers run before this one,
/// and a collision only costs a skipped re-extraction.
pub fn rolling_hash(content: &str) -> u32 {
    let mut hash: u32 = 5381;
    for byte in content.bytes() {
        hash = hash.wrapping_mul(33) ^ u32::from(byte);
    }
    hash
}

// ---------------------------------------------------------------------------
// Decision types
// ---------------------------------------------------------------------------

/// Which tier declared a page unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipTier {
    Age,
    Etag,
    LastModified,
    Hash,
}

/// Outcome of the change decision for one URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No stored row existed.
    New,
    /// Stored row exists and the content differs.
    Changed,
    /// A tier matched; skip body processing and bump `last_crawled` only.
    Unchanged(SkipTier),
}

/// Per-run tier counters for the summary line.
#[derive(Debug, Clone, Default)]
pub struct DetectorStats {
    pub skipped_by_age: usize,
    pub skipped_by_etag: usize,
    pub skipped_by_last_modified: usize,
    pub skipped_by_hash: usize,
    pub new_pages: usize,
    pub updated_pages: usize,
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Shared, thread-safe change detector.
pub struct ChangeDetector {
    min_age_hours: Option<u64>,
    fast_recheck_hours: Option<u64>,
    skipped_age: AtomicUsize,
    skipped_etag: AtomicUsize,
    skipped_last_modified: AtomicUsize,
    skipped_hash: AtomicUsize,
    new_pages: AtomicUsize,
    updated_pages: AtomicUsize,
}

impl ChangeDetector {
    pub fn new(min_age_hours: Option<u64>, fast_recheck_hours: Option<u64>) -> Self {
        Self {
            min_age_hours,
            fast_recheck_hours,
            skipped_age: AtomicUsize::new(0),
            skipped_etag: AtomicUsize::new(0),
            skipped_last_modified: AtomicUsize::new(0),
            skipped_hash: AtomicUsize::new(0),
            new_pages: AtomicUsize::new(0),
            updated_pages: AtomicUsize::new(0),
        }
    }

    /// Tier 1 (pre-fetch): recently crawled and not in the fast-recheck
    /// window means skip without any network traffic.
    pub fn skip_by_age(&self, page: &PageRecord) -> bool {
        let Some(min_age) = self.min_age_hours else {
            return false;
        };

        let age_hours = (Utc::now() - page.last_crawled).num_hours();
        if age_hours < 0 || age_hours as u64 >= min_age {
            return false;
        }

        // Pages that also changed recently are re-checked despite their age.
        if let (Some(fast), Some(updated)) = (self.fast_recheck_hours, page.last_updated) {
            let updated_hours = (Utc::now() - updated).num_hours();
            if updated_hours >= 0 && (updated_hours as u64) < fast {
                return false;
            }
        }

        self.skipped_age.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Build `If-None-Match` / `If-Modified-Since` headers from a stored row.
    pub fn conditional_headers(page: Option<&PageRecord>) -> Vec<(String, String)> {
        let mut headers = Vec::new();
        if let Some(page) = page {
            if let Some(etag) = &page.etag {
                headers.push(("If-None-Match".to_string(), etag.clone()));
            }
            if let Some(last_modified) = &page.last_modified {
                headers.push(("If-Modified-Since".to_string(), last_modified.clone()));
            }
        }
        headers
    }

    /// Tiers 2–4 on a 2xx response with extracted content in hand.
    pub fn decide(
        &self,
        page: Option<&PageRecord>,
        response_etag: Option<&str>,
        response_last_modified: Option<&str>,
        extracted_hash: u32,
    ) -> Decision {
        let Some(page) = page else {
            self.new_pages.fetch_add(1, Ordering::Relaxed);
            return Decision::New;
        };

        if let (Some(stored), Some(fresh)) = (page.etag.as_deref(), response_etag) {
            if stored == fresh {
                self.skipped_etag.fetch_add(1, Ordering::Relaxed);
                return Decision::Unchanged(SkipTier::Etag);
            }
        }

        if let (Some(stored), Some(fresh)) =
            (page.last_modified.as_deref(), response_last_modified)
        {
            if stored == fresh {
                self.skipped_last_modified.fetch_add(1, Ordering::Relaxed);
                return Decision::Unchanged(SkipTier::LastModified);
            }
        }

        if page.content_hash == Some(extracted_hash) {
            self.skipped_hash.fetch_add(1, Ordering::Relaxed);
            return Decision::Unchanged(SkipTier::Hash);
        }

        self.updated_pages.fetch_add(1, Ordering::Relaxed);
        Decision::Changed
    }

    /// Record a 304 response (the server honored our conditional headers).
    pub fn note_not_modified(&self, sent_etag: bool) {
        if sent_etag {
            self.skipped_etag.fetch_add(1, Ordering::Relaxed);
        } else {
            self.skipped_last_modified.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Snapshot of the per-tier counters.
    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            skipped_by_age: self.skipped_age.load(Ordering::Relaxed),
            skipped_by_etag: self.skipped_etag.load(Ordering::Relaxed),
            skipped_by_last_modified: self.skipped_last_modified.load(Ordering::Relaxed),
            skipped_by_hash: self.skipped_hash.load(Ordering::Relaxed),
            new_pages: self.new_pages.load(Ordering::Relaxed),
            updated_pages: self.updated_pages.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use site2rag_shared::ContentStatus;

    fn page(etag: Option<&str>, last_modified: Option<&str>, hash: Option<u32>) -> PageRecord {
        PageRecord {
            url: "https://example.com/a".into(),
            etag: etag.map(String::from),
            last_modified: last_modified.map(String::from),
            content_hash: hash,
            status: 200,
            last_crawled: Utc::now(),
            last_updated: None,
            title: None,
            file_path: Some("a.md".into()),
            content_status: Some(ContentStatus::Contexted),
        }
    }

    #[test]
    fn rolling_hash_is_stable_and_discriminates() {
        let a = rolling_hash("hello world");
        assert_eq!(a, rolling_hash("hello world"));
        assert_ne!(a, rolling_hash("hello worlds"));
        assert_ne!(rolling_hash(""), rolling_hash(" "));
    }

    #[test]
    fn new_page_when_no_row() {
        let detector = ChangeDetector::new(None, None);
        assert_eq!(detector.decide(None, None, None, 1), Decision::New);
        assert_eq!(detector.stats().new_pages, 1);
    }

    #[test]
    fn etag_match_short_circuits() {
        let detector = ChangeDetector::new(None, None);
        let page = page(Some("W/\"abc\""), Some("old"), Some(1));
        // Last-Modified differs and hash differs, but the ETag tier wins first
        let decision = detector.decide(Some(&page), Some("W/\"abc\""), Some("new"), 2);
        assert_eq!(decision, Decision::Unchanged(SkipTier::Etag));
        assert_eq!(detector.stats().skipped_by_etag, 1);
    }

    #[test]
    fn last_modified_match_after_etag_mismatch() {
        let detector = ChangeDetector::new(None, None);
        let page = page(Some("W/\"abc\""), Some("Mon, 01 Jan 2024 00:00:00 GMT"), Some(1));
        let decision = detector.decide(
            Some(&page),
            Some("W/\"def\""),
            Some("Mon, 01 Jan 2024 00:00:00 GMT"),
            2,
        );
        assert_eq!(decision, Decision::Unchanged(SkipTier::LastModified));
    }

    #[test]
    fn hash_match_is_final_gate() {
        let detector = ChangeDetector::new(None, None);
        let page = page(Some("W/\"abc\""), Some("old"), Some(777));
        let decision = detector.decide(Some(&page), Some("W/\"def\""), Some("new"), 777);
        assert_eq!(decision, Decision::Unchanged(SkipTier::Hash));
    }

    #[test]
    fn all_tiers_miss_means_changed() {
        let detector = ChangeDetector::new(None, None);
        let page = page(Some("W/\"abc\""), Some("old"), Some(1));
        let decision = detector.decide(Some(&page), Some("W/\"def\""), Some("new"), 2);
        assert_eq!(decision, Decision::Changed);
        assert_eq!(detector.stats().updated_pages, 1);
    }

    #[test]
    fn monotonicity_same_inputs_always_unchanged() {
        let detector = ChangeDetector::new(None, None);
        let page = page(Some("W/\"x\""), Some("lm"), Some(9));
        for _ in 0..3 {
            let decision = detector.decide(Some(&page), Some("W/\"x\""), Some("lm"), 9);
            assert!(matches!(decision, Decision::Unchanged(_)));
        }
    }

    #[test]
    fn age_filter_skips_recent_pages() {
        let detector = ChangeDetector::new(Some(24), None);
        let mut recent = page(None, None, None);
        recent.last_crawled = Utc::now() - Duration::hours(2);
        assert!(detector.skip_by_age(&recent));

        let mut stale = page(None, None, None);
        stale.last_crawled = Utc::now() - Duration::hours(48);
        assert!(!detector.skip_by_age(&stale));
    }

    #[test]
    fn fast_recheck_overrides_age_skip() {
        let detector = ChangeDetector::new(Some(24), Some(6));
        let mut hot = page(None, None, None);
        hot.last_crawled = Utc::now() - Duration::hours(2);
        hot.last_updated = Some(Utc::now() - Duration::hours(1));
        // Recently updated page stays eligible despite its young crawl age
        assert!(!detector.skip_by_age(&hot));
    }

    #[test]
    fn age_filter_disabled_by_default() {
        let detector = ChangeDetector::new(None, None);
        let mut recent = page(None, None, None);
        recent.last_crawled = Utc::now();
        assert!(!detector.skip_by_age(&recent));
    }

    #[test]
    fn conditional_headers_from_row() {
        let page = page(Some("W/\"abc\""), Some("Mon, 01 Jan 2024 00:00:00 GMT"), None);
        let headers = ChangeDetector::conditional_headers(Some(&page));
        assert!(headers.contains(&("If-None-Match".into(), "W/\"abc\"".into())));
        assert!(
            headers.contains(&("If-Modified-Since".into(), "Mon, 01 Jan 2024 00:00:00 GMT".into()))
        );

        assert!(ChangeDetector::conditional_headers(None).is_empty());
    }
}
