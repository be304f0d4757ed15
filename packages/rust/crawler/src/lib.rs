//! Crawl engine: change detection and the frontier orchestrator.
//!
//! This crate provides:
//! - [`change`] — the tiered freshness decision (age → ETag → Last-Modified →
//!   extracted-content hash) and the rolling content hash
//! - [`engine`] — the frontier-driven crawler with binary/HTML dispatch,
//!   depth/limit gates, and the clean limit-reached unwind

pub mod change;
pub mod engine;

pub use change::{ChangeDetector, Decision, DetectorStats, SkipTier, rolling_hash};
pub use engine::{CrawlOutcome, Crawler};
