//! Pipeline orchestration for site2rag.
//!
//! Ties sitemap discovery, crawling, and enrichment into one run per output
//! directory, guarded by the single-instance process lock.

pub mod lock;
pub mod processor;

pub use lock::ProcessLock;
pub use processor::{
    ProcessorConfig, ProgressReporter, RunSummary, SilentProgress, SiteProcessor,
};
