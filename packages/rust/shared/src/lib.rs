//! Shared types, error model, configuration, and URL utilities for site2rag.
//!
//! This crate is the foundation depended on by all other site2rag crates.
//! It provides:
//! - [`Site2RagError`] — the unified error type
//! - Domain types ([`PageRecord`], [`ContentStatus`], [`SitemapUrl`])
//! - Configuration ([`AppConfig`], [`CrawlConfig`], config loading)
//! - URL utilities ([`urls::normalize`], [`urls::safe_filename`], glob matching)

pub mod config;
pub mod error;
pub mod types;
pub mod urls;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CrawlConfig, CrawlPoliciesConfig, DefaultsConfig, EnrichConfig, OllamaConfig,
    USER_AGENT, config_dir, config_file_path, init_config, load_config, load_config_from,
};
pub use error::{Result, Site2RagError};
pub use types::{ContentStatus, CrawlStats, PageRecord, PageUpdate, SitemapUrl};
