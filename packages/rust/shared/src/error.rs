//! Error types for site2rag.
//!
//! Library crates use [`Site2RagError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all site2rag operations.
#[derive(Debug, thiserror::Error)]
pub enum Site2RagError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error during fetch or discovery.
    #[error("fetch error: {0}")]
    Network(String),

    /// A redirect chain exceeded the configured limit.
    #[error("too many redirects fetching {url}")]
    TooManyRedirects { url: String },

    /// Seed or link URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// LLM enrichment error (provider, transport, or response parsing).
    #[error("enrichment error: {0}")]
    Enrichment(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (schema mismatch, invalid format, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// HTML-to-Markdown conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The crawl reached its page limit. This is an orderly-unwind signal,
    /// not a failure; the orchestrator catches it and returns success.
    #[error("crawl page limit reached")]
    CrawlLimitReached,

    /// Another site2rag process holds the output-directory lock.
    #[error("another site2rag instance is already running (pid {pid})")]
    LockHeld { pid: u32 },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, Site2RagError>;

impl Site2RagError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error is the orderly crawl-limit signal.
    pub fn is_crawl_limit(&self) -> bool {
        matches!(self, Self::CrawlLimitReached)
    }
}
