//! Content and metadata extraction from crawled HTML.
//!
//! This crate provides:
//! - [`extract_content`] — framework-aware main-content selection with
//!   navigation/boilerplate cleanup and a removal trace
//! - [`extract_metadata`] — JSON-LD + meta + Open Graph + byline fusion
//!
//! Both are synchronous; parsed documents never cross an await point.

pub mod content;
pub mod metadata;

pub use content::{ExtractedContent, RemovedBlock, extract_content};
pub use metadata::{AuthorDetails, DocumentMetadata, extract_metadata};
