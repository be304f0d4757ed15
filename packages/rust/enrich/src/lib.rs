//! Context enrichment: window planning, LLM dispatch, and validation.
//!
//! This crate adds `[[…]]` disambiguation annotations to crawled Markdown:
//! - [`planner`] — paragraph splitting, sliding windows, ~500-word batches
//! - [`client`] — the bounded-concurrency LLM call layer (Ollama)
//! - [`session`] — per-document cached-context sessions
//! - [`tracker`] — process-wide token/cost accounting
//! - [`validate`] — the preservation invariant for enhanced paragraphs
//! - [`orchestrator`] — per-page orchestration and `content_status` routing

pub mod client;
pub mod orchestrator;
pub mod planner;
pub mod session;
pub mod tracker;
pub mod validate;

pub use client::{AiClient, CallFailure, Provider};
pub use orchestrator::{
    ENRICHMENT_RULES, EnrichProgress, Enricher, EnrichmentOutcome, SilentEnrichProgress,
};
pub use planner::{Batch, SplitDocument, Window, plan_windows};
pub use session::{SessionStats, SessionStore};
pub use tracker::{AiRequestTracker, TrackerSnapshot};
pub use validate::{is_preserved, normalize, strip_annotations};
