//! Process-wide token and cost accounting for AI requests.
//!
//! One tracker is shared by every enrichment worker; progress callbacks read
//! it for display. Totals accumulate across documents and are reset only at
//! process start.

use std::sync::atomic::{AtomicU64, Ordering};

/// Estimated cost per 1 000 tokens, in micro-dollars. Local models are free;
/// this stays configurable for hosted providers.
const DEFAULT_MICRO_DOLLARS_PER_1K: u64 = 0;

/// Shared request/token/cost counters.
#[derive(Debug)]
pub struct AiRequestTracker {
    requests: AtomicU64,
    failures: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    micro_dollars_per_1k: u64,
}

/// Point-in-time view of the tracker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerSnapshot {
    pub requests: u64,
    pub failures: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Estimated cost in dollars.
    pub estimated_cost: f64,
}

impl TrackerSnapshot {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl AiRequestTracker {
    pub fn new() -> Self {
        Self::with_rate(DEFAULT_MICRO_DOLLARS_PER_1K)
    }

    /// Tracker with a cost rate in micro-dollars per 1 000 tokens.
    pub fn with_rate(micro_dollars_per_1k: u64) -> Self {
        Self {
            requests: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            micro_dollars_per_1k,
        }
    }

    /// Record one completed request's token usage.
    pub fn record(&self, prompt_tokens: u64, completion_tokens: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens.fetch_add(prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion_tokens, Ordering::Relaxed);
    }

    /// Record a request that exhausted its retries.
    pub fn record_failure(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let prompt_tokens = self.prompt_tokens.load(Ordering::Relaxed);
        let completion_tokens = self.completion_tokens.load(Ordering::Relaxed);
        let total = prompt_tokens + completion_tokens;
        TrackerSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            prompt_tokens,
            completion_tokens,
            estimated_cost: (total as f64 / 1000.0) * (self.micro_dollars_per_1k as f64 / 1e6),
        }
    }
}

impl Default for AiRequestTracker {
    fn default() -> Self {
        Self::new()
    }
}
