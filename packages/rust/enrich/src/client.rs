//! Bounded-concurrency LLM call layer.
//!
//! A single entry point dispatches prompts to the configured provider
//! (Ollama today; OpenAI/Anthropic are planned variants), extracts the JSON
//! payload from the model output, and validates it into a typed value.
//! Callers see a typed result or a failure kind that routes the page's
//! `content_status`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use site2rag_shared::{Result, Site2RagError};

use crate::session::SessionStore;
use crate::tracker::AiRequestTracker;

/// Global cap on concurrent LLM calls, regardless of worker count.
const MAX_CONCURRENT_CALLS: usize = 3;

/// Rate-smoothing delay before every attempt.
const PRE_CALL_DELAY: Duration = Duration::from_millis(300);

/// Per-call timeout.
const CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// Attempts per call, with exponential delay between them (1 s, 2 s).
const MAX_ATTEMPTS: u32 = 3;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Supported LLM providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    // Planned: OpenAi, Anthropic
}

/// Why a call ultimately failed, after retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallFailure {
    /// HTTP 429 or an equivalent provider throttle.
    RateLimited,
    /// The request timed out.
    Timeout,
    /// The response never yielded schema-valid JSON.
    Invalid,
    /// Transport or provider error.
    Transport,
}

#[derive(serde::Serialize)]
struct OllamaOptions {
    temperature: f64,
    top_p: f64,
    repeat_penalty: f64,
}

#[derive(serde::Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    format: &'a str,
    options: OllamaOptions,
}

#[derive(serde::Deserialize)]
struct OllamaResponse {
    response: String,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Shared LLM client: one semaphore, one session store, one token tracker.
pub struct AiClient {
    http: reqwest::Client,
    provider: Provider,
    host: String,
    model: String,
    semaphore: Semaphore,
    tracker: Arc<AiRequestTracker>,
    pub sessions: SessionStore,
}

impl AiClient {
    pub fn new(host: &str, model: &str, tracker: Arc<AiRequestTracker>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| Site2RagError::Enrichment(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            provider: Provider::Ollama,
            host: host.trim_end_matches('/').to_string(),
            model: model.to_string(),
            semaphore: Semaphore::new(MAX_CONCURRENT_CALLS),
            tracker,
            sessions: SessionStore::new(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn tracker(&self) -> &AiRequestTracker {
        &self.tracker
    }

    /// Window/overlap word budget for the configured model.
    pub fn window_profile(&self) -> (usize, usize) {
        let model = self.model.to_lowercase();
        let window = if model.contains("llama3") || model.contains("qwen") || model.contains("mistral")
        {
            2400
        } else if model.contains("phi") {
            1600
        } else {
            1200
        };
        (window, window / 2)
    }

    /// Issue one call and validate the response into `T`.
    ///
    /// Holds a semaphore permit for the whole call, sleeps 300 ms for rate
    /// smoothing, retries up to 3 attempts with 1 s / 2 s delays, and returns
    /// the final failure kind on exhaustion.
    pub async fn call<T: DeserializeOwned>(
        &self,
        session_id: Option<&str>,
        prompt: &str,
    ) -> std::result::Result<T, CallFailure> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("semaphore closed");

        tokio::time::sleep(PRE_CALL_DELAY).await;

        let full_prompt = match session_id {
            Some(id) => self.sessions.apply(id, prompt).await,
            None => prompt.to_string(),
        };

        let mut last_failure = CallFailure::Transport;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.dispatch(&full_prompt).await {
                Ok((raw, prompt_tokens, completion_tokens)) => {
                    match parse_payload::<T>(&raw) {
                        Some(value) => {
                            self.tracker.record(prompt_tokens, completion_tokens);
                            return Ok(value);
                        }
                        None => {
                            debug!(attempt, "model output failed schema validation");
                            last_failure = CallFailure::Invalid;
                        }
                    }
                }
                Err(failure) => {
                    debug!(attempt, ?failure, "AI call attempt failed");
                    last_failure = failure;
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
            }
        }

        self.tracker.record_failure();
        warn!(model = %self.model, ?last_failure, "AI call exhausted its retries");
        Err(last_failure)
    }

    /// One provider round trip. Returns the raw output string plus token
    /// counts.
    async fn dispatch(
        &self,
        prompt: &str,
    ) -> std::result::Result<(String, u64, u64), CallFailure> {
        match self.provider {
            Provider::Ollama => self.dispatch_ollama(prompt).await,
        }
    }

    async fn dispatch_ollama(
        &self,
        prompt: &str,
    ) -> std::result::Result<(String, u64, u64), CallFailure> {
        let body = OllamaRequest {
            model: &self.model,
            prompt,
            stream: false,
            format: "json",
            options: OllamaOptions {
                temperature: 0.1,
                top_p: 0.9,
                repeat_penalty: 1.1,
            },
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.host))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallFailure::Timeout
                } else {
                    CallFailure::Transport
                }
            })?;

        match response.status().as_u16() {
            429 => return Err(CallFailure::RateLimited),
            status if status >= 400 => return Err(CallFailure::Transport),
            _ => {}
        }

        let payload: OllamaResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                CallFailure::Timeout
            } else {
                CallFailure::Transport
            }
        })?;

        Ok((payload.response, payload.prompt_eval_count, payload.eval_count))
    }
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Extract, sanitize, and deserialize the model's JSON payload.
fn parse_payload<T: DeserializeOwned>(raw: &str) -> Option<T> {
    let candidate = extract_json(raw)?;
    let sanitized = strip_control_chars(&candidate);
    serde_json::from_str(&sanitized).ok()
}

/// Prefer a fenced ```json block; otherwise the first balanced `{…}` span.
fn extract_json(raw: &str) -> Option<String> {
    if let Some(fence_start) = raw.find("```json") {
        let after = &raw[fence_start + 7..];
        if let Some(fence_end) = after.find("```") {
            return Some(after[..fence_end].trim().to_string());
        }
    }

    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in raw[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(raw[start..start + offset + 1].to_string());
                }
            }
            _ => {}
        }
    }

    None
}

/// Strip U+0000–U+001F and U+007F–U+009F.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| {
            let code = *c as u32;
            !(code <= 0x1F || (0x7F..=0x9F).contains(&code))
        })
        .collect()
}
