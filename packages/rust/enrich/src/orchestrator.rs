//! Per-document enrichment orchestration.
//!
//! Selects crawled pages still awaiting enrichment, plans windows and
//! batches, dispatches bounded-concurrency LLM calls, validates every
//! enhanced paragraph against the preservation invariant, merges by original
//! paragraph index, and routes failures into the page's `content_status`.
//! A cleanup phase retries failure states with a 2 s gap.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use site2rag_crawler::rolling_hash;
use site2rag_shared::{ContentStatus, PageRecord, PageUpdate, Result, Site2RagError};
use site2rag_storage::Storage;

use crate::client::{AiClient, CallFailure};
use crate::planner::{self, Batch, SplitDocument, Window};
use crate::tracker::TrackerSnapshot;
use crate::validate;

/// Gap between retries in the post-enrichment cleanup phase.
const CLEANUP_RETRY_GAP: Duration = Duration::from_secs(2);

/// Validation retries per batch (the call layer retries transport below this).
const BATCH_VALIDATION_ATTEMPTS: u32 = 3;

/// The instruction block pushed into every document session.
pub const ENRICHMENT_RULES: &str = "\
RULES:
- Only annotations in [[…]] may be added; nothing else may change, not even punctuation or whitespace.
- Annotations may only introduce information that appears elsewhere in the provided window context.
- Annotations target pronouns, deictic references (\"this\"/\"that\"/\"these\"), acronyms (expanded to a form present in the document), temporal and geographic clarifications, and role/relationship qualifiers.
- URLs, image alt text, and any other Markdown syntax are untouchable; no [[…]] inside links/images/code fences.
- Do not repeat information already explicit in the same sentence.";

// ---------------------------------------------------------------------------
// Progress + outcome
// ---------------------------------------------------------------------------

/// Progress callback for enrichment.
pub trait EnrichProgress: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Per-document progress within the current phase.
    fn document(&self, current: usize, total: usize, detail: &str);
}

/// No-op progress for headless/test usage.
pub struct SilentEnrichProgress;

impl EnrichProgress for SilentEnrichProgress {
    fn phase(&self, _name: &str) {}
    fn document(&self, _current: usize, _total: usize, _detail: &str) {}
}

/// Summary of an enrichment run.
#[derive(Debug, Clone)]
pub struct EnrichmentOutcome {
    /// Pages that reached `contexted`.
    pub enriched: usize,
    /// Pages left in a failure state after cleanup.
    pub failed: usize,
    /// Token/cost totals at completion.
    pub tokens: TrackerSnapshot,
}

/// Expected response shape: one entry per input paragraph, in order.
#[derive(Debug, serde::Deserialize)]
struct EnhancedBatch {
    enhanced_paragraphs: Vec<EnhancedParagraph>,
}

#[derive(Debug, serde::Deserialize)]
struct EnhancedParagraph {
    text: String,
    #[serde(default)]
    #[allow(dead_code)]
    summary: String,
}

// ---------------------------------------------------------------------------
// Enricher
// ---------------------------------------------------------------------------

/// Drives enrichment for the pages crawled in the current session.
pub struct Enricher {
    client: Arc<AiClient>,
    output_dir: PathBuf,
}

impl Enricher {
    pub fn new(client: Arc<AiClient>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            output_dir: output_dir.into(),
        }
    }

    /// Enrich every eligible page among `session_urls`, then run the cleanup
    /// phase over pages left in a failure state.
    #[instrument(skip_all, fields(session_urls = session_urls.len()))]
    pub async fn enrich_pages(
        &self,
        storage: &Storage,
        session_urls: &[String],
        progress: &dyn EnrichProgress,
    ) -> Result<EnrichmentOutcome> {
        progress.phase("Enriching pages");

        let pages = storage
            .pages_matching(
                session_urls,
                &[
                    ContentStatus::Raw,
                    ContentStatus::Failed,
                    ContentStatus::Processing,
                ],
            )
            .await?;

        let total = pages.len();
        info!(total, "enrichment candidates selected");

        let mut enriched = 0;
        for (i, page) in pages.iter().enumerate() {
            progress.document(i + 1, total, &page.url);
            match self.enrich_page(storage, page).await {
                Ok(ContentStatus::Contexted) => enriched += 1,
                Ok(status) => debug!(url = %page.url, %status, "page not enriched"),
                Err(e) => warn!(url = %page.url, error = %e, "enrichment error"),
            }
        }

        // Cleanup phase: one more try for everything that landed in a
        // failure state, spaced 2 s apart.
        let retryable = storage
            .pages_matching(
                session_urls,
                &[
                    ContentStatus::RateLimited,
                    ContentStatus::Timeout,
                    ContentStatus::Failed,
                    ContentStatus::Processing,
                ],
            )
            .await?;

        if !retryable.is_empty() {
            progress.phase("Retrying failed pages");
            info!(count = retryable.len(), "cleanup phase retrying failure states");

            for (i, page) in retryable.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(CLEANUP_RETRY_GAP).await;
                }
                progress.document(i + 1, retryable.len(), &page.url);
                match self.enrich_page(storage, page).await {
                    Ok(ContentStatus::Contexted) => enriched += 1,
                    Ok(_) | Err(_) => {}
                }
            }
        }

        let failed = storage
            .pages_matching(
                session_urls,
                &[
                    ContentStatus::RateLimited,
                    ContentStatus::Timeout,
                    ContentStatus::Failed,
                    ContentStatus::Processing,
                ],
            )
            .await?
            .len();

        let tokens = self.client.tracker().snapshot();
        info!(
            enriched,
            failed,
            tokens = tokens.total_tokens(),
            "enrichment complete"
        );

        Ok(EnrichmentOutcome {
            enriched,
            failed,
            tokens,
        })
    }

    /// Enrich a single page. Returns the `content_status` it was left in.
    async fn enrich_page(&self, storage: &Storage, page: &PageRecord) -> Result<ContentStatus> {
        let Some(relative) = page.file_path.as_deref() else {
            return Err(Site2RagError::validation(format!(
                "{}: no file to enrich",
                page.url
            )));
        };
        let path = self.output_dir.join(relative);
        let content =
            std::fs::read_to_string(&path).map_err(|e| Site2RagError::io(&path, e))?;

        let (front, body) = split_frontmatter(&content);

        storage
            .upsert_page(
                &page.url,
                &PageUpdate {
                    content_status: Some(ContentStatus::Processing),
                    ..Default::default()
                },
            )
            .await?;

        // Plan windows and batches for this model's budget
        let (window_size, _overlap) = self.client.window_profile();
        let doc = SplitDocument::parse(&body);
        let windows = planner::plan_windows(&doc, window_size);

        // Document session: stable instruction prefix for every call
        let instructions = build_instructions(page, frontmatter_description(&front).as_deref());
        self.client.sessions.open(&page.url, instructions).await;

        let paragraphs = doc.paragraphs();
        let mut replacements: HashMap<usize, String> = HashMap::new();
        let mut worst_failure: Option<CallFailure> = None;

        for window in &windows {
            // Batches fully covered by an earlier (overlapping) window are done
            let pending: Vec<&Batch> = window
                .batches
                .iter()
                .filter(|batch| {
                    batch
                        .paragraph_indices
                        .iter()
                        .any(|i| !replacements.contains_key(i))
                })
                .collect();

            // Dispatch this window's batches concurrently; the client's
            // semaphore bounds real parallelism. Completion order does not
            // matter: merging is by original paragraph index.
            let results = futures_util::future::join_all(
                pending
                    .iter()
                    .map(|batch| self.process_batch(page, window, batch, &paragraphs)),
            )
            .await;

            for (batch, result) in pending.iter().zip(results) {
                match result {
                    Ok(valid) => {
                        for (index, text) in valid {
                            replacements.entry(index).or_insert(text);
                        }
                    }
                    Err(failure) => {
                        worst_failure = Some(merge_failure(worst_failure, failure));
                        debug!(
                            url = %page.url,
                            indices = ?batch.paragraph_indices,
                            "batch permanently failed, originals kept"
                        );
                    }
                }
            }
        }

        self.client.sessions.close(&page.url).await;

        let status = if let Some(failure) = worst_failure {
            // Originals stay on disk; the cleanup phase will retry.
            match failure {
                CallFailure::RateLimited => ContentStatus::RateLimited,
                CallFailure::Timeout => ContentStatus::Timeout,
                CallFailure::Invalid | CallFailure::Transport => ContentStatus::Failed,
            }
        } else {
            let merged = doc.rebuild(&replacements);
            let enhanced = format!("{front}{merged}");
            std::fs::write(&path, &enhanced).map_err(|e| Site2RagError::io(&path, e))?;

            storage
                .upsert_page(
                    &page.url,
                    &PageUpdate {
                        content_hash: Some(rolling_hash(&merged)),
                        ..Default::default()
                    },
                )
                .await?;

            ContentStatus::Contexted
        };

        storage
            .upsert_page(
                &page.url,
                &PageUpdate {
                    content_status: Some(status),
                    ..Default::default()
                },
            )
            .await?;

        Ok(status)
    }

    /// Run one batch through the LLM with per-batch validation retries.
    ///
    /// Returns the validated `(paragraph_index, enhanced_text)` pairs;
    /// paragraphs whose enhancement never validates fall back to their
    /// originals (by simply not appearing in the result). A call-layer
    /// failure is permanent for this batch.
    async fn process_batch(
        &self,
        page: &PageRecord,
        window: &Window,
        batch: &Batch,
        paragraphs: &[&str],
    ) -> std::result::Result<Vec<(usize, String)>, CallFailure> {
        let prompt = build_batch_prompt(window, batch);

        for attempt in 1..=BATCH_VALIDATION_ATTEMPTS {
            let response: EnhancedBatch = self.client.call(Some(&page.url), &prompt).await?;

            if response.enhanced_paragraphs.len() != batch.paragraph_indices.len() {
                debug!(
                    url = %page.url,
                    attempt,
                    got = response.enhanced_paragraphs.len(),
                    want = batch.paragraph_indices.len(),
                    "paragraph count mismatch, retrying batch"
                );
                continue;
            }

            let mut valid = Vec::new();
            let mut all_valid = true;

            for (&index, enhanced) in batch
                .paragraph_indices
                .iter()
                .zip(&response.enhanced_paragraphs)
            {
                let original = paragraphs[index];
                if validate::is_preserved(original, &enhanced.text) {
                    valid.push((index, reattach_newline(original, &enhanced.text)));
                } else {
                    all_valid = false;
                }
            }

            if all_valid || attempt == BATCH_VALIDATION_ATTEMPTS {
                // On the final attempt, keep whatever validated; the rest
                // stay original.
                return Ok(valid);
            }
            debug!(url = %page.url, attempt, "validation failures, retrying batch");
        }

        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Keep the paragraph's trailing newline if the model dropped it.
fn reattach_newline(original: &str, enhanced: &str) -> String {
    if original.ends_with('\n') && !enhanced.ends_with('\n') {
        format!("{enhanced}\n")
    } else {
        enhanced.to_string()
    }
}

fn merge_failure(current: Option<CallFailure>, new: CallFailure) -> CallFailure {
    // Rate limiting and timeouts carry retry semantics; keep the most
    // specific kind seen.
    match (current, new) {
        (Some(CallFailure::RateLimited), _) | (_, CallFailure::RateLimited) => {
            CallFailure::RateLimited
        }
        (Some(CallFailure::Timeout), _) | (_, CallFailure::Timeout) => CallFailure::Timeout,
        _ => new,
    }
}

/// Document-level cached instructions: identity plus the annotation rules.
fn build_instructions(page: &PageRecord, description: Option<&str>) -> String {
    let title = page.title.as_deref().unwrap_or("(untitled)");
    let mut header = format!(
        "You are adding disambiguating context to a document.\n\
         Title: {title}\nURL: {url}\n",
        url = page.url
    );
    if let Some(description) = description {
        header.push_str(&format!("Description: {description}\n"));
    }
    format!("{header}\n{ENRICHMENT_RULES}")
}

/// Pull the `description:` scalar out of a front-matter block, if present.
fn frontmatter_description(front: &str) -> Option<String> {
    for line in front.lines() {
        if let Some(value) = line.strip_prefix("description:") {
            let value = value.trim().trim_matches('"');
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Per-batch prompt: window context plus the numbered paragraphs.
fn build_batch_prompt(window: &Window, batch: &Batch) -> String {
    let mut prompt = String::from("CONTEXT:\n");
    prompt.push_str(&window.context_text);
    prompt.push_str(
        "\n\nEnhance the following paragraphs. Respond with a JSON object \
         {\"enhanced_paragraphs\": [{\"text\": \"...\", \"summary\": \"...\"}]} \
         containing exactly one entry per paragraph, in order.\n\n",
    );

    for (i, json) in batch.paragraphs_json.iter().enumerate() {
        prompt.push_str(&format!("{}. {json}\n", i + 1));
    }

    prompt
}

/// Split a page file into its front-matter block and body.
fn split_frontmatter(content: &str) -> (String, String) {
    if let Some(rest) = content.strip_prefix("---\n") {
        if let Some(end) = rest.find("\n---\n") {
            let front_len = 4 + end + 5;
            return (
                content[..front_len].to_string(),
                content[front_len..].to_string(),
            );
        }
    }
    (String::new(), content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::AiRequestTracker;
    use chrono::Utc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const FRONT: &str = "---\ntitle: Test Page\nurl: \"https://example.com/a\"\n---\n";

    fn ollama_json(response: &serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "model": "test",
            "response": response.to_string(),
            "prompt_eval_count": 30,
            "eval_count": 15,
        })
    }

    async fn setup(
        llm: &MockServer,
    ) -> (Enricher, Storage, PathBuf, String) {
        let dir = std::env::temp_dir().join(format!("s2r_enrich_{}", Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let storage = Storage::open(&dir.join(".site2rag/site2rag.db"))
            .await
            .unwrap();

        let tracker = Arc::new(AiRequestTracker::new());
        let client = Arc::new(AiClient::new(&llm.uri(), "testmodel", tracker).unwrap());
        let enricher = Enricher::new(client, &dir);

        let url = "https://example.com/a".to_string();
        (enricher, storage, dir, url)
    }

    async fn seed_page(storage: &Storage, dir: &std::path::Path, url: &str, body: &str) {
        std::fs::write(dir.join("a.md"), format!("{FRONT}\n{body}")).unwrap();
        storage
            .upsert_page(
                url,
                &PageUpdate {
                    status: Some(200),
                    last_crawled: Some(Utc::now()),
                    title: Some("Test Page".into()),
                    file_path: Some("a.md".into()),
                    content_status: Some(ContentStatus::Raw),
                    content_hash: Some(rolling_hash(body)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
    }

    #[test]
    fn split_frontmatter_roundtrip() {
        let content = "---\ntitle: X\n---\nBody text.\n";
        let (front, body) = split_frontmatter(content);
        assert_eq!(front, "---\ntitle: X\n---\n");
        assert_eq!(body, "Body text.\n");
        assert_eq!(format!("{front}{body}"), content);

        let (front, body) = split_frontmatter("No front matter.\n");
        assert!(front.is_empty());
        assert_eq!(body, "No front matter.\n");
    }

    #[test]
    fn frontmatter_description_is_extracted() {
        let front = "---\ntitle: T\ndescription: \"A page about things\"\n---\n";
        assert_eq!(
            frontmatter_description(front).as_deref(),
            Some("A page about things")
        );
        assert!(frontmatter_description("---\ntitle: T\n---\n").is_none());
    }

    #[test]
    fn rules_cover_the_annotation_contract() {
        assert!(ENRICHMENT_RULES.contains("Only annotations in [[…]] may be added"));
        assert!(ENRICHMENT_RULES.contains("not even punctuation or whitespace"));
        assert!(ENRICHMENT_RULES.contains("provided window context"));
        assert!(ENRICHMENT_RULES.contains("deictic references"));
        assert!(ENRICHMENT_RULES.contains("acronyms (expanded to a form present in the document)"));
        assert!(ENRICHMENT_RULES.contains("no [[…]] inside links/images/code fences"));
        assert!(ENRICHMENT_RULES.contains("already explicit in the same sentence"));
    }

    #[tokio::test]
    async fn valid_enhancement_reaches_contexted() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_json(
                &serde_json::json!({
                    "enhanced_paragraphs": [
                        {"text": "He [[John Smith]] visited the capital [[Paris]].", "summary": "visit"}
                    ]
                }),
            )))
            .mount(&llm)
            .await;

        let (enricher, storage, dir, url) = setup(&llm).await;
        seed_page(&storage, &dir, &url, "He visited the capital.\n").await;

        let outcome = enricher
            .enrich_pages(&storage, &[url.clone()], &SilentEnrichProgress)
            .await
            .unwrap();

        assert_eq!(outcome.enriched, 1);
        assert_eq!(outcome.failed, 0);
        assert!(outcome.tokens.total_tokens() > 0);

        let page = storage.get_page(&url).await.unwrap().unwrap();
        assert_eq!(page.content_status, Some(ContentStatus::Contexted));

        let content = std::fs::read_to_string(dir.join("a.md")).unwrap();
        assert!(content.starts_with("---\n"), "front-matter preserved");
        assert!(content.contains("He [[John Smith]] visited the capital [[Paris]]."));

        // Hash now reflects the enhanced content
        assert_ne!(
            page.content_hash,
            Some(rolling_hash("He visited the capital.\n"))
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn invalid_enhancement_keeps_original_and_still_succeeds() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_json(
                &serde_json::json!({
                    "enhanced_paragraphs": [
                        {"text": "He visited the city.", "summary": "rewritten"}
                    ]
                }),
            )))
            .mount(&llm)
            .await;

        let (enricher, storage, dir, url) = setup(&llm).await;
        seed_page(&storage, &dir, &url, "He visited the capital.\n").await;

        let outcome = enricher
            .enrich_pages(&storage, &[url.clone()], &SilentEnrichProgress)
            .await
            .unwrap();

        // Validation failures are not call failures: originals are kept and
        // the page still completes.
        assert_eq!(outcome.enriched, 1);

        let content = std::fs::read_to_string(dir.join("a.md")).unwrap();
        assert!(content.contains("He visited the capital."));
        assert!(!content.contains("the city"));

        let page = storage.get_page(&url).await.unwrap().unwrap();
        assert_eq!(page.content_status, Some(ContentStatus::Contexted));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn contexted_pages_are_never_reprocessed() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_json(
                &serde_json::json!({
                    "enhanced_paragraphs": [
                        {"text": "He [[John Smith]] visited the capital.", "summary": ""}
                    ]
                }),
            )))
            .mount(&llm)
            .await;

        let (enricher, storage, dir, url) = setup(&llm).await;
        seed_page(&storage, &dir, &url, "He visited the capital.\n").await;

        enricher
            .enrich_pages(&storage, &[url.clone()], &SilentEnrichProgress)
            .await
            .unwrap();
        let first_calls = llm.received_requests().await.unwrap().len();
        assert!(first_calls > 0);

        // Second run over the same session set: nothing is eligible
        let outcome = enricher
            .enrich_pages(&storage, &[url.clone()], &SilentEnrichProgress)
            .await
            .unwrap();
        assert_eq!(outcome.enriched, 0);
        assert_eq!(
            llm.received_requests().await.unwrap().len(),
            first_calls,
            "no further LLM calls for a contexted page"
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn transport_failure_routes_to_failed_status() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&llm)
            .await;

        let (enricher, storage, dir, url) = setup(&llm).await;
        seed_page(&storage, &dir, &url, "He visited the capital.\n").await;

        let outcome = enricher
            .enrich_pages(&storage, &[url.clone()], &SilentEnrichProgress)
            .await
            .unwrap();

        assert_eq!(outcome.enriched, 0);
        assert_eq!(outcome.failed, 1);

        let page = storage.get_page(&url).await.unwrap().unwrap();
        assert_eq!(page.content_status, Some(ContentStatus::Failed));

        // File still holds the original paragraph
        let content = std::fs::read_to_string(dir.join("a.md")).unwrap();
        assert!(content.contains("He visited the capital."));
        assert!(!content.contains("[["));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn rate_limit_routes_to_rate_limited_status() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&llm)
            .await;

        let (enricher, storage, dir, url) = setup(&llm).await;
        seed_page(&storage, &dir, &url, "He visited the capital.\n").await;

        enricher
            .enrich_pages(&storage, &[url.clone()], &SilentEnrichProgress)
            .await
            .unwrap();

        let page = storage.get_page(&url).await.unwrap().unwrap();
        assert_eq!(page.content_status, Some(ContentStatus::RateLimited));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn multi_paragraph_merge_is_by_index() {
        let llm = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ollama_json(
                &serde_json::json!({
                    "enhanced_paragraphs": [
                        {"text": "First point. [[opening]]", "summary": ""},
                        {"text": "Second point. [[closing]]", "summary": ""}
                    ]
                }),
            )))
            .mount(&llm)
            .await;

        let (enricher, storage, dir, url) = setup(&llm).await;
        seed_page(&storage, &dir, &url, "First point.\n\nSecond point.\n").await;

        enricher
            .enrich_pages(&storage, &[url.clone()], &SilentEnrichProgress)
            .await
            .unwrap();

        let content = std::fs::read_to_string(dir.join("a.md")).unwrap();
        let first = content.find("First point. [[opening]]").unwrap();
        let second = content.find("Second point. [[closing]]").unwrap();
        assert!(first < second, "paragraph order preserved");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
