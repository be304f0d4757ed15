//! Per-document AI sessions with cached context.
//!
//! A session pins the document-level instruction block so every call for the
//! same document prepends identical context (provider-side prompt caching
//! benefits from the stable prefix). Sessions idle for five minutes are
//! evicted.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Idle lifetime before a session is evicted.
const SESSION_IDLE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug)]
struct AiSession {
    cached_context: String,
    hits: u64,
    misses: u64,
    last_used: Instant,
}

/// Hit/miss counters for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    pub hits: u64,
    pub misses: u64,
}

/// Mutex-guarded session map shared by enrichment workers.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, AiSession>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) a session with its cached context.
    pub async fn open(&self, id: &str, cached_context: String) {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            id.to_string(),
            AiSession {
                cached_context,
                hits: 0,
                misses: 0,
                last_used: Instant::now(),
            },
        );
    }

    /// Prepend the session's cached context to a prompt, counting a hit when
    /// the cache applies and a miss when the session is unknown.
    pub async fn apply(&self, id: &str, prompt: &str) -> String {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(id) {
            Some(session) => {
                session.hits += 1;
                session.last_used = Instant::now();
                format!("{}\n\n{prompt}", session.cached_context)
            }
            None => {
                // Unknown session: count the miss against a placeholder so
                // stats survive until the caller re-opens it.
                let entry = sessions.entry(id.to_string()).or_insert(AiSession {
                    cached_context: String::new(),
                    hits: 0,
                    misses: 0,
                    last_used: Instant::now(),
                });
                entry.misses += 1;
                entry.last_used = Instant::now();
                prompt.to_string()
            }
        }
    }

    /// Counters for a session, if it exists.
    pub async fn stats(&self, id: &str) -> Option<SessionStats> {
        let sessions = self.sessions.lock().await;
        sessions.get(id).map(|s| SessionStats {
            hits: s.hits,
            misses: s.misses,
        })
    }

    /// Drop sessions idle longer than the TTL. Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        self.evict_older_than(SESSION_IDLE_TTL).await
    }

    async fn evict_older_than(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.last_used.elapsed() < ttl);
        before - sessions.len()
    }

    /// Remove one session explicitly (document finished).
    pub async fn close(&self, id: &str) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(id);
    }
}
