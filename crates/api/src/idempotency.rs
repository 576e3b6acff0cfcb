//! Replay of upload responses keyed by the `Idempotency-Key` header.
//!
//! Only successful responses are remembered. Entries expire after a fixed
//! lifetime and are pruned whenever a new key is recorded.

use std::collections::HashMap;

use axum::http::{HeaderMap, StatusCode};
use chrono::Duration;
use dbforge_core::types::Timestamp;
use dbforge_pipeline::SubmitOutcome;
use tokio::sync::RwLock;

/// Request header carrying the client's key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

/// How long a key is remembered.
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// A response as first sent for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredResponse {
    pub status: StatusCode,
    pub outcome: SubmitOutcome,
}

struct Entry {
    response: StoredResponse,
    stored_at: Timestamp,
}

pub struct IdempotencyStore {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl IdempotencyStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// The key a request carries, if any. Empty or non-UTF-8 values count as
    /// absent.
    pub fn key_from(headers: &HeaderMap) -> Option<String> {
        headers
            .get(IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|k| !k.is_empty())
            .map(str::to_owned)
    }

    /// The remembered response for `key`, unless it has expired.
    pub async fn get(&self, key: &str) -> Option<StoredResponse> {
        let now = chrono::Utc::now();
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| now - entry.stored_at < self.ttl)
            .map(|entry| entry.response)
    }

    /// Remember the response sent for `key`. The first response wins.
    pub async fn insert(&self, key: String, response: StoredResponse) {
        let now = chrono::Utc::now();
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| now - entry.stored_at < self.ttl);
        entries.entry(key).or_insert(Entry {
            response,
            stored_at: now,
        });
    }

    pub async fn key_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_TTL_HOURS))
    }
}
