//! In-memory idempotency store: maps a request fingerprint to the cached
//! outcome of the first completed attempt, with a fixed time-to-live.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Entries older than this are treated as absent.
pub const IDEMPOTENCY_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Debug, Clone)]
pub struct CachedEntry {
    pub status: Outcome,
    pub response: Value,
    created_at: Instant,
}

pub struct IdempotencyStore {
    ttl: Duration,
    entries: Mutex<HashMap<String, CachedEntry>>,
}

impl IdempotencyStore {
    pub fn new() -> Self {
        Self::with_ttl(IDEMPOTENCY_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Unconditionally stores/overwrites the outcome for a fingerprint.
    pub fn set(&self, fingerprint: &str, status: Outcome, response: Value) {
        self.set_at(fingerprint, status, response, Instant::now());
    }

    fn set_at(&self, fingerprint: &str, status: Outcome, response: Value, now: Instant) {
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        entries.insert(
            fingerprint.to_string(),
            CachedEntry {
                status,
                response,
                created_at: now,
            },
        );
    }

    /// Returns the entry if present and within the TTL. An expired entry is
    /// deleted on the way out.
    pub fn get(&self, fingerprint: &str) -> Option<CachedEntry> {
        self.get_at(fingerprint, Instant::now())
    }

    fn get_at(&self, fingerprint: &str, now: Instant) -> Option<CachedEntry> {
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        let expired = match entries.get(fingerprint) {
            Some(entry) => now.duration_since(entry.created_at) > self.ttl,
            None => return None,
        };
        if expired {
            entries.remove(fingerprint);
            return None;
        }
        entries.get(fingerprint).cloned()
    }

    /// Evicts every expired entry; bounds memory independently of reads.
    pub fn sweep(&self) {
        self.sweep_at(Instant::now());
    }

    fn sweep_at(&self, now: Instant) {
        let mut entries = self.entries.lock().expect("idempotency lock poisoned");
        entries.retain(|_, entry| now.duration_since(entry.created_at) <= self.ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().expect("idempotency lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic background sweep at TTL interval.
pub async fn run_sweeper(store: Arc<IdempotencyStore>) {
    let mut interval = tokio::time::interval(store.ttl());
    // first tick fires immediately; harmless against an empty store
    loop {
        interval.tick().await;
        store.sweep();
    }
}

/// Deterministic fingerprint over the semantically significant request
/// fields: SHA-256 of the canonical JSON, truncated to 32 hex chars.
pub fn derive_fingerprint(significant: &Value) -> String {
    let json = significant.to_string();
    let digest = Sha256::digest(json.as_bytes());
    hex::encode(digest)[..32].to_string()
}
