//! In-process response cache for the acquisition route.
//!
//! One entry per `(slug, variant)`; entries are superseded, never evicted, so the
//! fixed catalog bounds memory. Instantiated once at startup and handed to the
//! router through `AppState`.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::{collections::HashMap, sync::Arc, time::Duration};

use crate::models::AcquisitionResponse;

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub slug: String,
    pub variant: Option<String>,
}

impl CacheKey {
    pub fn new(slug: &str, variant: Option<&str>) -> Self {
        Self {
            slug: slug.to_string(),
            variant: variant.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub payload: AcquisitionResponse,
    pub etag: String,
    pub fetched_at_ms: i64,
}

pub struct ResponseCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    key_locks: Mutex<HashMap<CacheKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
            key_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().get(key).cloned()
    }

    /// The entry for `key` if it is younger than the TTL at `now_ms`.
    pub fn get_fresh(&self, key: &CacheKey, now_ms: i64) -> Option<CacheEntry> {
        let ttl_ms = self.ttl.as_millis() as i64;
        self.get(key)
            .filter(|e| now_ms.saturating_sub(e.fetched_at_ms) < ttl_ms)
    }

    /// Overwrites the entry for `key` and returns it with its fresh ETag.
    pub fn put(&self, key: CacheKey, payload: AcquisitionResponse, now_ms: i64) -> CacheEntry {
        let entry = CacheEntry {
            etag: compute_etag(&payload),
            payload,
            fetched_at_ms: now_ms,
        };
        self.entries.write().insert(key, entry.clone());
        entry
    }

    /// Async lock serialising acquisitions for one key, so concurrent misses
    /// share a single upstream fetch.
    pub fn key_lock(&self, key: &CacheKey) -> Arc<tokio::sync::Mutex<()>> {
        self.key_locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Stable hash of the serialized payload, quoted as an HTTP entity tag.
pub fn compute_etag<T: Serialize>(payload: &T) -> String {
    let bytes = serde_json::to_vec(payload).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("\"{}\"", hex::encode(&digest[..16]))
}

/// Whether an `If-None-Match` header value matches `etag` (weak comparison).
pub fn if_none_match_matches(header: &str, etag: &str) -> bool {
    let strip = |t: &str| t.trim().trim_start_matches("W/").to_string();
    let wanted = strip(etag);
    header
        .split(',')
        .map(str::trim)
        .any(|candidate| candidate == "*" || strip(candidate) == wanted)
}
