//! Short-lived response cache.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::types::query::ChatType;
use crate::types::response::NormalizedResponse;

/// Cache key: SHA-256 hex over user, chat type and the normalized prompt.
///
/// Normalization trims, lowercases and collapses runs of whitespace, so
/// `"Hello   World "` and `"hello world"` share an entry.
pub fn cache_key(user_id: &str, chat_type: ChatType, prompt: &str) -> String {
    let normalized = prompt
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();

    let mut hasher = Sha256::new();
    hasher.update(user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(chat_type.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

struct CachedResponse {
    response: NormalizedResponse,
    expires_at: Instant,
    inserted: u64,
}

/// Bounded TTL cache of normalized responses.
///
/// Entries live in a sharded map, so lookups for different keys never
/// contend on one lock. Once full, the oldest insertion is evicted.
pub struct ResponseCache {
    ttl: Duration,
    capacity: usize,
    entries: DashMap<String, CachedResponse>,
    sequence: AtomicU64,
}

impl ResponseCache {
    /// Creates a cache. A zero capacity or TTL disables caching.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            ttl,
            capacity,
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
        }
    }

    fn is_enabled(&self) -> bool {
        self.capacity > 0 && !self.ttl.is_zero()
    }

    /// Returns a live entry, dropping it if it expired.
    pub fn get(&self, key: &str) -> Option<NormalizedResponse> {
        if !self.is_enabled() {
            return None;
        }

        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.response.clone());
            }
        }

        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Stores a response. Degraded responses are ignored.
    pub fn insert(&self, key: String, response: NormalizedResponse) {
        if !self.is_enabled() || response.is_degraded() {
            return;
        }

        self.entries.remove(&key);
        while self.entries.len() >= self.capacity {
            if !self.evict_oldest() {
                break;
            }
        }

        let inserted = self.sequence.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            key,
            CachedResponse {
                response,
                expires_at: Instant::now() + self.ttl,
                inserted,
            },
        );
    }

    fn evict_oldest(&self) -> bool {
        // The iterator's shard guards must be gone before removing.
        let oldest = self
            .entries
            .iter()
            .min_by_key(|entry| entry.inserted)
            .map(|entry| entry.key().clone());

        match oldest {
            Some(key) => self.entries.remove(&key).is_some(),
            None => false,
        }
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
