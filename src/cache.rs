//! In-memory response cache with LRU eviction, TTL expiry, and implicit
//! invalidation via the store generation counter.
//!
//! The cache key hashes the normalized question, the language, and the
//! generation current at answer time. After any ingestion event the engine's
//! generation moves on, so lookups stop matching stale entries without a
//! sweep. A [`sweep`](ResponseCache::sweep) exists anyway for memory
//! reclamation on long-lived processes.

use lru::LruCache;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::models::Answer;

struct CacheEntry {
    answer: Answer,
    generation: u64,
    expires_at: Instant,
}

pub struct ResponseCache {
    inner: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
}

/// Lowercase, trim, and collapse runs of whitespace so trivially rephrased
/// questions share a cache slot.
pub fn normalize_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

fn cache_key(query: &str, language: &str, generation: u64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_query(query).as_bytes());
    hasher.update(b"\x1f");
    hasher.update(language.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(generation.to_le_bytes());
    format!("{:x}", hasher.finalize())
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }

    /// Look up an answer for this question under the current generation.
    /// Expired entries are dropped on contact.
    pub fn get(&self, query: &str, language: &str, generation: u64) -> Option<Answer> {
        let key = cache_key(query, language, generation);
        let mut cache = self.inner.lock().expect("cache lock");

        match cache.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.answer.clone()),
            Some(_) => {
                cache.pop(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, query: &str, language: &str, generation: u64, answer: Answer) {
        let key = cache_key(query, language, generation);
        let entry = CacheEntry {
            answer,
            generation,
            expires_at: Instant::now() + self.ttl,
        };
        self.inner.lock().expect("cache lock").put(key, entry);
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache lock").clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries that are expired or were written under an older
    /// generation. Returns the number removed.
    pub fn sweep(&self, current_generation: u64) -> usize {
        let mut cache = self.inner.lock().expect("cache lock");
        let now = Instant::now();

        let dead: Vec<String> = cache
            .iter()
            .filter(|(_, e)| e.expires_at <= now || e.generation != current_generation)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &dead {
            cache.pop(key);
        }
        dead.len()
    }
}
