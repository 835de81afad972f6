//! Response Cache
//!
//! Bounded in-memory cache of successful responses with:
//! - Deterministic request fingerprints (SHA-256 over prompt, domain, locale
//!   and budget tier)
//! - Per-entry TTL
//! - LRU eviction once `max_entries` is reached
//! - Hit/miss accounting
//!
//! Only successful responses are ever inserted. Entries live in process
//! memory and are lost on restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::request::{Request, Response};

/// Cache settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether the cache is used at all
    pub enabled: bool,

    /// Entry limit
    pub max_entries: usize,

    /// Lifetime of an entry
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 1_000,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Fingerprint of the request fields that determine the answer
///
/// Each field is length-prefixed so that `("ab", "c")` and `("a", "bc")`
/// hash differently.
#[must_use]
pub fn cache_key(request: &Request) -> String {
    let mut hasher = Sha256::new();
    for field in [
        request.prompt.as_str(),
        request.context.domain.as_str(),
        request.context.locale.as_str(),
        request.context.budget_tier.as_str(),
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// A cached response with bookkeeping
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached response
    pub response: Response,
    /// When the entry was inserted
    pub inserted_at: Instant,
    /// Entry lifetime
    pub ttl: Duration,
    /// When the entry was last read
    pub last_accessed: Instant,
    /// Number of reads served
    pub hits: u64,
}

impl CacheEntry {
    fn new(response: Response, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            response,
            inserted_at: now,
            ttl,
            last_accessed: now,
            hits: 0,
        }
    }

    fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() >= self.ttl
    }

    fn touch(&mut self) {
        self.last_accessed = Instant::now();
        self.hits = self.hits.saturating_add(1);
    }
}

/// Cache counters at a point in time
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Live entries (expired entries not yet swept included)
    pub entries: usize,
    /// Lookups that returned a response
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed
    pub expirations: u64,
    /// `hits / (hits + misses)`
    pub hit_rate: f64,
}

/// Bounded TTL + LRU response cache
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    entries: Mutex<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

impl ResponseCache {
    /// Create an empty cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    /// Whether the cache is configured on
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.config.max_entries > 0
    }

    /// Look up a response, refreshing its LRU position
    pub fn get(&self, key: &str) -> Option<Response> {
        let mut entries = self.entries.lock();

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.touch();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.response.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a successful response
    ///
    /// Failed responses are ignored.
    pub fn insert(&self, key: String, response: Response) {
        if !self.is_enabled() || !response.success {
            return;
        }

        let mut entries = self.entries.lock();
        entries.remove(&key);

        if entries.len() >= self.config.max_entries {
            let before = entries.len();
            entries.retain(|_, e| !e.is_expired());
            self.expirations
                .fetch_add((before - entries.len()) as u64, Ordering::Relaxed);
        }

        while entries.len() >= self.config.max_entries {
            let lru_key = entries
                .iter()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(k, _)| k.clone());
            let Some(lru_key) = lru_key else { break };
            entries.remove(&lru_key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %lru_key, "Evicted least recently used response");
        }

        entries.insert(key, CacheEntry::new(response, self.config.ttl));
    }

    /// Entry metadata without touching it
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().get(key).cloned()
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        tracing::info!(entries = count, "Response cache cleared");
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Current counters
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries: self.len(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
        }
    }
}
