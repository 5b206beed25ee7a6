use dashmap::DashMap;
use extract::{GenerationConfig, ParsedResult};
use sha2::{Digest, Sha256};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub value: ParsedResult,
    pub confidence: f64,
    pub inserted_at: Instant,
    pub access_count: u64,
}

/// Process-wide cache of successful extractions.
///
/// Entries expire lazily: an entry older than the TTL is purged when it is
/// next read. When full, inserting a new key evicts the entry with the lowest
/// access count, oldest insertion first among ties.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    ttl: Duration,
    min_confidence: f64,
    // serializes the evict-then-insert step so capacity holds under concurrency
    insert_lock: Mutex<()>,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    evictions: AtomicU64,
    rejected: AtomicUsize,
}

impl ResponseCache {
    pub fn new(max_entries: usize, ttl: Duration, min_confidence: f64) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries,
            ttl,
            min_confidence,
            insert_lock: Mutex::new(()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            rejected: AtomicUsize::new(0),
        }
    }

    /// Stable key over content, strategy name and config. Config fields are
    /// serialized with sorted keys, so field order never changes the key.
    pub fn key(content: &str, strategy: &str, config: &GenerationConfig) -> String {
        let canonical = serde_json::to_value(config)
            .map(|v| v.to_string())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        hasher.update([0x1f]);
        hasher.update(strategy.as_bytes());
        hasher.update([0x1f]);
        hasher.update(canonical.as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn get(&self, key: &str) -> Option<ParsedResult> {
        self.lookup(key).map(|(value, _)| value)
    }

    /// Live entry's value together with the confidence it was stored with
    pub fn lookup(&self, key: &str) -> Option<(ParsedResult, f64)> {
        let expired = match self.entries.get_mut(key) {
            Some(mut entry) => {
                if entry.inserted_at.elapsed() < self.ttl {
                    entry.access_count += 1;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Some((entry.value.clone(), entry.confidence));
                }
                true
            }
            None => false,
        };

        if expired {
            let ttl = self.ttl;
            if self
                .entries
                .remove_if(key, |_, entry| entry.inserted_at.elapsed() >= ttl)
                .is_some()
            {
                self.expirations.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Cache entry expired");
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a result. Returns false when its confidence is below the
    /// threshold and nothing was written.
    pub fn put(&self, key: String, value: ParsedResult, confidence: f64) -> bool {
        if confidence < self.min_confidence || self.max_entries == 0 {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let _guard = self.insert_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict_least_used();
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                confidence,
                inserted_at: Instant::now(),
                access_count: 0,
            },
        );
        true
    }

    fn evict_least_used(&self) {
        let victim = self
            .entries
            .iter()
            .min_by(|a, b| {
                a.access_count
                    .cmp(&b.access_count)
                    .then(a.inserted_at.cmp(&b.inserted_at))
            })
            .map(|entry| entry.key().clone());

        if let Some(key) = victim {
            self.entries.remove(&key);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Evicted least-used cache entry");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            max_entries: self.max_entries,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            rejected_low_confidence: self.rejected.load(Ordering::Relaxed),
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[derive(Debug, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub max_entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub evictions: u64,
    pub rejected_low_confidence: usize,
}
