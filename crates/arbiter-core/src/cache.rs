//! Result Cache
//!
//! Time-boxed memoization of validated panel results, keyed by a normalized
//! request fingerprint. Entries expire lazily: the lookup that finds a stale
//! entry evicts it. Reads take a shared lock; writes happen only after
//! aggregation.

use crate::types::Clock;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A memoized value
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Fresh iff `now - created_at <= ttl`
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now - self.created_at <= self.ttl
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub inserts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    inserts: AtomicU64,
}

/// TTL cache owned by an engine instance
pub struct ResultCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
            counters: Counters::default(),
        }
    }

    /// Look up a fingerprint; a stale entry is evicted and reported as a miss
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        let now = self.clock.now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.is_fresh(now) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(entry.clone());
                }
                Some(_) => {}
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        }

        // Stale: re-check under the write lock, a concurrent put may have refreshed it
        let mut entries = self.entries.write();
        if let Some(entry) = entries.get(key) {
            if entry.is_fresh(now) {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.clone());
            }
            entries.remove(key);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key, "Evicted stale cache entry");
        }
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store a value under a fingerprint
    pub fn put(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry {
            key: key.clone(),
            value,
            created_at: self.clock.now(),
            ttl,
        };
        self.entries.write().insert(key, entry);
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every stale entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now));
        let removed = before - entries.len();
        self.counters
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
        }
    }
}

impl<V> std::fmt::Debug for ResultCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("entries", &self.entries.read().len())
            .finish()
    }
}

/// Line endings unified, trailing whitespace stripped, outer blank lines dropped
pub fn normalize_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Request fingerprint: blake3 over normalized subject and content plus the
/// identity of whatever judges them (contract digests, panel roster)
pub fn fingerprint(subject: &str, content: &str, identity: &[&str]) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [normalize_text(subject), normalize_text(content)] {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    for part in identity {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ManualClock;

    fn cache() -> (Arc<ManualClock>, ResultCache<String>) {
        let clock = Arc::new(ManualClock::at_epoch());
        let cache = ResultCache::new(clock.clone() as Arc<dyn Clock>);
        (clock, cache)
    }

    #[test]
    fn test_ttl_boundary() {
        let (clock, cache) = cache();
        cache.put("k", "v".to_string(), Duration::seconds(1800));

        clock.advance(Duration::seconds(1799));
        assert_eq!(cache.get("k").map(|e| e.value), Some("v".to_string()));

        clock.advance(Duration::seconds(2));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_exact_ttl_is_still_fresh() {
        let (clock, cache) = cache();
        cache.put("k", "v".to_string(), Duration::seconds(60));
        clock.advance(Duration::seconds(60));
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn test_put_refreshes_entry() {
        let (clock, cache) = cache();
        cache.put("k", "old".to_string(), Duration::seconds(10));
        clock.advance(Duration::seconds(8));
        cache.put("k", "new".to_string(), Duration::seconds(10));
        clock.advance(Duration::seconds(8));
        assert_eq!(cache.get("k").unwrap().value, "new");
    }

    #[test]
    fn test_purge_expired() {
        let (clock, cache) = cache();
        cache.put("short", "a".to_string(), Duration::seconds(5));
        cache.put("long", "b".to_string(), Duration::seconds(500));
        clock.advance(Duration::seconds(6));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_stats_count_hits_and_misses() {
        let (_clock, cache) = cache();
        assert!(cache.get("missing").is_none());
        cache.put("k", "v".to_string(), Duration::seconds(5));
        cache.get("k");
        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.inserts), (1, 1, 1));
    }

    #[test]
    fn test_fingerprint_normalizes_whitespace_and_line_endings() {
        let a = fingerprint("Deploy", "line one\r\nline two  \n", &["contract"]);
        let b = fingerprint("  Deploy\n", "line one\nline two", &["contract"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_depends_on_identity_and_content() {
        let base = fingerprint("s", "c", &["x"]);
        assert_ne!(base, fingerprint("s", "c", &["y"]));
        assert_ne!(base, fingerprint("s", "d", &["x"]));
        // Length prefixes keep part boundaries unambiguous
        assert_ne!(fingerprint("ab", "c", &[]), fingerprint("a", "bc", &[]));
    }
}
