//! TTL-bounded LRU cache for inference results

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

struct CacheEntry {
    value: serde_json::Value,
    created_at: Instant,
    access_count: u64,
    size_bytes: usize,
    importance: f64,
}

impl CacheEntry {
    fn update_access(&mut self) {
        self.access_count += 1;
        // Frequently read entries creep up in importance.
        self.importance = (self.importance + 0.01).min(1.0);
    }
}

/// Counters for one result cache.
#[derive(Debug, Clone, Serialize)]
pub struct ResultCacheStats {
    /// Entries currently held
    pub size: usize,
    /// Capacity bound
    pub max_size: usize,
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that found nothing usable
    pub misses: u64,
    /// `hits / (hits + misses)`
    pub hit_rate: f64,
    /// Entries pushed out by the LRU bound
    pub evictions: u64,
    /// Entries dropped because their TTL lapsed
    pub expirations: u64,
    /// Estimated bytes held
    pub total_size_bytes: usize,
    /// `total_size_bytes / size`
    pub avg_size_bytes: usize,
}

struct Inner {
    cache: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
    total_size_bytes: usize,
}

/// LRU cache with per-entry TTL for engine results.
///
/// Strict least-recently-used eviction at the size bound; entries older
/// than the TTL are dropped lazily on lookup.
pub struct ResultCache {
    max_size: usize,
    ttl: Duration,
    inner: Mutex<Inner>,
}

impl ResultCache {
    /// Cache holding at most `max_size` entries for at most `ttl` each.
    ///
    /// A zero `max_size` is rounded up to one entry.
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(max_size.max(1)).unwrap_or(NonZeroUsize::MIN);
        log::info!(
            "Result cache initialized: max_size={}, ttl={:.0}s",
            capacity.get(),
            ttl.as_secs_f64()
        );

        Self {
            max_size: capacity.get(),
            ttl,
            inner: Mutex::new(Inner {
                cache: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
                total_size_bytes: 0,
            }),
        }
    }

    /// Look up a cached result. Expired entries count as misses and are
    /// removed on the spot.
    pub fn get(&self, key: &str) -> Option<serde_json::Value> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        let expired = match inner.cache.get_mut(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) if entry.created_at.elapsed() > self.ttl => true,
            Some(entry) => {
                entry.update_access();
                let value = entry.value.clone();
                inner.hits += 1;
                return Some(value);
            }
        };

        if expired {
            if let Some(entry) = inner.cache.pop(key) {
                inner.total_size_bytes -= entry.size_bytes;
            }
            inner.misses += 1;
            inner.expirations += 1;
        }
        None
    }

    /// Store a result with default importance.
    pub fn put(&self, key: impl Into<String>, value: serde_json::Value) {
        self.put_weighted(key, value, 0.5);
    }

    /// Store a result with an explicit importance score in `[0, 1]`.
    pub fn put_weighted(&self, key: impl Into<String>, value: serde_json::Value, importance: f64) {
        let key = key.into();
        let size_bytes = estimate_size(&value);

        let mut inner = self.inner.lock();
        let entry = CacheEntry {
            value,
            created_at: Instant::now(),
            access_count: 0,
            size_bytes,
            importance: importance.clamp(0.0, 1.0),
        };

        if let Some((displaced_key, displaced)) = inner.cache.push(key.clone(), entry) {
            inner.total_size_bytes -= displaced.size_bytes;
            if displaced_key != key {
                // A different key fell out: that is an LRU eviction, not
                // a same-key update.
                inner.evictions += 1;
            }
        }
        inner.total_size_bytes += size_bytes;
    }

    /// Remove one entry. Returns whether it existed.
    pub fn remove(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        match inner.cache.pop(key) {
            Some(entry) => {
                inner.total_size_bytes -= entry.size_bytes;
                true
            }
            None => false,
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.cache.clear();
        inner.total_size_bytes = 0;
        log::info!("Result cache cleared");
    }

    /// Preload a batch of results.
    pub fn warmup(&self, entries: Vec<(String, serde_json::Value, f64)>) {
        let count = entries.len();
        for (key, value, importance) in entries {
            self.put_weighted(key, value, importance);
        }
        log::info!("Cache warmup completed: {count} entries loaded");
    }

    /// Counters snapshot.
    pub fn stats(&self) -> ResultCacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;

        ResultCacheStats {
            size: inner.cache.len(),
            max_size: self.max_size,
            hits: inner.hits,
            misses: inner.misses,
            hit_rate: inner.hits as f64 / lookups.max(1) as f64,
            evictions: inner.evictions,
            expirations: inner.expirations,
            total_size_bytes: inner.total_size_bytes,
            avg_size_bytes: inner.total_size_bytes / inner.cache.len().max(1),
        }
    }
}

fn estimate_size(value: &serde_json::Value) -> usize {
    match value {
        serde_json::Value::Null => 0,
        serde_json::Value::Bool(_) => 1,
        serde_json::Value::Number(_) => 8,
        serde_json::Value::String(s) => s.len(),
        other => other.to_string().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_roundtrip() {
        let cache = ResultCache::new(10, Duration::from_secs(300));

        cache.put("signal", serde_json::json!({"direction": "long"}));
        assert_eq!(
            cache.get("signal").unwrap()["direction"],
            serde_json::json!("long")
        );
        assert_eq!(cache.get("unknown"), None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
    }

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = ResultCache::new(2, Duration::from_secs(300));

        cache.put("a", serde_json::json!(1));
        cache.put("b", serde_json::json!(2));
        // Touch "a" so "b" is the least recently used.
        cache.get("a");
        cache.put("c", serde_json::json!(3));

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_same_key_update_is_not_an_eviction() {
        let cache = ResultCache::new(2, Duration::from_secs(300));

        cache.put("k", serde_json::json!("old"));
        cache.put("k", serde_json::json!("new"));

        assert_eq!(cache.get("k").unwrap(), serde_json::json!("new"));
        assert_eq!(cache.stats().evictions, 0);
        assert_eq!(cache.stats().size, 1);
    }

    #[test]
    fn test_ttl_expiry_counts_as_miss() {
        let cache = ResultCache::new(10, Duration::from_millis(0));

        cache.put("ephemeral", serde_json::json!(42));
        std::thread::sleep(Duration::from_millis(2));

        assert_eq!(cache.get("ephemeral"), None);
        let stats = cache.stats();
        assert_eq!(stats.expirations, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.size, 0);
    }

    #[test]
    fn test_size_accounting() {
        let cache = ResultCache::new(10, Duration::from_secs(300));

        cache.put("s", serde_json::json!("four"));
        assert_eq!(cache.stats().total_size_bytes, 4);

        cache.remove("s");
        assert_eq!(cache.stats().total_size_bytes, 0);
    }

    #[test]
    fn test_warmup_loads_everything() {
        let cache = ResultCache::new(10, Duration::from_secs(300));

        cache.warmup(vec![
            ("a".to_string(), serde_json::json!(1), 0.9),
            ("b".to_string(), serde_json::json!(2), 0.1),
        ]);

        assert_eq!(cache.stats().size, 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_some());
    }
}
