//! Engram store: n-gram addressed embedding memory
//!
//! Text (plus up to three trailing context strings) is windowed into
//! n-grams; every n-gram hashes to a slot and stores the same
//! embedding. Queries fuse the occupied hits into their element-wise
//! mean. A bounded LRU cache short-circuits repeated queries, caching
//! misses as well as hits.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;

use super::hash::HashRouter;
use super::table::{DiskSlotTable, RamSlotTable, SlotTable, TableStats};
use super::{MemoryError, MemoryResult};

/// Slot storage selection.
#[derive(Debug, Clone)]
pub enum StorageBackend {
    /// In-process arrays
    Ram,
    /// Memory-mapped file at the given path
    Disk {
        /// Backing file location
        path: PathBuf,
    },
}

/// Engram store configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    /// Tokens per n-gram window
    pub ngram_size: usize,
    /// Embedding vector width
    pub embedding_dim: usize,
    /// Slot table size
    pub memory_size: u64,
    /// Where slots live
    pub backend: StorageBackend,
    /// Enable the query-result LRU cache
    pub enable_cache: bool,
    /// Query cache capacity (also the disk backend's slot cache size)
    pub cache_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ngram_size: 4,
            embedding_dim: 512,
            memory_size: 100_000_000,
            backend: StorageBackend::Ram,
            enable_cache: true,
            cache_size: 10_000,
        }
    }
}

/// Query cache counters.
#[derive(Debug, Clone, Serialize)]
pub struct QueryCacheStats {
    /// Queries answered from the cache
    pub hits: u64,
    /// Queries that fell through to the table
    pub misses: u64,
    /// `hits / total_queries`
    pub hit_rate: f64,
    /// Entries currently cached
    pub len: usize,
    /// Configured capacity
    pub capacity: usize,
}

/// Statistics snapshot for an engram store.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryStatistics {
    /// Total queries issued
    pub total_queries: u64,
    /// Slot lookups that found an occupied slot
    pub hit_count: u64,
    /// Slot lookups that found nothing
    pub miss_count: u64,
    /// `hit_count / total_queries`
    pub hit_rate: f64,
    /// Underlying table usage
    pub table: TableStats,
    /// Query cache counters, when the cache is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<QueryCacheStats>,
}

/// O(1) associative memory over hashed n-grams.
pub struct EngramStore {
    ngram_size: usize,
    embedding_dim: usize,
    router: HashRouter,
    table: Box<dyn SlotTable>,
    query_cache: Option<Mutex<LruCache<String, Option<Vec<f32>>>>>,
    cache_capacity: usize,
    total_queries: AtomicU64,
    hit_count: AtomicU64,
    miss_count: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl EngramStore {
    /// Build a store from `config`, allocating or opening the slot table.
    pub fn new(config: MemoryConfig) -> MemoryResult<Self> {
        if config.ngram_size == 0 {
            return Err(MemoryError::InvalidInput(
                "n-gram size must be > 0".to_string(),
            ));
        }
        let cache_capacity = if config.enable_cache {
            Some(NonZeroUsize::new(config.cache_size).ok_or_else(|| {
                MemoryError::InvalidInput("cache size must be > 0".to_string())
            })?)
        } else {
            None
        };

        let router = HashRouter::new(config.memory_size)?;
        let table: Box<dyn SlotTable> = match &config.backend {
            StorageBackend::Ram => {
                Box::new(RamSlotTable::new(config.memory_size, config.embedding_dim)?)
            }
            StorageBackend::Disk { path } => Box::new(DiskSlotTable::new(
                config.memory_size,
                config.embedding_dim,
                path,
                config.cache_size,
            )?),
        };

        let query_cache = cache_capacity.map(|capacity| Mutex::new(LruCache::new(capacity)));

        log::info!(
            "Engram store initialized: ngram_size={}, embedding_dim={}, memory_size={}, cache={}",
            config.ngram_size,
            config.embedding_dim,
            config.memory_size,
            config.enable_cache
        );

        Ok(Self {
            ngram_size: config.ngram_size,
            embedding_dim: config.embedding_dim,
            router,
            table,
            query_cache,
            cache_capacity: config.cache_size,
            total_queries: AtomicU64::new(0),
            hit_count: AtomicU64::new(0),
            miss_count: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    /// Store `embedding` under every n-gram of `context ++ text`.
    ///
    /// Returns the number of slots written. Colliding n-grams silently
    /// overwrite whatever the slot held.
    pub fn store(&self, text: &str, context: &[String], embedding: &[f32]) -> MemoryResult<usize> {
        if text.is_empty() {
            return Err(MemoryError::InvalidInput(
                "text must not be empty".to_string(),
            ));
        }
        if embedding.len() != self.embedding_dim {
            return Err(MemoryError::DimensionMismatch {
                expected: self.embedding_dim,
                actual: embedding.len(),
            });
        }

        let ngrams = self.extract_ngrams(text, context);
        if ngrams.is_empty() {
            log::warn!("No n-grams extracted, skipping store: text='{text}'");
            return Ok(0);
        }

        for ngram in &ngrams {
            let address = self.router.hash(ngram)?;
            self.table.set(address, embedding)?;
        }

        // The cached result for this exact composition is now stale;
        // overlapping compositions keep their cached values (accepted
        // staleness, same as lossy collisions).
        if let Some(cache) = &self.query_cache {
            cache.lock().pop(&Self::cache_key(text, context));
        }

        log::debug!("Stored {} n-grams for text='{text}'", ngrams.len());
        Ok(ngrams.len())
    }

    /// Look up the fused embedding for `context ++ text`.
    ///
    /// Returns the element-wise mean of every occupied slot addressed
    /// by the query's n-grams, or `None` when nothing hits.
    pub fn query(&self, text: &str, context: &[String]) -> MemoryResult<Option<Vec<f32>>> {
        if text.is_empty() {
            return Err(MemoryError::InvalidInput(
                "query text must not be empty".to_string(),
            ));
        }

        self.total_queries.fetch_add(1, Ordering::Relaxed);

        let key = Self::cache_key(text, context);
        if let Some(cache) = &self.query_cache {
            if let Some(cached) = cache.lock().get(&key) {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                return Ok(cached.clone());
            }
            self.cache_misses.fetch_add(1, Ordering::Relaxed);
        }

        let ngrams = self.extract_ngrams(text, context);
        if ngrams.is_empty() {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            self.cache_result(key, None);
            return Ok(None);
        }

        let mut sum = vec![0.0f64; self.embedding_dim];
        let mut hits = 0usize;
        for ngram in &ngrams {
            let address = self.router.hash(ngram)?;
            match self.table.get(address)? {
                Some(vector) => {
                    self.hit_count.fetch_add(1, Ordering::Relaxed);
                    for (acc, component) in sum.iter_mut().zip(vector.iter()) {
                        *acc += f64::from(*component);
                    }
                    hits += 1;
                }
                None => {
                    self.miss_count.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if hits == 0 {
            log::debug!("Memory query missed: 0/{} n-grams", ngrams.len());
            self.cache_result(key, None);
            return Ok(None);
        }

        let fused: Vec<f32> = sum
            .into_iter()
            .map(|component| (component / hits as f64) as f32)
            .collect();

        log::debug!("Memory query hit: {hits}/{} n-grams", ngrams.len());
        self.cache_result(key, Some(fused.clone()));
        Ok(Some(fused))
    }

    /// Usage and cache statistics.
    pub fn statistics(&self) -> MemoryStatistics {
        let total_queries = self.total_queries.load(Ordering::Relaxed);
        let hit_count = self.hit_count.load(Ordering::Relaxed);
        let miss_count = self.miss_count.load(Ordering::Relaxed);

        let cache = self.query_cache.as_ref().map(|cache| {
            let hits = self.cache_hits.load(Ordering::Relaxed);
            let misses = self.cache_misses.load(Ordering::Relaxed);
            QueryCacheStats {
                hits,
                misses,
                hit_rate: hits as f64 / total_queries.max(1) as f64,
                len: cache.lock().len(),
                capacity: self.cache_capacity,
            }
        });

        MemoryStatistics {
            total_queries,
            hit_count,
            miss_count,
            hit_rate: hit_count as f64 / total_queries.max(1) as f64,
            table: self.table.usage_stats(),
            cache,
        }
    }

    /// Hash-router handle, for distribution diagnostics.
    pub fn router(&self) -> &HashRouter {
        &self.router
    }

    fn cache_result(&self, key: String, value: Option<Vec<f32>>) {
        if let Some(cache) = &self.query_cache {
            cache.lock().put(key, value);
        }
    }

    fn cache_key(text: &str, context: &[String]) -> String {
        let tail = context.iter().rev().take(3).rev().cloned().collect::<Vec<_>>();
        if tail.is_empty() {
            text.to_string()
        } else {
            format!("{text}|{}", tail.join("|"))
        }
    }

    /// Window `context ++ text` into n-grams.
    ///
    /// At most the last three context strings are prepended. Fewer
    /// tokens than the window size yields the whole token run as a
    /// single n-gram (or nothing at all for blank input).
    fn extract_ngrams(&self, text: &str, context: &[String]) -> Vec<String> {
        let mut composed = String::new();
        for ctx in context.iter().rev().take(3).rev() {
            composed.push_str(ctx);
            composed.push(' ');
        }
        composed.push_str(text);

        let tokens: Vec<&str> = composed.split_whitespace().collect();
        if tokens.is_empty() {
            return Vec::new();
        }
        if tokens.len() < self.ngram_size {
            return vec![tokens.join(" ")];
        }

        tokens
            .windows(self.ngram_size)
            .map(|window| window.join(" "))
            .collect()
    }
}
