//! Unified cache management for the three engine classes

use std::collections::HashMap;
use std::time::Duration;

use super::result_cache::{ResultCache, ResultCacheStats};
use super::{CacheError, CacheResult};

/// One result cache per engine class, sized and aged for that class.
///
/// Soldier results describe a market that moves in seconds; commander
/// strategy holds for minutes; scholar research stays useful for an
/// hour.
pub struct EngineCacheManager {
    commander: ResultCache,
    scholar: ResultCache,
    soldier: ResultCache,
}

impl Default for EngineCacheManager {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineCacheManager {
    /// Create the three per-engine caches with their standard sizing.
    pub fn new() -> Self {
        let manager = Self {
            commander: ResultCache::new(1000, Duration::from_secs(300)),
            scholar: ResultCache::new(500, Duration::from_secs(3600)),
            soldier: ResultCache::new(2000, Duration::from_secs(5)),
        };
        log::info!("Engine cache manager initialized");
        manager
    }

    /// Cache for the named engine class
    /// (`soldier` / `commander` / `scholar`).
    pub fn cache(&self, engine: &str) -> CacheResult<&ResultCache> {
        match engine {
            "commander" => Ok(&self.commander),
            "scholar" => Ok(&self.scholar),
            "soldier" => Ok(&self.soldier),
            other => Err(CacheError::UnknownEngine(other.to_string())),
        }
    }

    /// Statistics for every cache, keyed by engine class.
    pub fn all_stats(&self) -> HashMap<&'static str, ResultCacheStats> {
        HashMap::from([
            ("commander", self.commander.stats()),
            ("scholar", self.scholar.stats()),
            ("soldier", self.soldier.stats()),
        ])
    }

    /// Drop every entry in every cache.
    pub fn clear_all(&self) {
        self.commander.clear();
        self.scholar.clear();
        self.soldier.clear();
        log::info!("All engine caches cleared");
    }
}
