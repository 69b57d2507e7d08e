//! Per-engine result caching
//!
//! This module provides:
//! - A TTL-bounded LRU cache for inference results
//! - Hit/miss/eviction/expiration statistics per cache
//! - One pre-sized cache per engine class, tuned to that class's
//!   result volatility (soldier results go stale in seconds, scholar
//!   research stays valid for an hour)

pub mod manager;
pub mod result_cache;

use thiserror::Error;

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Unknown engine class: {0}")]
    UnknownEngine(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

pub use manager::EngineCacheManager;
pub use result_cache::{ResultCache, ResultCacheStats};
