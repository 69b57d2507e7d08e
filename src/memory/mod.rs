//! Content-addressable associative memory with O(1) lookup
//!
//! This module provides:
//! - Deterministic SHA-256 routing from n-gram strings to slot addresses
//! - Fixed-size slot tables with RAM or disk-backed (mmap) storage
//! - An engram store that fuses per-n-gram hits into a single embedding
//! - Bounded LRU query caching and usage statistics

pub mod hash;
pub mod store;
pub mod table;

use thiserror::Error;

/// Memory subsystem errors
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Address out of range: {address}, valid range: [0, {size})")]
    OutOfRange {
        /// The rejected address
        address: u64,
        /// Exclusive upper bound of the slot table
        size: u64,
    },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured embedding width
        expected: usize,
        /// Width of the offered embedding
        actual: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

pub use hash::{DistributionReport, HashRouter};
pub use store::{EngramStore, MemoryConfig, MemoryStatistics, QueryCacheStats, StorageBackend};
pub use table::{DiskSlotTable, RamSlotTable, SlotTable, TableStats};
