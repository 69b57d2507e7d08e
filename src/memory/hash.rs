//! Deterministic hash routing from n-grams to slot addresses
//!
//! The router maps arbitrary n-gram strings onto a fixed address space
//! using SHA-256, so the same input always lands on the same slot. No
//! learned routing network is involved; addressing is pure arithmetic.

use sha2::{Digest, Sha256};

use super::{MemoryError, MemoryResult};

/// Routes n-gram strings to slot addresses via a stable hash.
///
/// The first 8 bytes of the SHA-256 digest, interpreted as a big-endian
/// unsigned integer, are reduced modulo the table size.
#[derive(Debug, Clone)]
pub struct HashRouter {
    memory_size: u64,
}

impl HashRouter {
    /// Create a router for a table of `memory_size` slots.
    pub fn new(memory_size: u64) -> MemoryResult<Self> {
        if memory_size == 0 {
            return Err(MemoryError::InvalidInput(
                "memory size must be > 0".to_string(),
            ));
        }

        Ok(Self { memory_size })
    }

    /// Number of addressable slots.
    pub fn memory_size(&self) -> u64 {
        self.memory_size
    }

    /// Hash an n-gram to a slot address in `[0, memory_size)`.
    pub fn hash(&self, ngram: &str) -> MemoryResult<u64> {
        if ngram.is_empty() {
            return Err(MemoryError::InvalidInput(
                "n-gram must not be empty".to_string(),
            ));
        }

        let digest = Sha256::digest(ngram.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);

        Ok(u64::from_be_bytes(prefix) % self.memory_size)
    }

    /// Hash a batch of n-grams.
    pub fn hash_batch(&self, ngrams: &[String]) -> MemoryResult<Vec<u64>> {
        ngrams.iter().map(|ngram| self.hash(ngram)).collect()
    }

    /// Measure how evenly a sample of n-grams spreads over the address
    /// space by bucketing addresses into 100 bins.
    pub fn verify_distribution(&self, samples: &[String]) -> MemoryResult<DistributionReport> {
        if samples.is_empty() {
            return Err(MemoryError::InvalidInput(
                "sample list must not be empty".to_string(),
            ));
        }

        let addresses = self.hash_batch(samples)?;

        let bucket_size = (self.memory_size / 100).max(1);
        let mut buckets = [0u64; 100];
        for address in &addresses {
            let idx = ((address / bucket_size) as usize).min(99);
            buckets[idx] += 1;
        }

        let unique: std::collections::HashSet<u64> = addresses.iter().copied().collect();
        let avg_per_bucket = samples.len() as f64 / 100.0;
        let variance = buckets
            .iter()
            .map(|&count| (count as f64 - avg_per_bucket).powi(2))
            .sum::<f64>()
            / 100.0;
        let std_dev = variance.sqrt();
        let uniformity = if avg_per_bucket > 0.0 {
            1.0 - (std_dev / avg_per_bucket)
        } else {
            0.0
        };

        Ok(DistributionReport {
            sample_size: samples.len(),
            unique_addresses: unique.len(),
            collision_rate: 1.0 - unique.len() as f64 / samples.len() as f64,
            uniformity,
            avg_per_bucket,
            std_dev,
        })
    }
}

/// Uniformity statistics for a sample of hashed n-grams.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DistributionReport {
    /// Number of sampled n-grams
    pub sample_size: usize,
    /// Distinct addresses produced
    pub unique_addresses: usize,
    /// Fraction of samples that collided with an earlier sample
    pub collision_rate: f64,
    /// 1.0 means perfectly even bucket counts
    pub uniformity: f64,
    /// Expected samples per bucket
    pub avg_per_bucket: f64,
    /// Standard deviation of bucket counts
    pub std_dev: f64,
}
