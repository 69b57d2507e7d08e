//! Fixed-size slot tables backing the associative memory
//!
//! Two backends share one trait:
//! - `RamSlotTable`: flat in-process arrays, fastest access
//! - `DiskSlotTable`: memory-mapped file with an LRU slot cache, for
//!   tables larger than RAM
//!
//! Each slot holds one fixed-width f32 embedding plus an occupancy
//! flag. Writes overwrite unconditionally; collisions are an accepted
//! property of the addressing scheme.

use std::fs::OpenOptions;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::{MemoryError, MemoryResult};

/// Occupancy sampling bound for the disk backend.
const OCCUPANCY_SAMPLE_LIMIT: u64 = 10_000;

/// Usage snapshot for a slot table.
#[derive(Debug, Clone, Serialize)]
pub struct TableStats {
    /// Total addressable slots
    pub total_slots: u64,
    /// Occupied slots (exact for RAM, stride-sampled estimate for disk)
    pub occupied_slots: u64,
    /// `occupied_slots / total_slots`
    pub usage_rate: f64,
    /// Resident or file footprint in megabytes
    pub memory_mb: f64,
    /// Backend identifier (`ram` or `disk`)
    pub backend: &'static str,
    /// Slot-cache entries currently held (disk backend only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_len: Option<usize>,
    /// Slot-cache hit rate since creation (disk backend only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit_rate: Option<f64>,
}

/// Storage backend for embedding slots.
///
/// Implementations guarantee that a concurrent reader of a slot sees
/// either the previous or the next fully-written vector, never a torn
/// one.
pub trait SlotTable: Send + Sync {
    /// Read the embedding at `address`, or `None` for an unoccupied slot.
    fn get(&self, address: u64) -> MemoryResult<Option<Vec<f32>>>;

    /// Write `embedding` at `address` and mark the slot occupied.
    fn set(&self, address: u64, embedding: &[f32]) -> MemoryResult<()>;

    /// Usage statistics snapshot.
    fn usage_stats(&self) -> TableStats;

    /// Total addressable slots.
    fn slot_count(&self) -> u64;

    /// Configured embedding width.
    fn embedding_dim(&self) -> usize;
}

fn check_address(address: u64, size: u64) -> MemoryResult<()> {
    if address >= size {
        return Err(MemoryError::OutOfRange { address, size });
    }
    Ok(())
}

fn check_dim(expected: usize, actual: usize) -> MemoryResult<()> {
    if expected != actual {
        return Err(MemoryError::DimensionMismatch { expected, actual });
    }
    Ok(())
}

/// In-process slot table over flat arrays.
pub struct RamSlotTable {
    size: u64,
    embedding_dim: usize,
    inner: RwLock<RamInner>,
}

struct RamInner {
    vectors: Vec<f32>,
    occupied: Vec<bool>,
    occupied_count: u64,
}

impl RamSlotTable {
    /// Allocate a zeroed table of `size` slots of `embedding_dim` floats.
    pub fn new(size: u64, embedding_dim: usize) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::InvalidInput(
                "table size must be > 0".to_string(),
            ));
        }
        if embedding_dim == 0 {
            return Err(MemoryError::InvalidInput(
                "embedding dimension must be > 0".to_string(),
            ));
        }

        let elements = (size as usize)
            .checked_mul(embedding_dim)
            .ok_or_else(|| MemoryError::InvalidInput("table dimensions overflow".to_string()))?;

        let memory_mb = (elements * 4) as f64 / (1024.0 * 1024.0);
        log::info!("RAM slot table initialized: {size} slots, {memory_mb:.1}MB");

        Ok(Self {
            size,
            embedding_dim,
            inner: RwLock::new(RamInner {
                vectors: vec![0.0; elements],
                occupied: vec![false; size as usize],
                occupied_count: 0,
            }),
        })
    }
}

impl SlotTable for RamSlotTable {
    fn get(&self, address: u64) -> MemoryResult<Option<Vec<f32>>> {
        check_address(address, self.size)?;

        let inner = self.inner.read();
        if !inner.occupied[address as usize] {
            return Ok(None);
        }

        let offset = address as usize * self.embedding_dim;
        Ok(Some(inner.vectors[offset..offset + self.embedding_dim].to_vec()))
    }

    fn set(&self, address: u64, embedding: &[f32]) -> MemoryResult<()> {
        check_address(address, self.size)?;
        check_dim(self.embedding_dim, embedding.len())?;

        let mut inner = self.inner.write();
        let offset = address as usize * self.embedding_dim;
        inner.vectors[offset..offset + self.embedding_dim].copy_from_slice(embedding);
        if !inner.occupied[address as usize] {
            inner.occupied[address as usize] = true;
            inner.occupied_count += 1;
        }

        Ok(())
    }

    fn usage_stats(&self) -> TableStats {
        let inner = self.inner.read();
        let occupied = inner.occupied_count;

        TableStats {
            total_slots: self.size,
            occupied_slots: occupied,
            usage_rate: occupied as f64 / self.size as f64,
            memory_mb: (self.size as f64 * self.embedding_dim as f64 * 4.0) / (1024.0 * 1024.0),
            backend: "ram",
            cache_len: None,
            cache_hit_rate: None,
        }
    }

    fn slot_count(&self) -> u64 {
        self.size
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

/// Disk-backed slot table over a memory-mapped file.
///
/// Record layout is one occupancy byte followed by `embedding_dim`
/// little-endian f32 components, no header. The file is created and
/// zeroed on first open. A bounded LRU cache keeps recently-read slots
/// in memory.
pub struct DiskSlotTable {
    size: u64,
    embedding_dim: usize,
    record_size: usize,
    file_path: PathBuf,
    map: Mutex<MmapMut>,
    cache: Mutex<LruCache<u64, Vec<f32>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl DiskSlotTable {
    /// Open (or create and zero) the backing file and map it.
    pub fn new<P: AsRef<Path>>(
        size: u64,
        embedding_dim: usize,
        file_path: P,
        cache_size: usize,
    ) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::InvalidInput(
                "table size must be > 0".to_string(),
            ));
        }
        if embedding_dim == 0 {
            return Err(MemoryError::InvalidInput(
                "embedding dimension must be > 0".to_string(),
            ));
        }
        let cache_capacity = NonZeroUsize::new(cache_size).ok_or_else(|| {
            MemoryError::InvalidInput("cache size must be > 0".to_string())
        })?;

        let file_path = file_path.as_ref().to_path_buf();
        if let Some(parent) = file_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let record_size = 1 + embedding_dim * 4;
        let file_size = size
            .checked_mul(record_size as u64)
            .ok_or_else(|| MemoryError::InvalidInput("table dimensions overflow".to_string()))?;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&file_path)?;

        if file.metadata()?.len() != file_size {
            file.set_len(file_size)?;
        }

        // Safety: the file is sized before mapping and never truncated
        // afterwards; the mapping stays valid once the handle closes.
        let map = unsafe { MmapMut::map_mut(&file)? };

        log::info!(
            "Disk slot table initialized: {size} slots, {:.1}MB at {}, cache {cache_size}",
            file_size as f64 / (1024.0 * 1024.0),
            file_path.display()
        );

        Ok(Self {
            size,
            embedding_dim,
            record_size,
            file_path,
            map: Mutex::new(map),
            cache: Mutex::new(LruCache::new(cache_capacity)),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        })
    }

    /// Flush dirty pages to the backing file.
    pub fn flush(&self) -> MemoryResult<()> {
        self.map.lock().flush()?;
        Ok(())
    }

    fn record_offset(&self, address: u64) -> usize {
        address as usize * self.record_size
    }
}

impl SlotTable for DiskSlotTable {
    fn get(&self, address: u64) -> MemoryResult<Option<Vec<f32>>> {
        check_address(address, self.size)?;

        if let Some(vector) = self.cache.lock().get(&address) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(vector.clone()));
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let vector = {
            let map = self.map.lock();
            let offset = self.record_offset(address);
            if map[offset] == 0 {
                return Ok(None);
            }

            let mut vector = Vec::with_capacity(self.embedding_dim);
            let payload = &map[offset + 1..offset + self.record_size];
            for chunk in payload.chunks_exact(4) {
                vector.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
            vector
        };

        self.cache.lock().put(address, vector.clone());
        Ok(Some(vector))
    }

    fn set(&self, address: u64, embedding: &[f32]) -> MemoryResult<()> {
        check_address(address, self.size)?;
        check_dim(self.embedding_dim, embedding.len())?;

        {
            let mut map = self.map.lock();
            let offset = self.record_offset(address);

            // Vector bytes land before the occupancy flag so a reader
            // that observes the flag sees a complete vector.
            for (i, component) in embedding.iter().enumerate() {
                let bytes = component.to_le_bytes();
                let at = offset + 1 + i * 4;
                map[at..at + 4].copy_from_slice(&bytes);
            }
            map[offset] = 1;
        }

        self.cache.lock().put(address, embedding.to_vec());
        Ok(())
    }

    fn usage_stats(&self) -> TableStats {
        // Stride sampling over at most OCCUPANCY_SAMPLE_LIMIT slots; the
        // resulting occupancy is an estimate, not a count.
        let stride = (self.size / OCCUPANCY_SAMPLE_LIMIT).max(1);
        let mut sampled_occupied = 0u64;
        {
            let map = self.map.lock();
            let mut address = 0u64;
            while address < self.size {
                if map[self.record_offset(address)] != 0 {
                    sampled_occupied += 1;
                }
                address += stride;
            }
        }
        let occupied = sampled_occupied * stride;

        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = (hits + misses).max(1);

        TableStats {
            total_slots: self.size,
            occupied_slots: occupied.min(self.size),
            usage_rate: (occupied as f64 / self.size as f64).min(1.0),
            memory_mb: (self.size as f64 * self.record_size as f64) / (1024.0 * 1024.0),
            backend: "disk",
            cache_len: Some(self.cache.lock().len()),
            cache_hit_rate: Some(hits as f64 / lookups as f64),
        }
    }

    fn slot_count(&self) -> u64 {
        self.size
    }

    fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }
}

impl Drop for DiskSlotTable {
    fn drop(&mut self) {
        if let Err(e) = self.map.lock().flush() {
            log::warn!(
                "Failed to flush slot table {}: {e}",
                self.file_path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_set_get_roundtrip() {
        let table = RamSlotTable::new(64, 4).unwrap();

        assert_eq!(table.get(7).unwrap(), None);

        table.set(7, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(table.get(7).unwrap(), Some(vec![1.0, 2.0, 3.0, 4.0]));

        // Overwrite is unconditional.
        table.set(7, &[9.0, 8.0, 7.0, 6.0]).unwrap();
        assert_eq!(table.get(7).unwrap(), Some(vec![9.0, 8.0, 7.0, 6.0]));
    }

    #[test]
    fn test_ram_bounds_and_dimension_checks() {
        let table = RamSlotTable::new(8, 2).unwrap();

        assert!(matches!(
            table.get(8),
            Err(MemoryError::OutOfRange { address: 8, size: 8 })
        ));
        assert!(matches!(
            table.set(0, &[1.0, 2.0, 3.0]),
            Err(MemoryError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_ram_usage_stats() {
        let table = RamSlotTable::new(10, 2).unwrap();
        table.set(1, &[1.0, 1.0]).unwrap();
        table.set(2, &[2.0, 2.0]).unwrap();
        table.set(2, &[3.0, 3.0]).unwrap();

        let stats = table.usage_stats();
        assert_eq!(stats.total_slots, 10);
        assert_eq!(stats.occupied_slots, 2);
        assert_eq!(stats.backend, "ram");
    }

    #[test]
    fn test_disk_roundtrip_and_persistence() {
        let path = std::env::temp_dir().join("synapse_test_slots.bin");
        let _ = std::fs::remove_file(&path);

        {
            let table = DiskSlotTable::new(32, 3, &path, 8).unwrap();
            table.set(5, &[0.5, -1.5, 2.5]).unwrap();
            assert_eq!(table.get(5).unwrap(), Some(vec![0.5, -1.5, 2.5]));
            assert_eq!(table.get(6).unwrap(), None);
            table.flush().unwrap();
        }

        // Reopen: data survives, including the exact file size.
        let expected_len = 32 * (1 + 3 * 4);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), expected_len);

        let table = DiskSlotTable::new(32, 3, &path, 8).unwrap();
        assert_eq!(table.get(5).unwrap(), Some(vec![0.5, -1.5, 2.5]));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_disk_cache_hit_rate() {
        let path = std::env::temp_dir().join("synapse_test_slot_cache.bin");
        let _ = std::fs::remove_file(&path);

        let table = DiskSlotTable::new(16, 2, &path, 4).unwrap();
        table.set(3, &[1.0, 2.0]).unwrap();

        // set() primes the cache, so both reads hit it.
        table.get(3).unwrap();
        table.get(3).unwrap();

        let stats = table.usage_stats();
        assert_eq!(stats.backend, "disk");
        assert_eq!(stats.cache_hit_rate, Some(1.0));

        let _ = std::fs::remove_file(&path);
    }
}
