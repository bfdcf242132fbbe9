//! Keyed slab allocator

use super::backing::{Heap, SystemAllocator};
use super::pool::Pool;
use super::slot::Entry;
use crate::config::AllocatorConfig;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Slab allocator over a fixed byte budget
///
/// Values are copied into blocks of one size class and addressed by string
/// keys. A key is stored at most once; overwriting requires a `del` first.
#[derive(Debug)]
pub struct Allocator {
    pool: Pool,
    entries: HashMap<String, Entry>,
    total_budget: usize,
    /// `total_budget` minus the bytes of every occupied block
    remaining: usize,
    fallback_min_block_size: usize,
}

impl Allocator {
    /// Create an allocator with the given budget and size classes
    pub fn new(total_budget: usize, class_sizes: &[usize]) -> Result<Self> {
        Self::with_config(&AllocatorConfig::new(total_budget, class_sizes.to_vec()))
    }

    pub fn with_config(config: &AllocatorConfig) -> Result<Self> {
        Self::with_system(config, Arc::new(Heap::new()))
    }

    /// Create an allocator whose blocks come from `system`
    pub fn with_system(config: &AllocatorConfig, system: Arc<dyn SystemAllocator>) -> Result<Self> {
        config.validate()?;
        let pool = Pool::new(config.total_budget, &config.class_sizes, system)?;

        info!(
            total_budget = config.total_budget,
            carved = pool.carved_bytes(),
            fallback_min_block_size = config.fallback_min_block_size,
            "Allocator ready"
        );

        Ok(Self {
            pool,
            entries: HashMap::new(),
            total_budget: config.total_budget,
            remaining: config.total_budget,
            fallback_min_block_size: config.fallback_min_block_size,
        })
    }

    /// Store the first `size` bytes of `value` under `key`
    ///
    /// Nothing changes when an error is returned.
    pub fn put(&mut self, key: &str, size: usize, value: &[u8]) -> Result<()> {
        if self.entries.contains_key(key) {
            debug!(key = %key, "Rejected put on live key");
            return Err(Error::DuplicateKey(key.to_string()));
        }
        if value.len() < size {
            return Err(Error::ValueTooShort {
                size,
                available: value.len(),
            });
        }

        let optimal_size = self.pool.round_up(size).ok_or(Error::OversizedValue {
            size,
            max: self.pool.max_class_size(),
        })?;

        if self.remaining < optimal_size {
            warn!(key = %key, size, remaining = self.remaining, "Capacity exceeded");
            return Err(Error::CapacityExceeded {
                requested: optimal_size,
                remaining: self.remaining,
            });
        }

        let ideal = match self.pool.resolve_exact(optimal_size) {
            Some(index) => index,
            None => return Err(Error::PoolExhausted { size }),
        };

        let class_index = match self.select_class(ideal, size) {
            Some(index) => index,
            None => {
                warn!(key = %key, size, ideal, "No size class can hold value");
                return Err(Error::PoolExhausted { size });
            }
        };

        let class = self
            .pool
            .class_at_mut(class_index)
            .ok_or(Error::PoolExhausted { size })?;
        let blocks = class.acquire(&value[..size])?;
        let consumed = blocks.len() * class.block_size();

        self.remaining -= consumed;
        self.entries
            .insert(key.to_string(), Entry::new(class_index, blocks, size));

        debug!(
            key = %key,
            size,
            class = class_index,
            fallback = class_index != ideal,
            consumed,
            "Stored value"
        );
        Ok(())
    }

    /// Find a class with enough free blocks for `size` bytes
    ///
    /// Classes are visited once each, starting at `ideal` and wrapping
    /// around past the last index. A class qualifies when it can span the
    /// whole value; classes other than `ideal` must also meet the configured
    /// minimum block size.
    fn select_class(&self, ideal: usize, size: usize) -> Option<usize> {
        let count = self.pool.len();
        (0..count)
            .map(|step| (ideal + step) % count)
            .find(|&index| match self.pool.class_at(index) {
                Some(class) => {
                    let eligible =
                        index == ideal || class.block_size() >= self.fallback_min_block_size;
                    eligible && class.can_hold(size)
                }
                None => false,
            })
    }

    /// Copy the value stored under `key` into the front of `dest`
    ///
    /// Returns the value's length. `dest` must hold at least that many
    /// bytes; the padding of the last block is never copied.
    pub fn get(&self, key: &str, dest: &mut [u8]) -> Result<usize> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        let class = self
            .pool
            .class_at(entry.class_index)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;

        class.read_into(&entry.blocks, entry.len, dest)
    }

    /// Owned copy of the value stored under `key`
    pub fn get_vec(&self, key: &str) -> Result<Vec<u8>> {
        let len = self.len_of(key)?;
        let mut buf = vec![0u8; len];
        self.get(key, &mut buf)?;
        Ok(buf)
    }

    /// Remove `key`, zeroing and freeing its blocks
    pub fn del(&mut self, key: &str) -> Result<()> {
        let entry = self
            .entries
            .get(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;
        let class = self
            .pool
            .class_at_mut(entry.class_index)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))?;

        class.release(&entry.blocks)?;
        class.erase(&entry.blocks)?;
        let reclaimed = entry.occupied_bytes(class.block_size());

        self.remaining += reclaimed;
        self.entries.remove(key);

        debug!(key = %key, reclaimed, "Deleted value");
        Ok(())
    }

    /// Bytes not yet consumed by occupied blocks
    pub fn remaining_capacity(&self) -> usize {
        self.remaining
    }

    pub fn total_budget(&self) -> usize {
        self.total_budget
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Logical length of the value stored under `key`
    pub fn len_of(&self, key: &str) -> Result<usize> {
        self.entries
            .get(key)
            .map(|e| e.len)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    pub fn entry(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Number of live keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Get statistics about the allocator
    pub fn stats(&self) -> AllocatorStats {
        let mut stats = AllocatorStats {
            total_budget: self.total_budget,
            remaining_capacity: self.remaining,
            carved_bytes: self.pool.carved_bytes(),
            live_keys: self.entries.len(),
            logical_bytes: self.entries.values().map(|e| e.len).sum(),
            ..AllocatorStats::default()
        };

        for (index, class) in self.pool.iter().enumerate() {
            let class_stats = SizeClassStats {
                index,
                block_size: class.block_size(),
                capacity: class.capacity(),
                free_blocks: class.free_count(),
                occupied_blocks: class.occupied_count(),
            };
            stats.occupied_bytes += class_stats.occupied_blocks * class_stats.block_size;
            stats.size_classes.push(class_stats);
        }

        stats
    }
}

/// Statistics for the allocator
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocatorStats {
    pub total_budget: usize,
    pub remaining_capacity: usize,
    /// Bytes actually reserved for blocks
    pub carved_bytes: usize,
    pub live_keys: usize,
    /// Sum of stored value lengths
    pub logical_bytes: usize,
    /// Sum of occupied block sizes
    pub occupied_bytes: usize,
    pub size_classes: Vec<SizeClassStats>,
}

impl AllocatorStats {
    /// Padding bytes held in partially filled blocks
    pub fn internal_waste(&self) -> usize {
        self.occupied_bytes - self.logical_bytes
    }

    /// Fraction of carved bytes holding live blocks
    pub fn utilization(&self) -> f64 {
        if self.carved_bytes == 0 {
            0.0
        } else {
            self.occupied_bytes as f64 / self.carved_bytes as f64
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SizeClassStats {
    pub index: usize,
    pub block_size: usize,
    pub capacity: usize,
    pub free_blocks: usize,
    pub occupied_blocks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_conserved(alloc: &Allocator) {
        let occupied: usize = alloc
            .keys()
            .filter_map(|k| alloc.entry(k))
            .map(|e| e.occupied_bytes(alloc.pool().size_at(e.class_index).unwrap()))
            .sum();
        assert_eq!(alloc.remaining_capacity() + occupied, alloc.total_budget());
        assert_eq!(alloc.stats().occupied_bytes, occupied);
    }

    #[test]
    fn test_allocator_basic() -> Result<()> {
        let mut alloc = Allocator::new(4096, &[32, 64, 128, 256])?;

        let data = b"Hello, Slab!";
        alloc.put("greeting", data.len(), data)?;
        assert!(alloc.contains_key("greeting"));
        assert_eq!(alloc.entry("greeting").unwrap().class_index, 0);
        assert_eq!(alloc.remaining_capacity(), 4096 - 32);

        let mut buf = [0u8; 32];
        let n = alloc.get("greeting", &mut buf)?;
        assert_eq!(&buf[..n], data);
        assert_eq!(alloc.get_vec("greeting")?, data.to_vec());

        alloc.del("greeting")?;
        assert!(!alloc.contains_key("greeting"));
        assert_eq!(alloc.remaining_capacity(), 4096);
        assert!(alloc.is_empty());
        Ok(())
    }

    #[test]
    fn test_put_uses_declared_size() -> Result<()> {
        let mut alloc = Allocator::new(4096, &[32, 64])?;
        alloc.put("k", 4, b"abcdefgh")?;
        assert_eq!(alloc.get_vec("k")?, b"abcd".to_vec());

        assert_eq!(
            alloc.put("short", 10, b"abc"),
            Err(Error::ValueTooShort { size: 10, available: 3 })
        );
        assert!(!alloc.contains_key("short"));
        Ok(())
    }

    #[test]
    fn test_duplicate_key() -> Result<()> {
        let mut alloc = Allocator::new(4096, &[32, 64])?;
        alloc.put("k", 3, b"one")?;
        let before = alloc.remaining_capacity();

        assert_eq!(
            alloc.put("k", 3, b"two"),
            Err(Error::DuplicateKey("k".into()))
        );
        assert_eq!(alloc.remaining_capacity(), before);
        assert_eq!(alloc.get_vec("k")?, b"one".to_vec());
        assert_eq!(alloc.len(), 1);
        Ok(())
    }

    #[test]
    fn test_oversized_value() -> Result<()> {
        let mut alloc = Allocator::new(4096, &[32, 64])?;
        let value = [0u8; 65];
        assert_eq!(
            alloc.put("big", 65, &value),
            Err(Error::OversizedValue { size: 65, max: 64 })
        );
        assert_eq!(alloc.remaining_capacity(), 4096);
        Ok(())
    }

    #[test]
    fn test_exhaustion_small_pool() -> Result<()> {
        // 64 bytes per class: two 32 byte blocks, one 64 byte block
        let mut alloc = Allocator::new(128, &[32, 64])?;

        alloc.put("a", 64, &[1u8; 64])?;
        assert_eq!(alloc.remaining_capacity(), 64);
        alloc.put("b", 32, &[2u8; 32])?;
        alloc.put("c", 32, &[3u8; 32])?;
        assert_eq!(alloc.remaining_capacity(), 0);

        assert_eq!(
            alloc.put("d", 1, b"x"),
            Err(Error::CapacityExceeded { requested: 32, remaining: 0 })
        );
        assert_conserved(&alloc);

        alloc.del("b")?;
        alloc.put("d", 1, b"x")?;
        assert_conserved(&alloc);
        Ok(())
    }

    #[test]
    fn test_fallback_to_smaller_class_spans() -> Result<()> {
        // 256 bytes per class: eight 32 byte blocks, two 128 byte blocks
        let mut alloc = Allocator::new(512, &[32, 128])?;
        alloc.put("a", 100, &[1u8; 100])?;
        alloc.put("b", 100, &[2u8; 100])?;

        // 128 byte class is full; wrap around into the 32 byte class
        let value: Vec<u8> = (0..100u8).collect();
        alloc.put("c", 100, &value)?;
        let entry = alloc.entry("c").unwrap();
        assert_eq!(entry.class_index, 0);
        assert_eq!(entry.blocks.len(), 4);
        assert_eq!(alloc.get_vec("c")?, value);
        assert_conserved(&alloc);
        Ok(())
    }

    #[test]
    fn test_fallback_to_larger_class() -> Result<()> {
        // 128 bytes per class: four 32 byte blocks, two 64 byte blocks
        let mut alloc = Allocator::new(256, &[32, 64])?;
        for key in ["a", "b", "c", "d"] {
            alloc.put(key, 10, &[9u8; 10])?;
        }
        alloc.put("e", 10, &[7u8; 10])?;
        assert_eq!(alloc.entry("e").unwrap().class_index, 1);
        assert_eq!(alloc.remaining_capacity(), 256 - 4 * 32 - 64);
        assert_conserved(&alloc);
        Ok(())
    }

    #[test]
    fn test_pool_exhausted_by_fragmentation() -> Result<()> {
        // 100 bytes per class: three 32 byte blocks, one 64 byte block
        let mut alloc = Allocator::new(200, &[32, 64])?;
        alloc.put("a", 64, &[0u8; 64])?;
        alloc.put("b", 32, &[0u8; 32])?;
        alloc.put("c", 32, &[0u8; 32])?;
        assert_eq!(alloc.remaining_capacity(), 72);

        // The counter allows 64 more bytes, but the 64 byte class is used
        // up and a single free 32 byte block cannot span 33 bytes
        let before = alloc.stats();
        assert_eq!(
            alloc.put("d", 33, &[0u8; 33]),
            Err(Error::PoolExhausted { size: 33 })
        );
        let after = alloc.stats();
        assert_eq!(before.remaining_capacity, after.remaining_capacity);
        assert_eq!(before.occupied_bytes, after.occupied_bytes);
        assert!(!alloc.contains_key("d"));

        alloc.put("d", 20, &[0u8; 20])?;
        assert_eq!(alloc.remaining_capacity(), 40);
        assert_eq!(
            alloc.put("e", 20, &[0u8; 20]),
            Err(Error::PoolExhausted { size: 20 })
        );
        assert_conserved(&alloc);
        Ok(())
    }

    #[test]
    fn test_wrap_around_needs_enough_blocks() -> Result<()> {
        // 96 bytes per class: three 32 byte blocks, one 64 byte block
        let mut alloc = Allocator::new(192, &[32, 64])?;
        alloc.put("a", 64, &[1u8; 64])?;
        alloc.put("b", 40, &[2u8; 40])?;
        assert_eq!(alloc.entry("b").unwrap().blocks.len(), 2);
        assert_eq!(alloc.remaining_capacity(), 64);

        assert_eq!(
            alloc.put("c", 64, &[3u8; 64]),
            Err(Error::PoolExhausted { size: 64 })
        );
        alloc.put("c", 32, &[3u8; 32])?;
        assert_eq!(alloc.remaining_capacity(), 32);
        assert_conserved(&alloc);
        Ok(())
    }

    #[test]
    fn test_fallback_min_block_size() -> Result<()> {
        let config = AllocatorConfig::new(512, vec![32, 128]).with_fallback_min_block_size(64);
        let mut alloc = Allocator::with_config(&config)?;
        alloc.put("a", 100, &[1u8; 100])?;
        alloc.put("b", 100, &[2u8; 100])?;

        // 32 byte class has room, but is below the fallback threshold
        assert_eq!(
            alloc.put("c", 100, &[3u8; 100]),
            Err(Error::PoolExhausted { size: 100 })
        );
        // Small values still use their ideal class
        alloc.put("d", 8, &[4u8; 8])?;
        assert_eq!(alloc.entry("d").unwrap().class_index, 0);
        Ok(())
    }

    #[test]
    fn test_spanning_200_bytes() -> Result<()> {
        let mut alloc = Allocator::new(64 * 4 * 2, &[64, 256])?;
        // Fill the 256 byte class so the value spans 64 byte blocks
        alloc.put("filler", 256, &[0u8; 256])?;

        let value: Vec<u8> = (0..200u32).map(|i| (i * 7) as u8).collect();
        alloc.put("span", 200, &value)?;
        let entry = alloc.entry("span").unwrap();
        assert_eq!(alloc.pool().size_at(entry.class_index), Some(64));
        assert_eq!(entry.blocks.len(), 4);
        assert_eq!(entry.len, 200);

        let mut buf = vec![0u8; 256];
        assert_eq!(alloc.get("span", &mut buf)?, 200);
        assert_eq!(&buf[..200], &value[..]);
        Ok(())
    }

    #[test]
    fn test_get_buffer_too_small() -> Result<()> {
        let mut alloc = Allocator::new(4096, &[32, 64])?;
        alloc.put("k", 40, &[5u8; 40])?;
        let mut buf = [0u8; 39];
        assert_eq!(
            alloc.get("k", &mut buf),
            Err(Error::BufferTooSmall { needed: 40, available: 39 })
        );
        Ok(())
    }

    #[test]
    fn test_not_found() -> Result<()> {
        let mut alloc = Allocator::new(4096, &[32, 64])?;
        let mut buf = [0u8; 64];
        assert_eq!(alloc.get("nope", &mut buf), Err(Error::KeyNotFound("nope".into())));
        assert_eq!(alloc.del("nope"), Err(Error::KeyNotFound("nope".into())));

        alloc.put("k", 1, b"x")?;
        alloc.del("k")?;
        assert_eq!(alloc.del("k"), Err(Error::KeyNotFound("k".into())));
        assert_eq!(alloc.get_vec("k"), Err(Error::KeyNotFound("k".into())));
        assert_eq!(alloc.remaining_capacity(), 4096);
        Ok(())
    }

    #[test]
    fn test_delete_erases_blocks() -> Result<()> {
        // 256 bytes per class: four 64B blocks and one 256B block
        let mut alloc = Allocator::new(512, &[64, 256])?;
        alloc.put("filler", 256, &[0x11; 256])?;
        alloc.put("secret", 150, &[0xEE; 150])?;
        let entry = alloc.entry("secret").unwrap().clone();
        assert_eq!(entry.class_index, 0);
        assert_eq!(entry.blocks.len(), 3);
        {
            let class = alloc.pool().class_at(0).unwrap();
            for id in &entry.blocks {
                assert!(class.block(*id).unwrap().contains(&0xEE));
            }
        }

        alloc.del("secret")?;
        let class = alloc.pool().class_at(entry.class_index).unwrap();
        for id in &entry.blocks {
            assert!(!class.is_occupied(*id));
            assert!(class.block(*id).unwrap().iter().all(|&b| b == 0));
        }
        assert_eq!(alloc.remaining_capacity(), 256);
        assert_eq!(alloc.get_vec("filler")?, vec![0x11; 256]);
        Ok(())
    }

    #[test]
    fn test_allocator_reuse() -> Result<()> {
        let mut alloc = Allocator::new(96, &[32])?;
        alloc.put("a", 3, b"aaa")?;
        alloc.put("b", 3, b"bbb")?;
        alloc.put("c", 3, b"ccc")?;
        let freed = alloc.entry("a").unwrap().blocks.clone();

        alloc.del("a")?;
        alloc.put("d", 3, b"ddd")?;
        assert_eq!(alloc.entry("d").unwrap().blocks, freed);
        assert_eq!(alloc.get_vec("d")?, b"ddd".to_vec());
        Ok(())
    }

    #[test]
    fn test_allocator_stats() -> Result<()> {
        let mut alloc = Allocator::new(4096, &[32, 64, 128, 256])?;
        alloc.put("a", 50, &[0u8; 50])?;
        alloc.put("b", 100, &[0u8; 100])?;
        alloc.put("c", 200, &[0u8; 200])?;

        let stats = alloc.stats();
        assert_eq!(stats.size_classes.len(), 4);
        assert_eq!(stats.live_keys, 3);
        assert_eq!(stats.logical_bytes, 350);
        assert_eq!(stats.occupied_bytes, 64 + 128 + 256);
        assert_eq!(stats.internal_waste(), 98);
        assert_eq!(stats.carved_bytes, 4096);
        assert!(stats.utilization() > 0.0);
        assert_eq!(stats.size_classes[1].occupied_blocks, 1);
        assert_conserved(&alloc);
        Ok(())
    }

    #[test]
    fn test_invalid_construction() {
        assert!(matches!(Allocator::new(0, &[32]), Err(Error::Construction(_))));
        assert!(matches!(Allocator::new(1024, &[]), Err(Error::Construction(_))));
        assert!(matches!(Allocator::new(1024, &[64, 64]), Err(Error::Construction(_))));
    }

    #[test]
    fn test_drop_releases_all_backing() -> Result<()> {
        let heap = Arc::new(Heap::new());
        {
            let config = AllocatorConfig::new(2048, vec![32, 64]);
            let mut alloc = Allocator::with_system(&config, heap.clone())?;
            alloc.put("k", 10, &[1u8; 10])?;
            assert_eq!(heap.outstanding_bytes(), 2048);
        }
        assert_eq!(heap.outstanding_bytes(), 0);
        Ok(())
    }
}
