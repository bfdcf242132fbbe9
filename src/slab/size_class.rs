//! Size class management for the slab pool

use super::backing::SystemAllocator;
use super::slot::{BlockId, BlockState};
use crate::error::{Error, Result};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};
use zeroize::Zeroize;

/// Number of `block_size` blocks needed to hold `len` bytes
///
/// An empty value still occupies one block.
pub fn blocks_needed(len: usize, block_size: usize) -> usize {
    len.div_ceil(block_size).max(1)
}

/// A size class owns every block of one fixed size
///
/// Blocks are reserved once at construction and kept until the class is
/// dropped. Free blocks are handed out in FIFO order; released blocks go to
/// the back of the queue.
pub struct SizeClass {
    /// Size of blocks in this class (bytes)
    block_size: usize,
    /// Backing storage, indexed by `BlockId`
    blocks: Vec<Box<[u8]>>,
    /// Occupancy, parallel to `blocks`
    state: Vec<BlockState>,
    /// Free blocks in hand-out order
    free: VecDeque<BlockId>,
    system: Arc<dyn SystemAllocator>,
}

impl SizeClass {
    /// Create a size class with `class_budget / block_size` blocks
    pub fn new(
        block_size: usize,
        class_budget: usize,
        system: Arc<dyn SystemAllocator>,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(Error::Construction("Block size must be positive".into()));
        }

        let count = class_budget / block_size;
        if count == 0 {
            return Err(Error::Construction(format!(
                "Class budget {} cannot hold a single {} byte block",
                class_budget, block_size
            )));
        }
        if count > u32::MAX as usize {
            return Err(Error::Construction(format!(
                "Class of {} byte blocks would need {} blocks",
                block_size, count
            )));
        }

        let mut class = Self {
            block_size,
            blocks: Vec::with_capacity(count),
            state: Vec::with_capacity(count),
            free: VecDeque::with_capacity(count),
            system,
        };

        // On failure the partially built class is dropped, which hands
        // the blocks reserved so far back to the system allocator.
        for index in 0..count {
            let block = class.system.allocate(block_size)?;
            class.blocks.push(block);
            class.state.push(BlockState::Free);
            class.free.push_back(BlockId::new(index as u32));
        }

        debug!(block_size, blocks = count, "Created size class");
        Ok(class)
    }

    /// Size of every block in this class
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks owned
    pub fn capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Get the number of free blocks
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Get the number of blocks holding live data
    pub fn occupied_count(&self) -> usize {
        self.capacity() - self.free_count()
    }

    /// Check if enough blocks are free to span a value of `len` bytes
    pub fn can_hold(&self, len: usize) -> bool {
        self.free_count() >= blocks_needed(len, self.block_size)
    }

    pub fn is_occupied(&self, id: BlockId) -> bool {
        self.state.get(id.index()) == Some(&BlockState::Occupied)
    }

    /// Raw contents of a block
    pub fn block(&self, id: BlockId) -> Option<&[u8]> {
        self.blocks.get(id.index()).map(|b| &b[..])
    }

    /// Copy `source` into free blocks
    ///
    /// Values longer than one block are split into chunks, one per block;
    /// the returned handles follow chunk order. Bytes of a block beyond the
    /// copied chunk are left as they were.
    pub fn acquire(&mut self, source: &[u8]) -> Result<Vec<BlockId>> {
        let needed = blocks_needed(source.len(), self.block_size);
        if self.free.len() < needed {
            return Err(Error::OutOfBlocks {
                needed,
                free: self.free.len(),
            });
        }

        let ids: Vec<BlockId> = self.free.drain(..needed).collect();
        for (id, chunk) in ids.iter().zip(source.chunks(self.block_size)) {
            self.blocks[id.index()][..chunk.len()].copy_from_slice(chunk);
        }
        for id in &ids {
            self.state[id.index()] = BlockState::Occupied;
        }

        trace!(
            block_size = self.block_size,
            len = source.len(),
            blocks = ids.len(),
            "Acquired blocks"
        );
        Ok(ids)
    }

    /// Return blocks to the free queue
    ///
    /// Fails without touching any block if a handle is unknown, already
    /// free, or listed twice. Contents are not cleared here.
    pub fn release(&mut self, ids: &[BlockId]) -> Result<()> {
        let mut seen = HashSet::with_capacity(ids.len());
        for &id in ids {
            if !self.is_occupied(id) || !seen.insert(id) {
                return Err(Error::BlockNotOccupied(format!(
                    "{} in {} byte class",
                    id, self.block_size
                )));
            }
        }

        for &id in ids {
            self.state[id.index()] = BlockState::Free;
            self.free.push_back(id);
        }

        trace!(block_size = self.block_size, blocks = ids.len(), "Released blocks");
        Ok(())
    }

    /// Zero the full byte range of the given blocks
    pub fn erase(&mut self, ids: &[BlockId]) -> Result<()> {
        if let Some(id) = ids.iter().find(|id| id.index() >= self.blocks.len()) {
            return Err(Error::BlockNotOccupied(format!(
                "{} in {} byte class",
                id, self.block_size
            )));
        }
        for id in ids {
            self.blocks[id.index()][..].zeroize();
        }
        Ok(())
    }

    /// Reassemble `len` bytes from `ids` into the front of `dest`
    ///
    /// Returns the number of bytes copied.
    pub fn read_into(&self, ids: &[BlockId], len: usize, dest: &mut [u8]) -> Result<usize> {
        if dest.len() < len {
            return Err(Error::BufferTooSmall {
                needed: len,
                available: dest.len(),
            });
        }

        let mut copied = 0;
        for &id in ids {
            if copied == len {
                break;
            }
            let block = self.block(id).ok_or_else(|| {
                Error::BlockNotOccupied(format!("{} in {} byte class", id, self.block_size))
            })?;
            let n = (len - copied).min(self.block_size);
            dest[copied..copied + n].copy_from_slice(&block[..n]);
            copied += n;
        }
        Ok(copied)
    }
}

impl Drop for SizeClass {
    fn drop(&mut self) {
        for mut block in self.blocks.drain(..) {
            block[..].zeroize();
            self.system.release(block);
        }
    }
}

impl fmt::Debug for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SizeClass")
            .field("block_size", &self.block_size)
            .field("capacity", &self.capacity())
            .field("free", &self.free_count())
            .finish_non_exhaustive()
    }
}
