//! Block handles for size classes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle of one block inside a size class
///
/// Handles are indices into the class's block table; they are only
/// meaningful together with the class that issued them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockId(u32);

impl BlockId {
    /// Create a block handle from a table index
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    /// Position in the owning class's block table
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Block({})", self.0)
    }
}

/// Occupancy of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockState {
    Free,
    Occupied,
}

/// Record of one live key
///
/// `blocks` is in chunk order; reading them back in this order
/// reassembles the value. `len` is the logical length, excluding the
/// padding left in the final block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub class_index: usize,
    pub blocks: Vec<BlockId>,
    pub len: usize,
}

impl Entry {
    pub fn new(class_index: usize, blocks: Vec<BlockId>, len: usize) -> Self {
        Self {
            class_index,
            blocks,
            len,
        }
    }

    /// Bytes of the class consumed by this entry, padding included
    pub fn occupied_bytes(&self, block_size: usize) -> usize {
        self.blocks.len() * block_size
    }
}
