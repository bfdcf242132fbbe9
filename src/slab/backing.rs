//! Backing memory for size classes
//!
//! Blocks are carved once when a size class is built and handed back when it
//! is dropped. The source of those bytes is abstracted behind
//! [`SystemAllocator`] so the pool never depends on a host-specific page API.

use crate::error::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

/// Generic "allocate N bytes / release N bytes" interface
pub trait SystemAllocator: Send + Sync {
    /// Reserve a zero-filled block of exactly `len` bytes
    fn allocate(&self, len: usize) -> Result<Box<[u8]>>;

    /// Return a block obtained from [`SystemAllocator::allocate`]
    fn release(&self, block: Box<[u8]>);
}

/// Default backing store on top of the global allocator
///
/// Reservation is fallible: an impossible request surfaces as a
/// construction error instead of aborting the process.
#[derive(Debug, Default)]
pub struct Heap {
    reserved: AtomicUsize,
    released: AtomicUsize,
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes handed out so far
    pub fn reserved_bytes(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    /// Total bytes given back so far
    pub fn released_bytes(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }

    /// Bytes currently held by size classes
    pub fn outstanding_bytes(&self) -> usize {
        // Released first: it never runs ahead of reserved
        let released = self.released_bytes();
        self.reserved_bytes().saturating_sub(released)
    }
}

impl SystemAllocator for Heap {
    fn allocate(&self, len: usize) -> Result<Box<[u8]>> {
        let mut buf: Vec<u8> = Vec::new();
        buf.try_reserve_exact(len).map_err(|e| {
            Error::Construction(format!("Failed to reserve {} bytes: {}", len, e))
        })?;
        buf.resize(len, 0);
        self.reserved.fetch_add(len, Ordering::Relaxed);
        trace!(len, "Reserved block");
        Ok(buf.into_boxed_slice())
    }

    fn release(&self, block: Box<[u8]>) {
        self.released.fetch_add(block.len(), Ordering::Relaxed);
        trace!(len = block.len(), "Released block");
    }
}
