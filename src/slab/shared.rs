//! Thread-safe handle around an allocator
//!
//! [`Allocator`] does no internal locking. `SharedAllocator` serialises
//! every call through one mutex so a single pool can be used from several
//! threads.

use super::allocator::{Allocator, AllocatorStats};
use crate::config::AllocatorConfig;
use crate::error::Result;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Cloneable, lock-protected allocator handle
#[derive(Debug, Clone)]
pub struct SharedAllocator {
    inner: Arc<Mutex<Allocator>>,
}

impl SharedAllocator {
    pub fn new(allocator: Allocator) -> Self {
        Self {
            inner: Arc::new(Mutex::new(allocator)),
        }
    }

    pub fn with_config(config: &AllocatorConfig) -> Result<Self> {
        Ok(Self::new(Allocator::with_config(config)?))
    }

    pub fn put(&self, key: &str, size: usize, value: &[u8]) -> Result<()> {
        self.inner.lock().put(key, size, value)
    }

    pub fn get(&self, key: &str, dest: &mut [u8]) -> Result<usize> {
        self.inner.lock().get(key, dest)
    }

    pub fn get_vec(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.lock().get_vec(key)
    }

    pub fn del(&self, key: &str) -> Result<()> {
        self.inner.lock().del(key)
    }

    pub fn remaining_capacity(&self) -> usize {
        self.inner.lock().remaining_capacity()
    }

    pub fn stats(&self) -> AllocatorStats {
        self.inner.lock().stats()
    }

    /// Hold the lock across several operations
    pub fn lock(&self) -> MutexGuard<'_, Allocator> {
        self.inner.lock()
    }
}
