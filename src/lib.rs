// zspool - keyed slab memory pool
// Fixed-budget put/get/delete over size-classed blocks

#![warn(rust_2018_idioms)]

pub mod config;
pub mod shell;
pub mod slab;

// Re-exports for convenience
pub use crate::config::AllocatorConfig;
pub use crate::slab::{
    Allocator, BlockId, Entry, Heap, Pool, SharedAllocator, SizeClass, SystemAllocator,
};

/// zspool error types
pub mod error {
    use thiserror::Error;

    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum Error {
        #[error("Duplicate key: {0}")]
        DuplicateKey(String),

        #[error("Value of {size} bytes exceeds largest size class ({max} bytes)")]
        OversizedValue { size: usize, max: usize },

        #[error("Pool exhausted: no size class can hold {size} bytes")]
        PoolExhausted { size: usize },

        #[error("Capacity exceeded: {requested} bytes requested, {remaining} remaining")]
        CapacityExceeded { requested: usize, remaining: usize },

        #[error("Key not found: {0}")]
        KeyNotFound(String),

        #[error("Construction error: {0}")]
        Construction(String),

        #[error("Out of blocks: {needed} needed, {free} free")]
        OutOfBlocks { needed: usize, free: usize },

        #[error("Block not occupied: {0}")]
        BlockNotOccupied(String),

        #[error("Buffer too small: {needed} bytes needed, {available} available")]
        BufferTooSmall { needed: usize, available: usize },

        #[error("Value too short: declared {size} bytes, buffer holds {available}")]
        ValueTooShort { size: usize, available: usize },

        #[error("Invalid command: {0}")]
        InvalidCommand(String),

        #[error("Configuration error: {0}")]
        Config(String),

        #[error("I/O error: {0}")]
        Io(String),
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
