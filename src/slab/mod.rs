//! Slab Allocator
//!
//! Keeps values in fixed-size blocks organized by size classes. The whole
//! byte budget is carved into blocks up front and split evenly between the
//! classes.
//!
//! # Architecture
//!
//! ```text
//! Allocator (remaining capacity)
//!   └─→ Pool
//!        ├─→ SizeClass(32B)   → Free: [3, 7, 12]
//!        ├─→ SizeClass(64B)   → Free: [1, 4]
//!        ├─→ SizeClass(128B)  → Free: [2, 9]
//!        └─→ SizeClass(256B)  → Free: []
//!
//! Entries
//!   └─→ key1 → Entry(class=2, blocks=[5], len=100)
//!   └─→ key2 → Entry(class=1, blocks=[0, 6, 8], len=180)
//! ```
//!
//! A value goes to the smallest class that fits it. When that class has
//! no free block left, the other classes are scanned in a circle and the
//! value may span several smaller blocks. Deleted blocks are zeroed before
//! they can be handed out again.

pub mod allocator;
pub mod backing;
pub mod pool;
pub mod shared;
pub mod size_class;
pub mod slot;

pub use allocator::{Allocator, AllocatorStats, SizeClassStats};
pub use backing::{Heap, SystemAllocator};
pub use pool::Pool;
pub use shared::SharedAllocator;
pub use size_class::{blocks_needed, SizeClass};
pub use slot::{BlockId, Entry};
