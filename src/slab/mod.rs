//! Slab Store
//!
//! Owns every payload byte in the cache. A payload is the key followed by the
//! value, packed into one buffer. Payloads are grouped by length into size
//! classes of 8 bytes each.
//!
//! # Architecture
//!
//! ```text
//! SlabAllocator
//!   ├─→ SizeClass(0..8B)    → Slots: [buf, buf, _, buf]  Free: [2]
//!   ├─→ SizeClass(8..16B)   → Slots: [buf, _, _]         Free: [1, 2]
//!   ├─→ SizeClass(16..24B)  → Slots: [buf]               Free: []
//!   └─→ ...
//!
//! HashIndex
//!   └─→ key1 → SlotId(class=1, index=0)
//!   └─→ key2 → SlotId(class=2, index=0)
//! ```
//!
//! Each size class keeps a LIFO stack of free slots. The hash index is the
//! only source of valid handles; the slab never decides whether data is live.

pub mod allocator;
pub mod size_class;
pub mod slot;

pub use allocator::{SizeClassStats, SlabAllocator, SlabStats};
pub use size_class::{class_capacity, class_for, SizeClass, CLASS_SHIFT};
pub use slot::SlotId;
