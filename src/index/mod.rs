//! Hash Index
//!
//! Maps keys to [`Entry`] metadata: where the payload lives in the slab store,
//! how long it is, and when it expires.
//!
//! ```text
//! HashIndex
//!   ├─→ previous: Table(2^10)   ← drained bucket by bucket, dropped when empty
//!   └─→ current:  Table(2^11)
//!         bucket 0 → [key:a → Entry] → [key:q → Entry]
//!         bucket 1 → []
//!         bucket 2 → [key:c → Entry]
//! ```
//!
//! The index holds no lock of its own; the cache wraps it in a `RwLock` so
//! that a lookup and the slab read it guards happen under one critical section.

pub mod entry;
pub mod hasher;
pub mod hashmap;
mod table;

pub use entry::Entry;
pub use hasher::{KeyHasher, Xxh3Hasher};
pub use hashmap::{ExpiredEntry, HashIndex, INITIAL_BITS};
