//! Slot handles for the slab store

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque location of a stored payload
///
/// A handle is only meaningful while the hash index references it. Once the
/// slot is freed the same handle may be handed out again for unrelated data.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SlotId {
    /// Size class index (payload length >> 3)
    pub size_class: u16,
    /// Slot index within the size class
    pub index: u32,
}

impl SlotId {
    /// Create a new slot ID
    pub fn new(size_class: u16, index: u32) -> Self {
        Self { size_class, index }
    }

    /// Position of the owning size class in the allocator
    pub fn class_index(&self) -> usize {
        self.size_class as usize
    }

    /// Position of the slot inside its size class
    pub fn slot_index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Slot(class={}, index={})", self.size_class, self.index)
    }
}
