//! Size class management for the slab store

use crate::error::{Error, Result};

/// Payload lengths are bucketed by this shift: class = len >> CLASS_SHIFT
pub const CLASS_SHIFT: u32 = 3;

/// Size class for a payload of `len` bytes
pub fn class_for(len: usize) -> usize {
    len >> CLASS_SHIFT
}

/// Largest payload (exclusive upper bound) a class holds without reallocating
pub fn class_capacity(class: usize) -> usize {
    (class + 1) << CLASS_SHIFT
}

/// A size class owns the buffers for one length bucket
///
/// Freed slots go onto a LIFO stack and are handed out again before the slot
/// array grows. A freed buffer is released, the slot itself is kept.
#[derive(Debug, Default)]
pub struct SizeClass {
    /// Index of this size class
    pub index: u16,
    /// Slot buffers; an empty buffer is a free slot
    slots: Vec<Vec<u8>>,
    /// Free slot indices, most recently freed last
    free_slots: Vec<u32>,
    /// Bytes reserved by live buffers
    reserved: usize,
}

impl SizeClass {
    /// Create a new, empty size class
    pub fn new(index: u16) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    /// Store `data` in a free or new slot and return the slot index
    pub fn allocate(&mut self, data: &[u8]) -> Result<u32> {
        let capacity = class_capacity(self.index as usize);
        let mut buf = Vec::with_capacity(capacity);
        buf.extend_from_slice(data);
        self.reserved += buf.capacity();

        if let Some(slot) = self.free_slots.pop() {
            self.slots[slot as usize] = buf;
            return Ok(slot);
        }

        let slot = u32::try_from(self.slots.len()).map_err(|_| {
            Error::Internal(format!("size class {} ran out of slot indices", self.index))
        })?;
        self.slots.push(buf);
        Ok(slot)
    }

    /// Overwrite a live slot, reusing its buffer
    pub fn replace(&mut self, slot: u32, data: &[u8]) -> Result<()> {
        let buf = self.live_slot_mut(slot)?;
        let before = buf.capacity();
        buf.clear();
        buf.extend_from_slice(data);
        let after = buf.capacity();
        self.reserved = self.reserved + after - before;
        Ok(())
    }

    /// Borrow the payload of a live slot
    pub fn get(&self, slot: u32) -> Option<&[u8]> {
        self.slots
            .get(slot as usize)
            .filter(|buf| !buf.is_empty())
            .map(Vec::as_slice)
    }

    /// Release a slot's buffer and push the slot onto the free stack
    pub fn free(&mut self, slot: u32) -> Result<()> {
        let buf = std::mem::take(self.live_slot_mut(slot)?);
        self.reserved -= buf.capacity();
        self.free_slots.push(slot);
        Ok(())
    }

    fn live_slot_mut(&mut self, slot: u32) -> Result<&mut Vec<u8>> {
        let index = self.index;
        let total = self.slots.len();
        match self.slots.get_mut(slot as usize) {
            Some(buf) if !buf.is_empty() => Ok(buf),
            Some(_) => Err(Error::Internal(format!(
                "slot {} of class {} is not allocated",
                slot, index
            ))),
            None => Err(Error::Internal(format!(
                "slot {} is outside class {} ({} slots)",
                slot, index, total
            ))),
        }
    }

    /// Number of free slots
    pub fn free_count(&self) -> usize {
        self.free_slots.len()
    }

    /// Total number of slots (live and free)
    pub fn total_slots(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots holding a payload
    pub fn allocated_slots(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    /// Bytes held by live buffers
    pub fn reserved_bytes(&self) -> usize {
        self.reserved
    }
}
