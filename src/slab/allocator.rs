//! Slab allocator implementation

use super::size_class::{class_for, SizeClass};
use super::slot::SlotId;
use crate::error::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

/// In-memory slab allocator
///
/// Holds one [`SizeClass`] per 8-byte length bucket up to the largest payload
/// it was built for. Every class sits behind its own lock, so callers only
/// contend with others touching the same class.
pub struct SlabAllocator {
    size_classes: Vec<Mutex<SizeClass>>,
    max_payload: usize,
}

impl SlabAllocator {
    /// Create an allocator for payloads up to `max_payload` bytes
    pub fn new(max_payload: usize) -> Self {
        let classes = class_for(max_payload) + 1;
        let size_classes = (0..classes)
            .map(|index| Mutex::new(SizeClass::new(index as u16)))
            .collect();

        info!(
            size_classes = classes,
            max_payload, "Initializing slab allocator"
        );

        Self {
            size_classes,
            max_payload,
        }
    }

    /// Largest payload this allocator accepts
    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    fn class(&self, len: usize) -> Result<&Mutex<SizeClass>> {
        if len == 0 || len > self.max_payload {
            return Err(Error::Internal(format!(
                "payload of {} bytes outside slab range 1..={}",
                len, self.max_payload
            )));
        }
        Ok(&self.size_classes[class_for(len)])
    }

    fn class_of(&self, slot_id: SlotId) -> Result<&Mutex<SizeClass>> {
        self.size_classes
            .get(slot_id.class_index())
            .ok_or_else(|| Error::Internal(format!("invalid size class in {}", slot_id)))
    }

    /// Store `data` and return its handle
    pub fn allocate(&self, data: &[u8]) -> Result<SlotId> {
        let class = class_for(data.len());
        let index = self.class(data.len())?.lock().allocate(data)?;

        let slot_id = SlotId::new(class as u16, index);
        debug!(len = data.len(), slot = %slot_id, "Allocated slot");
        Ok(slot_id)
    }

    /// Overwrite the payload at `slot_id` in place
    ///
    /// `data` must fall into the same size class as the slot; otherwise the
    /// caller has to free the old slot and allocate a new one.
    pub fn replace(&self, slot_id: SlotId, data: &[u8]) -> Result<SlotId> {
        if class_for(data.len()) != slot_id.class_index() {
            return Err(Error::Internal(format!(
                "payload of {} bytes does not belong to {}",
                data.len(),
                slot_id
            )));
        }

        self.class(data.len())?
            .lock()
            .replace(slot_id.index, data)?;
        debug!(len = data.len(), slot = %slot_id, "Replaced slot");
        Ok(slot_id)
    }

    /// Copy out the whole payload at `slot_id`
    pub fn get(&self, slot_id: SlotId) -> Result<Bytes> {
        self.read_from(slot_id, 0)
    }

    /// Copy out the payload at `slot_id`, skipping its first `offset` bytes
    pub fn read_from(&self, slot_id: SlotId, offset: usize) -> Result<Bytes> {
        let sc = self.class_of(slot_id)?.lock();
        let data = sc
            .get(slot_id.index)
            .ok_or_else(|| Error::Internal(format!("read of unallocated {}", slot_id)))?;
        let tail = data.get(offset..).ok_or_else(|| {
            Error::Internal(format!(
                "offset {} past end of {} ({} bytes)",
                offset,
                slot_id,
                data.len()
            ))
        })?;
        Ok(Bytes::copy_from_slice(tail))
    }

    /// Free a previously allocated slot
    pub fn free(&self, slot_id: SlotId) -> Result<()> {
        self.class_of(slot_id)?.lock().free(slot_id.index)?;
        debug!(slot = %slot_id, "Freed slot");
        Ok(())
    }

    /// Get statistics about the allocator
    ///
    /// Classes that never held a payload are left out.
    pub fn stats(&self) -> SlabStats {
        let mut stats = SlabStats::default();

        for sc in &self.size_classes {
            let sc = sc.lock();
            if sc.total_slots() == 0 {
                continue;
            }
            let class_stats = SizeClassStats {
                index: sc.index as usize,
                total_slots: sc.total_slots() as u64,
                free_slots: sc.free_count() as u64,
                allocated_slots: sc.allocated_slots() as u64,
                reserved_bytes: sc.reserved_bytes() as u64,
            };
            stats.total_reserved += class_stats.reserved_bytes;
            stats.size_classes.push(class_stats);
        }

        stats
    }
}

/// Statistics for the slab allocator
#[derive(Debug, Default, Clone, Serialize)]
pub struct SlabStats {
    pub size_classes: Vec<SizeClassStats>,
    pub total_reserved: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SizeClassStats {
    pub index: usize,
    pub total_slots: u64,
    pub free_slots: u64,
    pub allocated_slots: u64,
    pub reserved_bytes: u64,
}
