//! Entry metadata kept by the hash index

use crate::slab::SlotId;

/// Where a cached payload lives and when it stops being valid
///
/// `expire_at == 0` marks an entry that is not live; such an entry is never
/// reported as a hit.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    /// Length of the key prefix inside the payload
    pub key_len: u8,
    /// Key + value length
    pub total_len: u16,
    /// Absolute expiry in nanoseconds since the Unix epoch
    pub expire_at: u64,
    /// Payload location in the slab store
    pub location: SlotId,
}

impl Entry {
    pub fn new(key_len: u8, total_len: u16, expire_at: u64, location: SlotId) -> Self {
        Self {
            key_len,
            total_len,
            expire_at,
            location,
        }
    }

    pub fn is_live(&self) -> bool {
        self.expire_at != 0
    }

    /// Live but past its expiry at `now`
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.is_live() && self.expire_at <= now
    }

    pub fn value_len(&self) -> usize {
        self.total_len as usize - self.key_len as usize
    }
}
