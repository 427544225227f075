//! Key digests

use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Maps a key to the 32-bit digest used to address the index
pub trait KeyHasher: Send + Sync + fmt::Debug + 'static {
    fn digest(&self, key: &[u8]) -> u32;
}

/// Upper half of the 64-bit XXH3 hash
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh3Hasher;

impl KeyHasher for Xxh3Hasher {
    #[inline]
    fn digest(&self, key: &[u8]) -> u32 {
        (xxh3_64(key) >> 32) as u32
    }
}
