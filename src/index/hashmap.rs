//! Two-generation hash index with incremental rehashing

use super::entry::Entry;
use super::hasher::{KeyHasher, Xxh3Hasher};
use super::table::Table;
use std::sync::Arc;
use tracing::{debug, info};

/// Initial (and minimum) table size: 2^10 buckets
pub const INITIAL_BITS: u8 = 10;
const MAX_BITS: u8 = 30;

/// Grow once chains average more than this many nodes
const GROW_LOAD: usize = 6;
/// Shrink once chains average fewer than this many nodes
const SHRINK_LOAD: usize = 2;

/// Empty old-generation buckets skipped per migration step
const MIGRATE_SCAN: usize = 16;

/// Buckets a sample may visit per entry of budget
const SAMPLE_SCAN_FACTOR: usize = 8;
/// Buckets a sample may always visit, however small its budget
const SAMPLE_SCAN_FLOOR: usize = 1 << INITIAL_BITS;

/// An expired entry found by [`HashIndex::sample_expired`]
#[derive(Debug, Clone)]
pub struct ExpiredEntry {
    pub key: Box<[u8]>,
    pub digest: u32,
    pub entry: Entry,
}

/// Maps keys to slab locations
///
/// Keys are chained per bucket and compared in full, so two keys sharing a
/// digest never share an entry. When the average chain length crosses a
/// watermark a new generation is allocated one step larger (or smaller) and
/// the old generation is drained lazily: every write-locked operation first
/// moves the old bucket its key hashes to, plus one bucket at a cursor so the
/// old table empties out whether the workload writes, reads or only sweeps. The old table is dropped when its last node moves.
///
/// A key lives in exactly one generation at any time.
#[derive(Debug)]
pub struct HashIndex {
    hasher: Arc<dyn KeyHasher>,
    current: Table,
    previous: Option<Table>,
    cursor: usize,
}

impl Default for HashIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl HashIndex {
    /// Create an index using XXH3 digests
    pub fn new() -> Self {
        Self::with_hasher(Arc::new(Xxh3Hasher))
    }

    /// Create an index with a custom digest function
    pub fn with_hasher(hasher: Arc<dyn KeyHasher>) -> Self {
        Self {
            hasher,
            current: Table::with_bits(INITIAL_BITS),
            previous: None,
            cursor: 0,
        }
    }

    #[inline]
    pub fn digest(&self, key: &[u8]) -> u32 {
        self.hasher.digest(key)
    }

    /// Number of keys across both generations
    pub fn len(&self) -> usize {
        self.current.len() + self.previous.as_ref().map_or(0, Table::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while an old generation is still being drained
    pub fn is_rehashing(&self) -> bool {
        self.previous.is_some()
    }

    /// Bucket count of the current generation
    pub fn bucket_count(&self) -> usize {
        self.current.bucket_count()
    }

    /// Find the live entry for `key` without migrating anything
    pub fn lookup(&self, key: &[u8], digest: u32) -> Option<Entry> {
        self.previous
            .as_ref()
            .and_then(|old| old.get(digest, key))
            .or_else(|| self.current.get(digest, key))
            .copied()
            .filter(Entry::is_live)
    }

    /// Find the live entry for `key`, draining its old bucket first
    pub fn lookup_mut(&mut self, key: &[u8], digest: u32) -> Option<Entry> {
        self.migrate_bucket(digest);
        self.migrate_step();
        if !self.is_rehashing() {
            self.maybe_resize();
        }
        self.current
            .get(digest, key)
            .copied()
            .filter(Entry::is_live)
    }

    /// Insert or overwrite the entry for `key`; returns the replaced live entry
    pub fn upsert(&mut self, key: &[u8], digest: u32, entry: Entry) -> Option<Entry> {
        self.migrate_bucket(digest);
        self.migrate_step();
        let replaced = self.current.upsert(digest, key, entry);
        self.maybe_resize();
        replaced.filter(Entry::is_live)
    }

    /// Unlink `key`; returns its former entry so the caller can free the slot
    pub fn remove(&mut self, key: &[u8], digest: u32) -> Option<Entry> {
        self.migrate_bucket(digest);
        self.migrate_step();
        let removed = self.current.remove(digest, key);
        self.maybe_resize();
        removed.filter(Entry::is_live)
    }

    /// Unlink `key` only if its entry has expired by `now`
    pub fn remove_if_expired(&mut self, key: &[u8], digest: u32, now: u64) -> Option<Entry> {
        self.migrate_bucket(digest);
        self.migrate_step();
        let removed = self
            .current
            .remove_if(digest, key, |entry| entry.is_expired_at(now));
        self.maybe_resize();
        removed
    }

    /// Drain up to `steps` old-generation buckets without touching any key
    pub fn advance_rehash(&mut self, steps: usize) {
        for _ in 0..steps {
            if !self.is_rehashing() {
                break;
            }
            self.migrate_step();
        }
        self.maybe_resize();
    }

    /// Collect expired entries from a random window of buckets
    ///
    /// Inspects roughly `rate × len()` nodes starting at a random bucket,
    /// wrapping around once, and returns at most that many expired entries.
    /// The window is also capped in buckets, so a sparse table is never
    /// walked end to end for a small sample.
    pub fn sample_expired(&self, rate: f32, now: u64) -> Vec<ExpiredEntry> {
        self.sample_window(rate, now).0
    }

    /// Sample plus the number of buckets visited
    fn sample_window(&self, rate: f32, now: u64) -> (Vec<ExpiredEntry>, usize) {
        let live = self.len();
        if live == 0 || rate.is_nan() || rate <= 0.0 {
            return (Vec::new(), 0);
        }
        let budget = ((live as f64) * f64::from(rate.min(1.0))).ceil() as usize;

        let tables: Vec<&Table> = self
            .previous
            .iter()
            .chain(std::iter::once(&self.current))
            .collect();
        let total: usize = tables.iter().map(|t| t.bucket_count()).sum();
        let window = budget
            .saturating_mul(SAMPLE_SCAN_FACTOR)
            .max(SAMPLE_SCAN_FLOOR)
            .min(total);
        let start = fastrand::usize(..total);

        let mut inspected = 0;
        let mut scanned = 0;
        let mut expired = Vec::new();
        while scanned < window && inspected < budget {
            let mut pos = (start + scanned) % total;
            scanned += 1;
            let mut table = tables[0];
            for t in &tables {
                if pos < t.bucket_count() {
                    table = t;
                    break;
                }
                pos -= t.bucket_count();
            }

            for node in table.bucket(pos) {
                inspected += 1;
                if node.entry.is_expired_at(now) && expired.len() < budget {
                    expired.push(ExpiredEntry {
                        key: node.key.clone(),
                        digest: node.digest,
                        entry: node.entry,
                    });
                }
            }
        }

        debug!(
            live,
            budget,
            scanned,
            inspected,
            expired = expired.len(),
            "Sampled index for expired entries"
        );
        (expired, scanned)
    }

    /// Move the old bucket `digest` maps to into the current generation
    fn migrate_bucket(&mut self, digest: u32) {
        let Some(old) = self.previous.as_mut() else {
            return;
        };
        let slot = old.slot(digest);
        for node in old.drain_bucket(slot) {
            self.current.push(node);
        }
        self.finish_rehash();
    }

    /// Drain the next non-empty old bucket at the cursor
    fn migrate_step(&mut self) {
        let Some(old) = self.previous.as_mut() else {
            return;
        };
        let mut scanned = 0;
        while self.cursor < old.bucket_count() && scanned < MIGRATE_SCAN {
            let slot = self.cursor;
            if old.bucket(slot).is_empty() {
                self.cursor += 1;
                scanned += 1;
                continue;
            }
            for node in old.drain_bucket(slot) {
                self.current.push(node);
            }
            self.cursor += 1;
            break;
        }
        self.finish_rehash();
    }

    fn finish_rehash(&mut self) {
        if self.previous.as_ref().is_some_and(Table::is_empty) {
            self.previous = None;
            self.cursor = 0;
            info!(
                buckets = self.current.bucket_count(),
                entries = self.current.len(),
                "Incremental rehash complete"
            );
        }
    }

    /// Start a new generation when the load leaves the watermarks
    fn maybe_resize(&mut self) {
        if self.previous.is_some() {
            return;
        }

        let buckets = self.current.bucket_count();
        let len = self.current.len();
        let bits = self.current.bits();
        let target = if len > buckets * GROW_LOAD && bits < MAX_BITS {
            bits + 1
        } else if len < buckets * SHRINK_LOAD && bits > INITIAL_BITS {
            bits - 1
        } else {
            return;
        };

        let old = std::mem::replace(&mut self.current, Table::with_bits(target));
        info!(
            from_buckets = buckets,
            to_buckets = self.current.bucket_count(),
            entries = len,
            "Starting incremental rehash"
        );
        if !old.is_empty() {
            self.previous = Some(old);
            self.cursor = 0;
        }
    }
}
