//! One generation of the chained hash table

use super::entry::Entry;

/// A chained key with its digest and metadata
#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) digest: u32,
    pub(crate) key: Box<[u8]>,
    pub(crate) entry: Entry,
}

impl Node {
    #[inline]
    fn matches(&self, digest: u32, key: &[u8]) -> bool {
        self.digest == digest && &*self.key == key
    }
}

/// Power-of-two array of buckets, each a short chain of nodes
#[derive(Debug)]
pub(crate) struct Table {
    buckets: Vec<Vec<Node>>,
    bits: u8,
    len: usize,
}

impl Table {
    pub(crate) fn with_bits(bits: u8) -> Self {
        let mut buckets = Vec::new();
        buckets.resize_with(1usize << bits, Vec::new);
        Self {
            buckets,
            bits,
            len: 0,
        }
    }

    pub(crate) fn bits(&self) -> u8 {
        self.bits
    }

    pub(crate) fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn slot(&self, digest: u32) -> usize {
        digest as usize & (self.buckets.len() - 1)
    }

    pub(crate) fn bucket(&self, slot: usize) -> &[Node] {
        &self.buckets[slot]
    }

    pub(crate) fn get(&self, digest: u32, key: &[u8]) -> Option<&Entry> {
        self.buckets[self.slot(digest)]
            .iter()
            .find(|node| node.matches(digest, key))
            .map(|node| &node.entry)
    }

    /// Overwrite the entry for `key` or chain a new node; returns the old entry
    pub(crate) fn upsert(&mut self, digest: u32, key: &[u8], entry: Entry) -> Option<Entry> {
        let slot = self.slot(digest);
        let bucket = &mut self.buckets[slot];
        if let Some(node) = bucket.iter_mut().find(|node| node.matches(digest, key)) {
            return Some(std::mem::replace(&mut node.entry, entry));
        }

        bucket.push(Node {
            digest,
            key: Box::from(key),
            entry,
        });
        self.len += 1;
        None
    }

    /// Chain a node known to be absent from this table
    pub(crate) fn push(&mut self, node: Node) {
        let slot = self.slot(node.digest);
        self.buckets[slot].push(node);
        self.len += 1;
    }

    /// Unlink `key` when `pred` accepts its entry
    pub(crate) fn remove_if<F>(&mut self, digest: u32, key: &[u8], pred: F) -> Option<Entry>
    where
        F: FnOnce(&Entry) -> bool,
    {
        let slot = self.slot(digest);
        let bucket = &mut self.buckets[slot];
        let pos = bucket.iter().position(|node| node.matches(digest, key))?;
        if !pred(&bucket[pos].entry) {
            return None;
        }
        self.len -= 1;
        Some(bucket.swap_remove(pos).entry)
    }

    pub(crate) fn remove(&mut self, digest: u32, key: &[u8]) -> Option<Entry> {
        self.remove_if(digest, key, |_| true)
    }

    /// Take every node out of one bucket
    pub(crate) fn drain_bucket(&mut self, slot: usize) -> Vec<Node> {
        let nodes = std::mem::take(&mut self.buckets[slot]);
        self.len -= nodes.len();
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slab::SlotId;

    fn entry(expire_at: u64) -> Entry {
        Entry::new(5, 10, expire_at, SlotId::new(1, 0))
    }

    #[test]
    fn test_upsert_and_get() {
        let mut table = Table::with_bits(4);
        assert_eq!(table.bucket_count(), 16);

        assert_eq!(table.upsert(7, b"alpha", entry(1)), None);
        assert_eq!(table.upsert(7, b"alpha", entry(2)), Some(entry(1)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(7, b"alpha"), Some(&entry(2)));
        assert_eq!(table.get(7, b"bravo"), None);
    }

    #[test]
    fn test_same_digest_different_keys() {
        let mut table = Table::with_bits(2);
        table.upsert(3, b"alpha", entry(10));
        table.upsert(3, b"bravo", entry(20));

        assert_eq!(table.len(), 2);
        assert_eq!(table.get(3, b"alpha").map(|e| e.expire_at), Some(10));
        assert_eq!(table.get(3, b"bravo").map(|e| e.expire_at), Some(20));

        assert_eq!(table.remove(3, b"alpha"), Some(entry(10)));
        assert_eq!(table.get(3, b"bravo").map(|e| e.expire_at), Some(20));
    }

    #[test]
    fn test_remove_if() {
        let mut table = Table::with_bits(2);
        table.upsert(1, b"alpha", entry(50));

        assert_eq!(table.remove_if(1, b"alpha", |e| e.expire_at < 10), None);
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.remove_if(1, b"alpha", |e| e.expire_at < 100),
            Some(entry(50))
        );
        assert!(table.is_empty());
    }

    #[test]
    fn test_drain_bucket() {
        let mut table = Table::with_bits(2);
        table.upsert(1, b"alpha", entry(1));
        table.upsert(5, b"bravo", entry(1));
        table.upsert(2, b"charlie", entry(1));

        let drained = table.drain_bucket(1);
        assert_eq!(drained.len(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.bucket(1).is_empty());
    }
}
