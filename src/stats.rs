//! Cache counters and statistics snapshots

use crate::slab::SlabStats;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters, updated lock-free on the hot path
#[derive(Debug, Default)]
pub struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    expired_reads: AtomicU64,
    loads: AtomicU64,
    load_timeouts: AtomicU64,
    load_failures: AtomicU64,
    rejected_writes: AtomicU64,
    evictions: AtomicU64,
    sweeps: AtomicU64,
}

impl StatsCounters {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// A read found an entry past its expiry
    pub fn record_expired_read(&self) {
        self.expired_reads.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_timeout(&self) {
        self.load_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_failure(&self) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_write(&self) {
        self.rejected_writes.fetch_add(1, Ordering::Relaxed);
    }

    /// An expired entry was reclaimed outside a sweep
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sweep(&self, evicted: u64) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
    }

    /// Snapshot the counters alongside current occupancy
    pub fn snapshot(&self, entries: u32, size: u32, capacity: u32, slab: SlabStats) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
            expired_reads: self.expired_reads.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_timeouts: self.load_timeouts.load(Ordering::Relaxed),
            load_failures: self.load_failures.load(Ordering::Relaxed),
            rejected_writes: self.rejected_writes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            entries,
            size,
            capacity,
            slab,
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub expired_reads: u64,
    pub loads: u64,
    pub load_timeouts: u64,
    pub load_failures: u64,
    pub rejected_writes: u64,
    pub evictions: u64,
    pub sweeps: u64,
    pub entries: u32,
    pub size: u32,
    pub capacity: u32,
    pub slab: SlabStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        let counters = StatsCounters::default();
        let stats = counters.snapshot(0, 0, 100, SlabStats::default());
        assert_eq!(stats.hit_rate, 0.0);

        counters.record_hit();
        counters.record_hit();
        counters.record_hit();
        counters.record_expired_read();
        counters.record_sweep(7);

        let stats = counters.snapshot(3, 30, 100, SlabStats::default());
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.expired_reads, 1);
        assert_eq!(stats.hit_rate, 0.75);
        assert_eq!(stats.evictions, 7);
        assert_eq!(stats.sweeps, 1);
    }
}
