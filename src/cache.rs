//! Cache facade
//!
//! [`Cache`] ties the slab store, the hash index, the stampede controller
//! and the eviction engine together and owns size/count accounting.
//!
//! ```text
//! set(key, value, ttl)
//!   → check bounds → index write lock
//!       → lookup → capacity check → slab replace | allocate
//!       → index upsert → size/count
//!
//! get(key)
//!   → index read lock → lookup → slab read (key prefix skipped)
//!       └─ expired → NotFound + background removal
//! ```
//!
//! The index lock is held across the slab access it guards, so a slot is
//! never read after it was freed and operations on one key are linearizable.

use crate::clock;
use crate::config::{limits, CacheConfig};
use crate::error::{Error, LoaderError, Result};
use crate::eviction::{self, Janitor, SweepGate, SweepReport, SweepTrigger};
use crate::index::{Entry, HashIndex, KeyHasher, Xxh3Hasher};
use crate::slab::{class_for, SlabAllocator};
use crate::stampede::{BreakdownStrategy, FlightGroup, Strategies};
use crate::stats::{CacheStats, StatsCounters};
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, info, instrument, warn};

/// Result of looking a key up under the index lock
enum Lookup {
    Hit(Bytes),
    Expired,
    Missing,
}

/// Shared state behind every [`Cache`] handle
pub(crate) struct CacheInner {
    config: RwLock<Arc<CacheConfig>>,
    strategies: RwLock<Strategies>,
    pub(crate) index: RwLock<HashIndex>,
    slab: SlabAllocator,
    size: AtomicU32,
    count: AtomicU32,
    flights: FlightGroup,
    pub(crate) stats: StatsCounters,
    pub(crate) sweeper: SweepGate,
    janitor: Mutex<Option<Janitor>>,
    runtime: Handle,
}

impl CacheInner {
    pub(crate) fn config(&self) -> Arc<CacheConfig> {
        Arc::clone(&self.config.read())
    }

    /// Write `key`/`value` through the index and slab store
    ///
    /// Bounds on the key, payload and expiration are the caller's job.
    fn store(
        self: &Arc<Self>,
        key: &[u8],
        value: &[u8],
        ttl: Duration,
        config: &CacheConfig,
    ) -> Result<()> {
        let total = key.len() + value.len();
        let mut payload = Vec::with_capacity(total);
        payload.extend_from_slice(key);
        payload.extend_from_slice(value);
        let requested = total as u32;
        let expire_at = clock::expire_at(ttl);

        let mut index = self.index.write();
        let digest = index.digest(key);
        let existing = index.lookup_mut(key, digest);

        let current = self.size.load(Ordering::Acquire);
        let replaced = existing.map_or(0, |e| u64::from(e.total_len));
        let projected = u64::from(current) - replaced + u64::from(requested);
        let limit = config.hard_limit();
        if projected > u64::from(limit) {
            drop(index);
            self.stats.record_rejected_write();
            warn!(
                key_len = key.len(),
                requested,
                current,
                limit,
                "Write rejected, buffer ceiling reached"
            );
            self.schedule_sweep(SweepTrigger::Pressure);
            return Err(Error::CapacityExceeded {
                requested,
                current,
                limit,
            });
        }

        let (location, stale) = match existing {
            Some(old) if old.location.class_index() == class_for(total) => {
                (self.slab.replace(old.location, &payload)?, None)
            }
            Some(old) => (self.slab.allocate(&payload)?, Some(old.location)),
            None => (self.slab.allocate(&payload)?, None),
        };

        let entry = Entry::new(key.len() as u8, total as u16, expire_at, location);
        index.upsert(key, digest, entry);
        self.size.store(projected as u32, Ordering::Release);
        if existing.is_none() {
            self.count.fetch_add(1, Ordering::AcqRel);
        }
        if let Some(stale) = stale {
            self.slab.free(stale)?;
        }
        drop(index);

        debug!(
            key_len = key.len(),
            value_len = value.len(),
            slot = %location,
            overwrite = existing.is_some(),
            "Stored entry"
        );

        if projected > u64::from(config.soft_limit()) {
            self.schedule_sweep(SweepTrigger::Pressure);
        }
        Ok(())
    }

    /// Undo the accounting for an unlinked entry and free its slot
    ///
    /// Must be called with the index write lock held.
    pub(crate) fn release(&self, entry: &Entry) -> Result<()> {
        self.size
            .fetch_sub(u32::from(entry.total_len), Ordering::AcqRel);
        self.count.fetch_sub(1, Ordering::AcqRel);
        self.slab.free(entry.location)
    }

    fn resolve(&self, entry: Option<Entry>, now: u64) -> Result<Lookup> {
        match entry {
            None => Ok(Lookup::Missing),
            Some(entry) if entry.is_expired_at(now) => Ok(Lookup::Expired),
            Some(entry) => self
                .slab
                .read_from(entry.location, usize::from(entry.key_len))
                .map(Lookup::Hit),
        }
    }

    fn lookup(&self, key: &[u8], now: u64) -> Result<Lookup> {
        {
            let index = self.index.read();
            if !index.is_rehashing() {
                let digest = index.digest(key);
                return self.resolve(index.lookup(key, digest), now);
            }
        }

        // Reads help drain the old generation while a rehash is running
        let mut index = self.index.write();
        let digest = index.digest(key);
        let entry = index.lookup_mut(key, digest);
        self.resolve(entry, now)
    }

    fn read(self: &Arc<Self>, key: &[u8]) -> Result<Bytes> {
        match self.lookup(key, clock::now_nanos())? {
            Lookup::Hit(value) => {
                self.stats.record_hit();
                Ok(value)
            }
            Lookup::Expired => {
                self.stats.record_expired_read();
                self.schedule_removal(key);
                Err(Error::NotFound)
            }
            Lookup::Missing => {
                self.stats.record_miss();
                Err(Error::NotFound)
            }
        }
    }

    fn schedule_removal(self: &Arc<Self>, key: &[u8]) {
        let inner = Arc::clone(self);
        let key = key.to_vec();
        self.runtime.spawn(async move {
            inner.remove_expired(&key);
        });
    }

    fn remove_expired(&self, key: &[u8]) {
        let now = clock::now_nanos();
        let mut index = self.index.write();
        let digest = index.digest(key);
        let Some(entry) = index.remove_if_expired(key, digest, now) else {
            return;
        };
        match self.release(&entry) {
            Ok(()) => {
                self.stats.record_eviction();
                debug!(key_len = key.len(), slot = %entry.location, "Removed expired entry");
            }
            Err(e) => warn!(error = %e, key_len = key.len(), "Failed to free expired entry"),
        }
    }

    pub(crate) fn schedule_sweep(self: &Arc<Self>, trigger: SweepTrigger) {
        if self.sweeper.is_busy() {
            return;
        }
        let inner = Arc::clone(self);
        self.runtime.spawn_blocking(move || {
            eviction::sweep(&inner, 1.0, trigger);
        });
    }

    fn restart_janitor(self: &Arc<Self>, interval: Duration) {
        let mut janitor = self.janitor.lock();
        // Dropping the old janitor stops its task
        if let Some(old) = janitor.take() {
            debug!(
                interval_ms = old.interval().as_millis() as u64,
                "Stopping janitor"
            );
        }
        if !interval.is_zero() {
            *janitor = Some(Janitor::start(Arc::downgrade(self), interval, &self.runtime));
        }
    }

    /// Run the loader for `key` on its own task and write its result back
    fn load_and_store<F, Fut, E>(
        self: Arc<Self>,
        key: Bytes,
        ttl: Duration,
        loader: F,
    ) -> impl Future<Output = Result<Bytes>> + Send + 'static
    where
        F: FnOnce(Bytes) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        async move {
            // A load that finished just before this one was registered has
            // already written the value back
            if let Lookup::Hit(value) = self.lookup(&key, clock::now_nanos())? {
                return Ok(value);
            }

            let config = self.config();
            let timeout = config.data_load_time;
            self.stats.record_load();

            let mut task = self.runtime.spawn(loader(key.clone()));
            let loaded = match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(Ok(value))) => value,
                Ok(Ok(Err(e))) => {
                    self.stats.record_load_failure();
                    let source: Box<dyn std::error::Error + Send + Sync> = e.into();
                    let source: LoaderError = Arc::from(source);
                    warn!(key_len = key.len(), error = %source, "Loader failed");
                    return Err(Error::LoaderFailed {
                        key: String::from_utf8_lossy(&key).into_owned(),
                        source,
                    });
                }
                Ok(Err(e)) => {
                    self.stats.record_load_failure();
                    warn!(key_len = key.len(), error = %e, "Loader task failed");
                    return Err(Error::Internal(format!("loader task failed: {}", e)));
                }
                Err(_) => {
                    task.abort();
                    self.stats.record_load_timeout();
                    warn!(
                        key_len = key.len(),
                        timeout_ms = timeout.as_millis() as u64,
                        "Loader timed out"
                    );
                    return Err(Error::LoadTimeout {
                        key: String::from_utf8_lossy(&key).into_owned(),
                        timeout,
                    });
                }
            };

            config.check_data(key.len() + loaded.len())?;
            let strategies = self.strategies.read().clone();
            match strategies.write_back_expiration(&loaded, ttl, &config) {
                Some(expiration) => self.store(&key, &loaded, expiration, &config)?,
                None => debug!(key_len = key.len(), "Loaded value not cached"),
            }
            Ok(loaded)
        }
    }
}

/// Embedded key/value cache
///
/// Cheap to clone; all clones share the same storage. Must be created inside
/// a Tokio runtime, which runs the background sweeps and loaders.
#[derive(Clone)]
pub struct Cache {
    pub(crate) inner: Arc<CacheInner>,
}

impl Cache {
    /// Create a cache with XXH3 key digests
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::with_hasher(config, Arc::new(Xxh3Hasher))
    }

    /// Create a cache with the default configuration
    pub fn with_defaults() -> Result<Self> {
        Self::new(CacheConfig::default())
    }

    /// Create a cache with a custom key digest
    pub fn with_hasher(config: CacheConfig, hasher: Arc<dyn KeyHasher>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("Cache requires a Tokio runtime: {}", e)))?;

        let clear_interval = config.clear_interval;
        info!(
            max_buf_size = config.max_buf_size,
            hard_limit = config.hard_limit(),
            clear_interval_ms = clear_interval.as_millis() as u64,
            breakdown = ?config.breakdown,
            "Creating cache"
        );

        let inner = Arc::new(CacheInner {
            config: RwLock::new(Arc::new(config)),
            strategies: RwLock::new(Strategies::default()),
            index: RwLock::new(HashIndex::with_hasher(hasher)),
            slab: SlabAllocator::new(limits::MAX_DATA_SIZE),
            size: AtomicU32::new(0),
            count: AtomicU32::new(0),
            flights: FlightGroup::new(),
            stats: StatsCounters::default(),
            sweeper: SweepGate::default(),
            janitor: Mutex::new(None),
            runtime,
        });
        inner.restart_janitor(clear_interval);

        Ok(Self { inner })
    }

    /// Store `value` under `key` for `ttl`
    pub fn set(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<()> {
        let config = self.inner.config();
        config.check_key(key.len())?;
        config.check_data(key.len() + value.len())?;
        config.check_expiration(ttl)?;
        self.inner.store(key, value, ttl, &config)
    }

    /// Store `value` under `key` for the default expiration
    pub fn set_default(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let ttl = self.inner.config().default_expiration;
        self.set(key, value, ttl)
    }

    /// Fetch the live value for `key`
    pub fn get(&self, key: &[u8]) -> Result<Bytes> {
        self.inner.config().check_key(key.len())?;
        self.inner.read(key)
    }

    /// Fetch the value for `key`, loading and caching it on a miss
    ///
    /// The loader receives the key and runs on its own task. It must finish
    /// within `data_load_time` or every caller waiting on it gets
    /// [`Error::LoadTimeout`]. With [`BreakdownStrategy::SingleFlight`]
    /// concurrent misses for the same key share one loader call.
    #[instrument(skip(self, key, loader), fields(key_len = key.len()))]
    pub async fn get_or_load<F, Fut, E>(&self, key: &[u8], ttl: Duration, loader: F) -> Result<Bytes>
    where
        F: FnOnce(Bytes) -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>> + Send + 'static,
    {
        let config = self.inner.config();
        config.check_key(key.len())?;
        config.check_expiration(ttl)?;

        match self.inner.read(key) {
            Err(Error::NotFound) => {}
            found => return found,
        }

        let inner = Arc::clone(&self.inner);
        let owned = Bytes::copy_from_slice(key);
        let load = move || inner.load_and_store(owned, ttl, loader);

        match config.breakdown {
            BreakdownStrategy::SingleFlight => {
                let (outcome, leader) = self
                    .inner
                    .flights
                    .work(&self.inner.runtime, key, load)
                    .await;
                if !leader {
                    debug!("Shared in-flight load");
                }
                outcome
            }
            BreakdownStrategy::Disabled => load().await,
        }
    }

    /// Return the cached value for `key`, or store `value` and return it
    pub async fn get_set(&self, key: &[u8], value: &[u8], ttl: Duration) -> Result<Bytes> {
        let value = Bytes::copy_from_slice(value);
        self.get_or_load(key, ttl, move |_| async move { Ok::<_, Error>(value) })
            .await
    }

    /// Remove `key`
    ///
    /// Returns [`Error::NotFound`] if the key is absent or already expired;
    /// an expired entry is still reclaimed.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.config().check_key(key.len())?;

        let now = clock::now_nanos();
        let mut index = self.inner.index.write();
        let digest = index.digest(key);
        let entry = index.remove(key, digest).ok_or(Error::NotFound)?;
        self.inner.release(&entry)?;
        drop(index);

        debug!(key_len = key.len(), slot = %entry.location, "Deleted entry");
        if entry.is_expired_at(now) {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    /// Reclaim every expired entry now
    pub fn delete_expired(&self) -> SweepReport {
        eviction::sweep(&self.inner, 1.0, SweepTrigger::Manual).unwrap_or_default()
    }

    /// Bytes of key + value currently stored
    pub fn size(&self) -> u32 {
        self.inner.size.load(Ordering::Acquire)
    }

    /// Number of entries currently stored, expired ones included until reclaimed
    pub fn len(&self) -> u32 {
        self.inner.count.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the active configuration
    pub fn options(&self) -> CacheConfig {
        CacheConfig::clone(&self.inner.config())
    }

    /// Replace the configuration
    ///
    /// Stored entries are kept as they are; the new bounds apply to later
    /// calls. The janitor is restarted when the sweep interval changes.
    pub fn configure(&self, config: CacheConfig) -> Result<()> {
        config.validate()?;

        let interval = config.clear_interval;
        let previous = std::mem::replace(&mut *self.inner.config.write(), Arc::new(config));
        if previous.clear_interval != interval {
            self.inner.restart_janitor(interval);
        }

        info!(
            clear_interval_ms = interval.as_millis() as u64,
            "Cache reconfigured"
        );
        Ok(())
    }

    /// Replace the avalanche and penetration strategies
    pub fn configure_strategies(&self, strategies: Strategies) {
        debug!(?strategies, "Strategies replaced");
        *self.inner.strategies.write() = strategies;
    }

    /// Strategies currently applied to loaded values
    pub fn strategies(&self) -> Strategies {
        self.inner.strategies.read().clone()
    }

    /// Join key parts with the configured delimiter
    pub fn join_key<I, S>(&self, parts: I) -> Vec<u8>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        self.inner.config().join_key(parts)
    }

    /// Number of keys with a load in progress
    pub fn loads_in_flight(&self) -> usize {
        self.inner.flights.in_flight()
    }

    /// Current hit/miss/load/eviction counters and slab statistics
    pub fn stats(&self) -> CacheStats {
        let capacity = self.inner.config().max_buf_size;
        self.inner
            .stats
            .snapshot(self.len(), self.size(), capacity, self.inner.slab.stats())
    }
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("len", &self.len())
            .field("size", &self.size())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stampede::NoJitter;

    fn quiet() -> CacheConfig {
        CacheConfig::default().with_clear_interval(Duration::ZERO)
    }

    #[test]
    fn test_requires_runtime() {
        assert!(matches!(Cache::new(quiet()), Err(Error::Runtime(_))));
    }

    #[tokio::test]
    async fn test_set_get_delete() -> Result<()> {
        let cache = Cache::new(quiet())?;
        cache.set(b"alpha", b"one", Duration::from_secs(10))?;

        assert_eq!(&cache.get(b"alpha")?[..], b"one");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 8);

        cache.delete(b"alpha")?;
        assert!(matches!(cache.get(b"alpha"), Err(Error::NotFound)));
        assert!(matches!(cache.delete(b"alpha"), Err(Error::NotFound)));
        assert!(cache.is_empty());
        assert_eq!(cache.size(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_overwrite_across_size_classes() -> Result<()> {
        let cache = Cache::new(quiet())?;
        let ttl = Duration::from_secs(10);

        cache.set(b"alpha", &[1u8; 3], ttl)?;
        cache.set(b"alpha", &[2u8; 4], ttl)?;
        cache.set(b"alpha", &[3u8; 300], ttl)?;
        cache.set(b"alpha", &[4u8; 11], ttl)?;

        assert_eq!(&cache.get(b"alpha")?[..], &[4u8; 11][..]);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.size(), 16);

        // Only the live payload keeps a slot
        let allocated: u64 = cache
            .stats()
            .slab
            .size_classes
            .iter()
            .map(|c| c.allocated_slots)
            .sum();
        assert_eq!(allocated, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_call_time_bounds() -> Result<()> {
        let cache = Cache::new(quiet())?;
        let ttl = Duration::from_secs(10);

        assert!(matches!(cache.set(b"abc", b"v", ttl), Err(Error::InvalidKey(_))));
        assert!(matches!(
            cache.set(&[b'k'; 256], b"v", ttl),
            Err(Error::InvalidKey(_))
        ));
        assert!(matches!(
            cache.set(b"alpha", &vec![0u8; 0xffff], ttl),
            Err(Error::InvalidValue(_))
        ));
        assert!(matches!(
            cache.set(b"alpha", b"v", Duration::from_secs(1)),
            Err(Error::InvalidExpiration(_))
        ));
        assert!(matches!(cache.get(b"abc"), Err(Error::InvalidKey(_))));
        assert!(cache.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_set_default_uses_default_expiration() -> Result<()> {
        let cache = Cache::new(quiet())?;
        cache.set_default(b"alpha", b"one")?;

        let index = cache.inner.index.read();
        let digest = index.digest(b"alpha");
        let entry = index.lookup(b"alpha", digest).expect("stored entry");
        let remaining = entry.expire_at - clock::now_nanos();
        assert!(remaining > 29_000_000_000 && remaining <= 30_000_000_000);
        Ok(())
    }

    #[tokio::test]
    async fn test_lazy_expiry_reclaims_on_read() -> Result<()> {
        let config = quiet().with_min_expiration(Duration::from_millis(10));
        let cache = Cache::new(config)?;
        cache.set(b"alpha", b"one", Duration::from_millis(20))?;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(cache.get(b"alpha"), Err(Error::NotFound)));

        // Removal runs on a background task
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size(), 0);

        let stats = cache.stats();
        assert_eq!(stats.expired_reads, 1);
        assert_eq!(stats.evictions, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_expired_entry_reports_not_found() -> Result<()> {
        let config = quiet().with_min_expiration(Duration::from_millis(10));
        let cache = Cache::new(config)?;
        cache.set(b"alpha", b"one", Duration::from_millis(10))?;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(matches!(cache.delete(b"alpha"), Err(Error::NotFound)));
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.size(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_expired() -> Result<()> {
        let config = quiet().with_min_expiration(Duration::from_millis(10));
        let cache = Cache::new(config)?;
        cache.set(b"alpha", b"one", Duration::from_millis(10))?;
        cache.set(b"bravo", b"two", Duration::from_secs(10))?;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let report = cache.delete_expired();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(&cache.get(b"bravo")?[..], b"two");
        Ok(())
    }

    #[tokio::test]
    async fn test_soft_expand_accepts_then_sweeps() -> Result<()> {
        let config = quiet()
            .with_min_buf_size(64 << 10)
            .with_max_buf_size(64 << 10)
            .with_max_buf_factor(0.5)
            .with_min_expiration(Duration::from_millis(10));
        let cache = Cache::new(config)?;

        let value = vec![7u8; 1000];
        for i in 0..70 {
            let key = format!("fill:{:04}", i);
            cache.set(key.as_bytes(), &value, Duration::from_millis(20))?;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Past 64 KiB but within the 96 KiB hard limit: accepted, sweep scheduled
        let size = cache.size();
        assert!(size > 64 << 10);
        cache.set(b"trigger", &value, Duration::from_secs(10))?;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(&cache.get(b"trigger")?[..], &value[..]);
        Ok(())
    }

    #[tokio::test]
    async fn test_configure_validates_and_applies() -> Result<()> {
        let cache = Cache::new(quiet())?;

        let bad = cache.options().with_clear_rate(2.0);
        assert!(matches!(cache.configure(bad), Err(Error::InvalidConfig(_))));
        assert_eq!(cache.options().clear_rate, 0.1);

        cache.configure(cache.options().with_max_expiration(Duration::from_secs(120)))?;
        cache.set(b"alpha", b"one", Duration::from_secs(90))?;
        assert_eq!(cache.options().max_expiration, Duration::from_secs(120));
        Ok(())
    }

    #[tokio::test]
    async fn test_strategies_can_be_replaced() -> Result<()> {
        let cache = Cache::new(quiet())?;
        cache.configure_strategies(Strategies::default().with_avalanche(NoJitter));
        assert!(format!("{:?}", cache.strategies()).contains("NoJitter"));

        assert_eq!(cache.join_key(["user", "42"]), b"user##42".to_vec());
        Ok(())
    }
}
