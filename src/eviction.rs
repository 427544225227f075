//! Expired-entry reclamation
//!
//! Three paths remove expired entries:
//!
//! - **Periodic**: the [`Janitor`] task wakes every `clear_interval` and
//!   samples `clear_rate` of the live entries.
//! - **Pressure**: a write that pushes the cache past its buffer ceiling (or
//!   is rejected for it) schedules a full-rate sweep.
//! - **Lazy**: a read that finds an expired entry removes that one entry in
//!   the background (see `Cache::get`).
//!
//! At most one periodic or pressure sweep runs at a time; others arriving
//! meanwhile are skipped. Candidates are collected under the index read lock
//! and removed in short write-locked chunks, each re-checking expiry.

use crate::cache::CacheInner;
use crate::clock;
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Weak;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

/// Candidates removed per index write lock
const RECLAIM_CHUNK: usize = 64;

/// Background sweeper state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepState {
    Idle = 0,
    Sampling = 1,
    Reclaiming = 2,
}

impl SweepState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SweepState::Sampling,
            2 => SweepState::Reclaiming,
            _ => SweepState::Idle,
        }
    }
}

/// What started a sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepTrigger {
    /// Janitor tick
    Periodic,
    /// Write past the buffer ceiling
    Pressure,
    /// Explicit `delete_expired` call
    #[default]
    Manual,
}

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub trigger: SweepTrigger,
    /// Expired candidates found by sampling
    pub sampled: usize,
    /// Entries actually unlinked and freed
    pub reclaimed: usize,
    pub reclaimed_bytes: u64,
}

/// Admits one background sweep at a time
#[derive(Debug, Default)]
pub struct SweepGate {
    state: AtomicU8,
}

impl SweepGate {
    pub fn state(&self) -> SweepState {
        SweepState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn is_busy(&self) -> bool {
        self.state() != SweepState::Idle
    }

    fn begin(&self) -> Option<SweepPass<'_>> {
        self.state
            .compare_exchange(
                SweepState::Idle as u8,
                SweepState::Sampling as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| SweepPass { gate: self })
    }
}

/// Holds the gate for the duration of a sweep
struct SweepPass<'a> {
    gate: &'a SweepGate,
}

impl SweepPass<'_> {
    fn advance(&self, state: SweepState) {
        self.gate.state.store(state as u8, Ordering::Release);
    }
}

impl Drop for SweepPass<'_> {
    fn drop(&mut self) {
        self.gate
            .state
            .store(SweepState::Idle as u8, Ordering::Release);
    }
}

/// Sample `rate` of the live entries and reclaim the expired ones
///
/// Periodic and pressure sweeps are skipped (returning `None`) while another
/// one is running; manual sweeps always run. Failures are logged and the
/// sweep moves on.
#[instrument(skip(inner))]
pub(crate) fn sweep(inner: &CacheInner, rate: f32, trigger: SweepTrigger) -> Option<SweepReport> {
    let pass = inner.sweeper.begin();
    if pass.is_none() && trigger != SweepTrigger::Manual {
        debug!("Sweep already running, skipping");
        return None;
    }

    let now = clock::now_nanos();
    let candidates = inner.index.read().sample_expired(rate, now);
    if let Some(pass) = &pass {
        pass.advance(SweepState::Reclaiming);
    }

    let mut report = SweepReport {
        trigger,
        sampled: candidates.len(),
        ..SweepReport::default()
    };

    for chunk in candidates.chunks(RECLAIM_CHUNK) {
        let mut index = inner.index.write();
        for candidate in chunk {
            // The key may have been overwritten since it was sampled
            let Some(entry) = index.remove_if_expired(&candidate.key, candidate.digest, now)
            else {
                continue;
            };
            match inner.release(&entry) {
                Ok(()) => {
                    report.reclaimed += 1;
                    report.reclaimed_bytes += u64::from(entry.total_len);
                }
                Err(e) => {
                    warn!(error = %e, slot = %entry.location, "Failed to free expired entry");
                }
            }
        }
    }

    if inner.index.read().is_rehashing() {
        inner.index.write().advance_rehash(RECLAIM_CHUNK);
    }

    inner.stats.record_sweep(report.reclaimed as u64);
    if report.reclaimed > 0 {
        info!(
            sampled = report.sampled,
            reclaimed = report.reclaimed,
            reclaimed_bytes = report.reclaimed_bytes,
            "Reclaimed expired entries"
        );
    } else {
        debug!(sampled = report.sampled, "Sweep found nothing to reclaim");
    }
    Some(report)
}

/// Background task running periodic sweeps
///
/// The task only holds a weak reference to the cache and exits once the
/// cache is gone or the janitor is dropped.
#[derive(Debug)]
pub(crate) struct Janitor {
    stop: Option<oneshot::Sender<()>>,
    interval: Duration,
}

impl Janitor {
    pub(crate) fn start(cache: Weak<CacheInner>, interval: Duration, runtime: &Handle) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        runtime.spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = interval.as_millis() as u64, "Janitor started");

            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => {
                        let Some(inner) = cache.upgrade() else {
                            break;
                        };
                        let rate = inner.config().clear_rate;
                        let task = tokio::task::spawn_blocking(move || {
                            sweep(&inner, rate, SweepTrigger::Periodic);
                        });
                        if let Err(e) = task.await {
                            warn!(error = %e, "Periodic sweep task failed");
                        }
                    }
                }
            }

            info!("Janitor stopped");
        });

        Self {
            stop: Some(stop_tx),
            interval,
        }
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}
