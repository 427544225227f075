//! Single-flight load coalescing

use crate::error::{Error, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry as MapEntry;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::debug;

type Outcome = Option<Result<Bytes>>;
type FlightMap = Arc<DashMap<Vec<u8>, Flight>>;

/// A load in progress
struct Flight {
    id: u64,
    rx: watch::Receiver<Outcome>,
}

/// Unregisters a flight when its driver task ends, however it ends
struct FlightGuard {
    flights: FlightMap,
    key: Vec<u8>,
    id: u64,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // A newer flight for the same key may already be registered
        self.flights.remove_if(&self.key, |_, flight| flight.id == self.id);
    }
}

/// Collapses concurrent loads for the same key into one
///
/// The first caller for a key registers a flight and spawns a driver task
/// that runs the load to completion. Everyone who arrives while the flight
/// is registered subscribes to the same outcome. Because the load runs on
/// its own task, a caller that stops waiting affects nobody else.
pub struct FlightGroup {
    flights: FlightMap,
    next_id: AtomicU64,
}

impl Default for FlightGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl FlightGroup {
    pub fn new() -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Number of keys with a load in progress
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Run `load` for `key` unless a load for it is already in progress,
    /// then wait for whichever load is current
    ///
    /// Returns the outcome and whether this caller started the load.
    pub async fn work<F, Fut>(&self, handle: &Handle, key: &[u8], load: F) -> (Result<Bytes>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        let (mut rx, leader) = match self.flights.entry(key.to_vec()) {
            MapEntry::Occupied(flight) => {
                debug!(key_len = key.len(), flight = flight.get().id, "Joining in-flight load");
                (flight.get().rx.clone(), false)
            }
            MapEntry::Vacant(slot) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                slot.insert(Flight { id, rx: rx.clone() });

                let guard = FlightGuard {
                    flights: Arc::clone(&self.flights),
                    key: key.to_vec(),
                    id,
                };
                let fut = load();
                handle.spawn(async move {
                    let outcome = fut.await;
                    drop(guard);
                    tx.send_replace(Some(outcome));
                });

                debug!(key_len = key.len(), flight = id, "Started load");
                (rx, true)
            }
        };

        let outcome = match rx.wait_for(|o| o.is_some()).await {
            Ok(outcome) => Option::clone(&outcome),
            Err(_) => None,
        };
        let outcome = outcome
            .unwrap_or_else(|| Err(Error::Internal("load ended without an outcome".to_string())));
        (outcome, leader)
    }
}
