//! Stampede protection for the miss path
//!
//! ```text
//! get_or_load(key)
//!   ├─ hit ─────────────────────────────→ value
//!   └─ miss → FlightGroup ── leader ──→ loader (own task, deadline)
//!                 │                         │
//!                 │                   PenetrationStrategy: cache empty results?
//!                 │                   AvalancheStrategy:   jitter the expiration
//!                 │                         │
//!                 └─ followers ←── outcome ─┘ write-back once
//! ```
//!
//! - Breakdown: concurrent misses for a key share one loader call.
//! - Avalanche: loaded entries get a random extra lifetime.
//! - Penetration: empty results are cached briefly so repeated misses for
//!   absent keys do not reach the loader.

pub mod flight;
pub mod strategy;

pub use flight::FlightGroup;
pub use strategy::{
    AvalancheStrategy, BreakdownStrategy, CacheEmpty, NoJitter, PenetrationStrategy,
    RandomJitter, SkipEmpty, Strategies,
};
