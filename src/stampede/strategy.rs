//! Write-back policies for loaded values

use crate::config::CacheConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Spreads the expirations of loaded entries so they do not all lapse at once
pub trait AvalancheStrategy: Send + Sync + fmt::Debug + 'static {
    /// Expiration to store a loaded value with, given the requested `ttl`
    fn expiration(&self, ttl: Duration, config: &CacheConfig) -> Duration;
}

/// Adds a uniform jitter in `[0, min_expiration)`
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomJitter;

impl AvalancheStrategy for RandomJitter {
    fn expiration(&self, ttl: Duration, config: &CacheConfig) -> Duration {
        let span = u64::try_from(config.min_expiration.as_nanos()).unwrap_or(u64::MAX);
        if span == 0 {
            return ttl;
        }
        ttl.saturating_add(Duration::from_nanos(fastrand::u64(..span)))
    }
}

/// Keeps the requested expiration
#[derive(Debug, Default, Clone, Copy)]
pub struct NoJitter;

impl AvalancheStrategy for NoJitter {
    fn expiration(&self, ttl: Duration, _config: &CacheConfig) -> Duration {
        ttl
    }
}

/// Decides how a loaded value is cached, if at all
pub trait PenetrationStrategy: Send + Sync + fmt::Debug + 'static {
    /// Expiration before jitter, or `None` to skip the write-back
    fn write_back_ttl(&self, value: &[u8], ttl: Duration, config: &CacheConfig)
        -> Option<Duration>;
}

/// Caches empty results for `min_expiration` so repeated misses stay cheap
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheEmpty;

impl PenetrationStrategy for CacheEmpty {
    fn write_back_ttl(
        &self,
        value: &[u8],
        ttl: Duration,
        config: &CacheConfig,
    ) -> Option<Duration> {
        if value.is_empty() {
            Some(config.min_expiration)
        } else {
            Some(ttl)
        }
    }
}

/// Never caches empty results
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipEmpty;

impl PenetrationStrategy for SkipEmpty {
    fn write_back_ttl(
        &self,
        value: &[u8],
        ttl: Duration,
        _config: &CacheConfig,
    ) -> Option<Duration> {
        (!value.is_empty()).then_some(ttl)
    }
}

/// Whether concurrent misses for one key share a single load
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakdownStrategy {
    /// One loader call per key at a time; other callers wait for its outcome
    #[default]
    SingleFlight,
    /// Every miss runs its own loader
    Disabled,
}

/// The pluggable policies applied on the miss path
#[derive(Clone)]
pub struct Strategies {
    pub avalanche: Arc<dyn AvalancheStrategy>,
    pub penetration: Arc<dyn PenetrationStrategy>,
}

impl Default for Strategies {
    fn default() -> Self {
        Self {
            avalanche: Arc::new(RandomJitter),
            penetration: Arc::new(CacheEmpty),
        }
    }
}

impl fmt::Debug for Strategies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Strategies")
            .field("avalanche", &self.avalanche)
            .field("penetration", &self.penetration)
            .finish()
    }
}

impl Strategies {
    pub fn with_avalanche(mut self, strategy: impl AvalancheStrategy) -> Self {
        self.avalanche = Arc::new(strategy);
        self
    }

    pub fn with_penetration(mut self, strategy: impl PenetrationStrategy) -> Self {
        self.penetration = Arc::new(strategy);
        self
    }

    /// Final expiration for a loaded value, or `None` if it should not be cached
    pub fn write_back_expiration(
        &self,
        value: &[u8],
        ttl: Duration,
        config: &CacheConfig,
    ) -> Option<Duration> {
        self.penetration
            .write_back_ttl(value, ttl, config)
            .map(|ttl| self.avalanche.expiration(ttl, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_jitter_range() {
        let cfg = CacheConfig::default();
        let ttl = Duration::from_secs(10);
        for _ in 0..1000 {
            let e = RandomJitter.expiration(ttl, &cfg);
            assert!(e >= ttl);
            assert!(e < ttl + cfg.min_expiration);
        }
        assert_eq!(NoJitter.expiration(ttl, &cfg), ttl);
    }

    #[test]
    fn test_empty_values() {
        let cfg = CacheConfig::default();
        let ttl = Duration::from_secs(30);

        assert_eq!(CacheEmpty.write_back_ttl(b"", ttl, &cfg), Some(cfg.min_expiration));
        assert_eq!(CacheEmpty.write_back_ttl(b"v", ttl, &cfg), Some(ttl));
        assert_eq!(SkipEmpty.write_back_ttl(b"", ttl, &cfg), None);
        assert_eq!(SkipEmpty.write_back_ttl(b"v", ttl, &cfg), Some(ttl));
    }

    #[test]
    fn test_combined_write_back() {
        let cfg = CacheConfig::default();
        let strategies = Strategies::default().with_avalanche(NoJitter);
        assert_eq!(
            strategies.write_back_expiration(b"", Duration::from_secs(30), &cfg),
            Some(cfg.min_expiration)
        );

        let strategies = strategies.with_penetration(SkipEmpty);
        assert_eq!(
            strategies.write_back_expiration(b"", Duration::from_secs(30), &cfg),
            None
        );
        assert!(format!("{:?}", strategies).contains("SkipEmpty"));
    }

    #[test]
    fn test_breakdown_serde() {
        let json = serde_json::to_string(&BreakdownStrategy::SingleFlight).unwrap();
        assert_eq!(json, "\"single_flight\"");
        let parsed: BreakdownStrategy = serde_json::from_str("\"disabled\"").unwrap();
        assert_eq!(parsed, BreakdownStrategy::Disabled);
    }
}
