// slabcache - embedded key/value cache
// Slab-backed storage with incremental rehashing and stampede protection

#![warn(rust_2018_idioms)]

pub mod cache;
pub mod clock;
pub mod config;
pub mod eviction;
pub mod index;
pub mod slab;
pub mod stampede;
pub mod stats;

// Re-exports for convenience
pub use cache::Cache;
pub use config::CacheConfig;
pub use error::{Error, Result};
pub use index::{KeyHasher, Xxh3Hasher};
pub use stampede::{
    AvalancheStrategy, BreakdownStrategy, CacheEmpty, NoJitter, PenetrationStrategy,
    RandomJitter, SkipEmpty, Strategies,
};
pub use stats::CacheStats;

/// Cache error types
pub mod error {
    use std::sync::Arc;
    use std::time::Duration;
    use thiserror::Error;

    /// Boxed error produced by a user-supplied loader
    pub type LoaderError = Arc<dyn std::error::Error + Send + Sync>;

    #[derive(Error, Debug, Clone)]
    pub enum Error {
        #[error("Not found")]
        NotFound,

        #[error("Capacity exceeded: {requested} bytes requested with {current} of {limit} in use")]
        CapacityExceeded {
            requested: u32,
            current: u32,
            limit: u32,
        },

        #[error("Load timeout: {key} not loaded within {timeout:?}")]
        LoadTimeout { key: String, timeout: Duration },

        #[error("Loader failed for {key}: {source}")]
        LoaderFailed { key: String, source: LoaderError },

        #[error("Invalid key: {0}")]
        InvalidKey(String),

        #[error("Invalid value: {0}")]
        InvalidValue(String),

        #[error("Invalid expiration: {0}")]
        InvalidExpiration(String),

        #[error("Invalid config: {0}")]
        InvalidConfig(String),

        #[error("Runtime error: {0}")]
        Runtime(String),

        #[error("Internal error: {0}")]
        Internal(String),
    }

    impl Error {
        pub fn is_not_found(&self) -> bool {
            matches!(self, Error::NotFound)
        }
    }

    pub type Result<T> = std::result::Result<T, Error>;
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_format() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = Error::CapacityExceeded {
            requested: 10,
            current: 95,
            limit: 100,
        };
        assert_eq!(
            err.to_string(),
            "Capacity exceeded: 10 bytes requested with 95 of 100 in use"
        );
        assert!(Error::NotFound.is_not_found());
        assert!(!err.is_not_found());
    }
}
