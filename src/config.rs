//! Cache configuration
//!
//! [`CacheConfig`] can be built in code with the `with_*` methods or loaded
//! from a TOML/JSON/YAML file with `SLABCACHE_*` environment overrides.
//! Durations are expressed in milliseconds in files and the environment.

use crate::error::{Error, Result};
use crate::stampede::BreakdownStrategy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Defaults and hard bounds for configuration values
pub mod limits {
    use std::time::Duration;

    /// Default entry expiration (30s)
    pub const DEFAULT_EXPIRATION: Duration = Duration::from_secs(30);
    /// Default shortest accepted expiration (2s)
    pub const DEFAULT_MIN_EXPIRATION: Duration = Duration::from_secs(2);
    /// Default longest accepted expiration (1m)
    pub const DEFAULT_MAX_EXPIRATION: Duration = Duration::from_secs(60);
    /// Expirations may not be configured below this
    pub const EXPIRATION_FLOOR: Duration = Duration::from_millis(10);
    /// Expirations may not be configured above this
    pub const EXPIRATION_CEILING: Duration = Duration::from_secs(24 * 60 * 60);

    /// Default lower bound for the buffer ceiling (10 MiB)
    pub const DEFAULT_MIN_BUF_SIZE: u32 = 10 << 20;
    /// Default and largest buffer ceiling (500 MiB)
    pub const DEFAULT_MAX_BUF_SIZE: u32 = 500 << 20;
    /// Smallest buffer ceiling that can be configured (64 KiB)
    pub const BUF_SIZE_FLOOR: u32 = 64 << 10;
    /// Default soft-expand factor above the buffer ceiling
    pub const DEFAULT_MAX_BUF_FACTOR: f32 = 0.2;

    /// Default shortest key
    pub const DEFAULT_MIN_DATA_SIZE: usize = 5;
    /// Longest key + value; lengths are stored in 16 bits
    pub const MAX_DATA_SIZE: usize = 0xffff;
    /// Longest key; key lengths are stored in 8 bits
    pub const MAX_KEY_SIZE: usize = 0xff;

    /// Default delimiter for composite keys
    pub const DEFAULT_DELIMITER: &str = "##";
    /// Default data-load deadline (5s)
    pub const DEFAULT_DATA_LOAD_TIME: Duration = Duration::from_secs(5);
    /// Default background sweep interval (1m)
    pub const DEFAULT_CLEAR_INTERVAL: Duration = Duration::from_secs(60);
    /// Default fraction of entries sampled per sweep
    pub const DEFAULT_CLEAR_RATE: f32 = 0.1;
    /// Shortest sweep interval or load deadline
    pub const TASK_INTERVAL_FLOOR: Duration = Duration::from_millis(10);
    /// Longest load deadline
    pub const DATA_LOAD_CEILING: Duration = Duration::from_secs(60);
}

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Expiration used by `set_default`
    #[serde(rename = "default_expiration_ms", with = "millis")]
    pub default_expiration: Duration,
    /// Shortest expiration a caller may request
    #[serde(rename = "min_expiration_ms", with = "millis")]
    pub min_expiration: Duration,
    /// Longest expiration a caller may request
    #[serde(rename = "max_expiration_ms", with = "millis")]
    pub max_expiration: Duration,

    /// Lower bound for `max_buf_size`
    pub min_buf_size: u32,
    /// Buffer ceiling in bytes of key + value
    pub max_buf_size: u32,
    /// Writes may exceed `max_buf_size` by this fraction before being rejected
    pub max_buf_factor: f32,

    /// Shortest key
    pub min_data_size: usize,
    /// Longest key + value
    pub max_data_size: usize,
    /// Longest key
    pub max_key_size: usize,

    /// Deadline for a loader invoked on a miss
    #[serde(rename = "data_load_time_ms", with = "millis")]
    pub data_load_time: Duration,
    /// Background sweep interval; zero disables the sweep task
    #[serde(rename = "clear_interval_ms", with = "millis")]
    pub clear_interval: Duration,
    /// Fraction of entries sampled by each background sweep
    pub clear_rate: f32,
    /// Delimiter used by [`CacheConfig::join_key`]
    pub delimiter: String,

    /// Whether concurrent misses for one key share a single load
    pub breakdown: BreakdownStrategy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_expiration: limits::DEFAULT_EXPIRATION,
            min_expiration: limits::DEFAULT_MIN_EXPIRATION,
            max_expiration: limits::DEFAULT_MAX_EXPIRATION,
            min_buf_size: limits::DEFAULT_MIN_BUF_SIZE,
            max_buf_size: limits::DEFAULT_MAX_BUF_SIZE,
            max_buf_factor: limits::DEFAULT_MAX_BUF_FACTOR,
            min_data_size: limits::DEFAULT_MIN_DATA_SIZE,
            max_data_size: limits::MAX_DATA_SIZE,
            max_key_size: limits::MAX_KEY_SIZE,
            data_load_time: limits::DEFAULT_DATA_LOAD_TIME,
            clear_interval: limits::DEFAULT_CLEAR_INTERVAL,
            clear_rate: limits::DEFAULT_CLEAR_RATE,
            delimiter: limits::DEFAULT_DELIMITER.to_string(),
            breakdown: BreakdownStrategy::default(),
        }
    }
}

impl CacheConfig {
    /// Load a configuration file and apply `SLABCACHE_*` environment overrides
    ///
    /// Fields missing from both sources keep their defaults. The result is
    /// validated before it is returned.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("SLABCACHE").try_parsing(true))
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to load {:?}: {}", path, e)))?;

        let cfg: CacheConfig = settings
            .try_deserialize()
            .map_err(|e| Error::InvalidConfig(format!("Failed to parse {:?}: {}", path, e)))?;
        cfg.validate()?;

        debug!(path = ?path, "Loaded cache configuration");
        Ok(cfg)
    }

    pub fn with_default_expiration(mut self, expiration: Duration) -> Self {
        self.default_expiration = expiration;
        self
    }

    pub fn with_min_expiration(mut self, expiration: Duration) -> Self {
        self.min_expiration = expiration;
        self
    }

    pub fn with_max_expiration(mut self, expiration: Duration) -> Self {
        self.max_expiration = expiration;
        self
    }

    pub fn with_min_buf_size(mut self, size: u32) -> Self {
        self.min_buf_size = size;
        self
    }

    pub fn with_max_buf_size(mut self, size: u32) -> Self {
        self.max_buf_size = size;
        self
    }

    pub fn with_max_buf_factor(mut self, factor: f32) -> Self {
        self.max_buf_factor = factor;
        self
    }

    pub fn with_min_data_size(mut self, size: usize) -> Self {
        self.min_data_size = size;
        self
    }

    pub fn with_max_data_size(mut self, size: usize) -> Self {
        self.max_data_size = size;
        self
    }

    pub fn with_max_key_size(mut self, size: usize) -> Self {
        self.max_key_size = size;
        self
    }

    pub fn with_data_load_time(mut self, timeout: Duration) -> Self {
        self.data_load_time = timeout;
        self
    }

    pub fn with_clear_interval(mut self, interval: Duration) -> Self {
        self.clear_interval = interval;
        self
    }

    pub fn with_clear_rate(mut self, rate: f32) -> Self {
        self.clear_rate = rate;
        self
    }

    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    pub fn with_breakdown(mut self, breakdown: BreakdownStrategy) -> Self {
        self.breakdown = breakdown;
        self
    }

    /// Check every value against [`limits`] and against each other
    pub fn validate(&self) -> Result<()> {
        use limits::*;

        if self.min_buf_size < BUF_SIZE_FLOOR || self.min_buf_size > DEFAULT_MAX_BUF_SIZE {
            return Err(Error::InvalidConfig(format!(
                "min_buf_size {} outside {}..={}",
                self.min_buf_size, BUF_SIZE_FLOOR, DEFAULT_MAX_BUF_SIZE
            )));
        }
        if self.max_buf_size < self.min_buf_size || self.max_buf_size > DEFAULT_MAX_BUF_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_buf_size {} outside {}..={}",
                self.max_buf_size, self.min_buf_size, DEFAULT_MAX_BUF_SIZE
            )));
        }
        if !(0.0..=1.0).contains(&self.max_buf_factor) {
            return Err(Error::InvalidConfig(format!(
                "max_buf_factor {} outside 0..=1",
                self.max_buf_factor
            )));
        }

        for (name, value) in [
            ("min_expiration", self.min_expiration),
            ("max_expiration", self.max_expiration),
        ] {
            if value < EXPIRATION_FLOOR || value > EXPIRATION_CEILING {
                return Err(Error::InvalidConfig(format!(
                    "{} {:?} outside {:?}..={:?}",
                    name, value, EXPIRATION_FLOOR, EXPIRATION_CEILING
                )));
            }
        }
        if self.min_expiration > self.max_expiration {
            return Err(Error::InvalidConfig(format!(
                "min_expiration {:?} above max_expiration {:?}",
                self.min_expiration, self.max_expiration
            )));
        }
        if self.default_expiration < self.min_expiration
            || self.default_expiration > self.max_expiration
        {
            return Err(Error::InvalidConfig(format!(
                "default_expiration {:?} outside {:?}..={:?}",
                self.default_expiration, self.min_expiration, self.max_expiration
            )));
        }

        if self.max_data_size == 0 || self.max_data_size > MAX_DATA_SIZE {
            return Err(Error::InvalidConfig(format!(
                "max_data_size {} outside 1..={}",
                self.max_data_size, MAX_DATA_SIZE
            )));
        }
        if self.min_data_size == 0 || self.min_data_size > self.max_data_size {
            return Err(Error::InvalidConfig(format!(
                "min_data_size {} outside 1..={}",
                self.min_data_size, self.max_data_size
            )));
        }
        let key_ceiling = MAX_KEY_SIZE.min(self.max_data_size);
        if self.max_key_size < self.min_data_size || self.max_key_size > key_ceiling {
            return Err(Error::InvalidConfig(format!(
                "max_key_size {} outside {}..={}",
                self.max_key_size, self.min_data_size, key_ceiling
            )));
        }

        if self.data_load_time < TASK_INTERVAL_FLOOR || self.data_load_time > DATA_LOAD_CEILING {
            return Err(Error::InvalidConfig(format!(
                "data_load_time {:?} outside {:?}..={:?}",
                self.data_load_time, TASK_INTERVAL_FLOOR, DATA_LOAD_CEILING
            )));
        }
        if !self.clear_interval.is_zero() && self.clear_interval < TASK_INTERVAL_FLOOR {
            return Err(Error::InvalidConfig(format!(
                "clear_interval {:?} below {:?}",
                self.clear_interval, TASK_INTERVAL_FLOOR
            )));
        }
        if !(0.0..=1.0).contains(&self.clear_rate) {
            return Err(Error::InvalidConfig(format!(
                "clear_rate {} outside 0..=1",
                self.clear_rate
            )));
        }

        Ok(())
    }

    /// Reject keys outside `min_data_size..=max_key_size`
    pub fn check_key(&self, key_len: usize) -> Result<()> {
        if key_len < self.min_data_size || key_len > self.max_key_size {
            return Err(Error::InvalidKey(format!(
                "key of {} bytes outside {}..={}",
                key_len, self.min_data_size, self.max_key_size
            )));
        }
        Ok(())
    }

    /// Reject key + value payloads longer than `max_data_size`
    pub fn check_data(&self, total_len: usize) -> Result<()> {
        if total_len > self.max_data_size {
            return Err(Error::InvalidValue(format!(
                "key + value of {} bytes above {}",
                total_len, self.max_data_size
            )));
        }
        Ok(())
    }

    /// Reject expirations outside `min_expiration..=max_expiration`
    pub fn check_expiration(&self, expiration: Duration) -> Result<()> {
        if expiration < self.min_expiration || expiration > self.max_expiration {
            return Err(Error::InvalidExpiration(format!(
                "{:?} outside {:?}..={:?}",
                expiration, self.min_expiration, self.max_expiration
            )));
        }
        Ok(())
    }

    /// Size at which writes start triggering a full expiry sweep
    pub fn soft_limit(&self) -> u32 {
        self.max_buf_size
    }

    /// Size above which writes are rejected
    pub fn hard_limit(&self) -> u32 {
        let expanded = f64::from(self.max_buf_size) * (1.0 + f64::from(self.max_buf_factor));
        expanded.min(f64::from(u32::MAX)) as u32
    }

    /// Join key parts with the configured delimiter
    pub fn join_key<I, S>(&self, parts: I) -> Vec<u8>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut key = Vec::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                key.extend_from_slice(self.delimiter.as_bytes());
            }
            key.extend_from_slice(part.as_ref());
        }
        key
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
