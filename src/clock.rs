//! Wall clock for entry expiry

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Nanoseconds since the Unix epoch
///
/// Expiry follows the wall clock, so stepping the system clock moves every
/// deadline with it.
///
/// Never returns 0: an `expire_at` of 0 marks an entry that is not live.
pub fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(1)
        .max(1)
}

/// Absolute expiry for an entry written now with `ttl`
pub fn expire_at(ttl: Duration) -> u64 {
    let ttl = u64::try_from(ttl.as_nanos()).unwrap_or(u64::MAX);
    now_nanos().saturating_add(ttl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_non_zero_and_monotone_enough() {
        let a = now_nanos();
        let b = now_nanos();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[test]
    fn test_expire_at_is_in_the_future() {
        let before = now_nanos();
        let at = expire_at(Duration::from_secs(2));
        assert!(at >= before + 2_000_000_000);
        assert_eq!(expire_at(Duration::MAX), u64::MAX);
    }
}
