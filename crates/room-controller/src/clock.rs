//! Wall-clock abstraction.
//!
//! Timestamps stored in the shared store (`lastPingAt`, `startedAt`, lock
//! expiry in test stores) are epoch milliseconds read through [`Clock`] so
//! tests can drive time explicitly.

use std::fmt;
use std::time::Duration;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> i64 {
        self.now_millis() / 1000
    }
}

/// Production clock backed by `chrono::Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
#[must_use]
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Whole milliseconds in `duration`, saturating at `i64::MAX`.
#[must_use]
pub fn duration_ms_i64(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_is_after_2020() {
        let clock = SystemClock;
        // 2020-01-01T00:00:00Z
        assert!(clock.now_millis() > 1_577_836_800_000);
        assert!(clock.now_secs() > 1_577_836_800);
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
        assert_eq!(duration_ms_i64(Duration::from_secs(2)), 2000);
        assert_eq!(duration_ms_i64(Duration::MAX), i64::MAX);
    }
}
