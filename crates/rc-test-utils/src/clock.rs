//! Test clock.
//!
//! Reads `start + offset + tokio elapsed`. Under `#[tokio::test(start_paused =
//! true)]` the tokio part only moves with `tokio::time::advance` (or the
//! runtime's auto-advance), so store TTLs, ping timestamps and grace timers
//! all move together.

use room_controller::clock::Clock;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// 2025-01-01T00:00:00Z in epoch milliseconds.
pub const DEFAULT_START_MILLIS: i64 = 1_735_689_600_000;

#[derive(Debug)]
pub struct ManualClock {
    start_millis: i64,
    offset_millis: AtomicI64,
    anchor: Instant,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::starting_at(DEFAULT_START_MILLIS)
    }

    #[must_use]
    pub fn starting_at(start_millis: i64) -> Self {
        Self {
            start_millis,
            offset_millis: AtomicI64::new(0),
            anchor: Instant::now(),
        }
    }

    /// Move wall-clock time forward without touching tokio time.
    pub fn advance(&self, by: Duration) {
        let millis = i64::try_from(by.as_millis()).unwrap_or(i64::MAX);
        self.offset_millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        let elapsed = i64::try_from(self.anchor.elapsed().as_millis()).unwrap_or(i64::MAX);
        self.start_millis + self.offset_millis.load(Ordering::SeqCst) + elapsed
    }
}
