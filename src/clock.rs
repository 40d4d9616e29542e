//! Monotonic millisecond clock
//!
//! Telemetry timestamps and tier boundaries are expressed in epoch
//! milliseconds. Lifecycle timestamps come from the same source so that a
//! wall-clock step backward never reorders persisted transitions.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Milliseconds per day
pub const MILLIS_PER_DAY: i64 = 86_400_000;

/// A clock that never returns a smaller millisecond timestamp than before.
#[derive(Debug)]
pub struct BoundedClock {
    /// Largest timestamp handed out so far (epoch millis)
    high_water_ms: AtomicI64,
    /// Fixed offset added to the wall clock, for tests that need "the future"
    offset_ms: i64,
}

impl BoundedClock {
    pub fn new() -> Self {
        Self::with_offset(0)
    }

    /// Clock shifted from wall time by `offset_ms`.
    pub fn with_offset(offset_ms: i64) -> Self {
        Self {
            high_water_ms: AtomicI64::new(0),
            offset_ms,
        }
    }

    /// Returns a non-decreasing epoch millisecond timestamp.
    pub fn now_millis(&self) -> i64 {
        let wall = Utc::now().timestamp_millis() + self.offset_ms;
        let prev = self.high_water_ms.fetch_max(wall, Ordering::AcqRel);
        wall.max(prev)
    }

    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_millis()).unwrap_or_else(Utc::now)
    }

    /// Age in whole days of a record stamped `timestamp_ms`. Future records are age 0.
    pub fn age_days(&self, timestamp_ms: i64) -> u32 {
        let age = self.now_millis().saturating_sub(timestamp_ms).max(0);
        (age / MILLIS_PER_DAY).min(u32::MAX as i64) as u32
    }
}

impl Default for BoundedClock {
    fn default() -> Self {
        Self::new()
    }
}
