//! Telemetry data model
//!
//! Every record carries a facility id and an epoch-millisecond timestamp.
//! Together they form the partition key, so neither may be missing.

mod event;
mod quality;
mod reading;

pub use event::{EventResolution, EventSeverity, EventType, ProductionEvent};
pub use quality::{QualityMeasurement, QualityVerdict};
pub use reading::{ReadingStatus, SensorReading, SensorType};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Closed time range `[start, end]` in epoch milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// Validated constructor: `start` must not be after `end`.
    pub fn try_new(start: i64, end: i64) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidInput(format!(
                "time range start {} is after end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn duration_millis(&self) -> i64 {
        self.end.saturating_sub(self.start)
    }
}

impl From<RangeInclusive<i64>> for TimeRange {
    fn from(range: RangeInclusive<i64>) -> Self {
        Self::new(*range.start(), *range.end())
    }
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_closed_bounds() {
        let range = TimeRange::new(100, 200);
        assert!(range.contains(100));
        assert!(range.contains(200));
        assert!(!range.contains(201));
        assert_eq!(range.duration_millis(), 100);
    }

    #[test]
    fn test_time_range_rejects_inverted() {
        assert!(TimeRange::try_new(10, 5).is_err());
        assert!(TimeRange::try_new(5, 5).is_ok());
    }

    #[test]
    fn test_overlaps() {
        let a = TimeRange::from(0..=10);
        assert!(a.overlaps(&TimeRange::new(10, 20)));
        assert!(!a.overlaps(&TimeRange::new(11, 20)));
    }
}
