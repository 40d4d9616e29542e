//! Resolution selection
//!
//! Picks the cheapest source that still honors the point budget. The
//! 1-minute view serves ranges longer than a day and up to a week; the
//! 1-hour view serves anything longer. A request over the point ceiling of
//! its view reads raw rows, however long its range.

use crate::clock::MILLIS_PER_DAY;
use crate::downsample::Granularity;
use crate::model::TimeRange;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-sensor point ceiling for reading the 1-minute view
pub const MINUTE_VIEW_MAX_POINTS: usize = 1_440;
/// Per-sensor point ceiling for reading the 1-hour view
pub const HOUR_VIEW_MAX_POINTS: usize = 168;

const MINUTE_VIEW_MIN_DURATION: i64 = MILLIS_PER_DAY;
const HOUR_VIEW_MIN_DURATION: i64 = 7 * MILLIS_PER_DAY;

/// Source a query reads from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "raw")]
    Raw,
    #[serde(rename = "1m")]
    OneMinute,
    #[serde(rename = "1h")]
    OneHour,
}

impl Resolution {
    /// Rollup view backing this resolution, `None` for raw rows
    pub fn granularity(&self) -> Option<Granularity> {
        match self {
            Resolution::Raw => None,
            Resolution::OneMinute => Some(Granularity::Minute),
            Resolution::OneHour => Some(Granularity::Hour),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Raw => "raw",
            Resolution::OneMinute => "1m",
            Resolution::OneHour => "1h",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Choose the source for `sensor_count` series over `range` within `max_points` total.
pub fn plan(range: TimeRange, sensor_count: usize, max_points: usize) -> Result<Resolution> {
    if sensor_count == 0 {
        return Err(Error::InvalidInput("at least one sensor id is required".to_string()));
    }
    if max_points == 0 {
        return Err(Error::InvalidInput("max_points must be positive".to_string()));
    }

    let duration = range.duration_millis();
    let points_per_sensor = max_points / sensor_count;

    if duration > MINUTE_VIEW_MIN_DURATION
        && duration <= HOUR_VIEW_MIN_DURATION
        && points_per_sensor <= MINUTE_VIEW_MAX_POINTS
    {
        Ok(Resolution::OneMinute)
    } else if duration > HOUR_VIEW_MIN_DURATION && points_per_sensor <= HOUR_VIEW_MAX_POINTS {
        Ok(Resolution::OneHour)
    } else {
        Ok(Resolution::Raw)
    }
}
