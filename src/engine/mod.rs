//! Backing analytics engine boundary
//!
//! Every component that touches telemetry data goes through [`TelemetryEngine`].
//! Results come back as typed rows per table or view; engine-native row
//! shapes stay inside each implementation.

mod clickhouse;
mod memory;

pub use self::clickhouse::ClickHouseEngine;
pub use memory::{MemoryEngine, MemoryEngineFaults};

use crate::downsample::Granularity;
use crate::model::{EventResolution, ProductionEvent, QualityMeasurement, SensorReading, TimeRange};
use crate::schema::{DdlOutcome, SchemaObject, TableKind};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;

/// Sensor-set and time-window filter shared by raw and rollup reads
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesQuery {
    /// Sorted, deduplicated sensor ids
    pub sensor_ids: Vec<String>,
    pub range: TimeRange,
    /// Maximum rows returned across all sensors, split evenly between them
    pub limit: usize,
}

impl SeriesQuery {
    pub fn new(
        sensor_ids: impl IntoIterator<Item = String>,
        range: TimeRange,
        limit: usize,
    ) -> Self {
        let mut sensor_ids: Vec<String> = sensor_ids.into_iter().collect();
        sensor_ids.sort();
        sensor_ids.dedup();
        Self {
            sensor_ids,
            range,
            limit,
        }
    }

    pub fn sensor_set(&self) -> HashSet<String> {
        self.sensor_ids.iter().cloned().collect()
    }

    /// Rows kept per sensor, so every requested series gets its share of the budget
    pub fn per_sensor_limit(&self) -> usize {
        (self.limit / self.sensor_ids.len().max(1)).max(1)
    }

    /// Apply both caps to rows already ordered by sensor then time.
    pub fn cap<T>(&self, rows: Vec<T>, sensor_of: impl Fn(&T) -> &str) -> Vec<T> {
        let per_sensor = self.per_sensor_limit();
        let mut kept: Vec<T> = Vec::with_capacity(rows.len().min(self.limit));
        let mut run = 0;
        for row in rows {
            if kept.len() >= self.limit {
                break;
            }
            let same = kept
                .last()
                .map_or(false, |last| sensor_of(last) == sensor_of(&row));
            run = if same { run + 1 } else { 1 };
            if run <= per_sensor {
                kept.push(row);
            }
        }
        kept
    }
}

/// One row read from the raw sensor table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawPointRow {
    pub sensor_id: String,
    pub timestamp: i64,
    pub value: f64,
}

/// One merged bucket read from a downsampling view
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollupPointRow {
    pub sensor_id: String,
    /// Bucket start, epoch millis
    pub bucket: i64,
    pub sample_count: u64,
    pub avg_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub stddev_value: f64,
    /// Values at `downsample::QUANTILE_LEVELS`
    pub quantiles: Vec<f64>,
}

/// Size of one table as reported by the engine
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub rows: u64,
    pub bytes: u64,
}

/// Operations a telemetry cluster's analytics engine must support
#[async_trait]
pub trait TelemetryEngine: Send + Sync {
    /// Liveness probe
    async fn ping(&self) -> Result<()>;

    /// Execute one idempotent DDL statement
    async fn create_object(&self, object: &SchemaObject) -> Result<DdlOutcome>;

    /// Append one chunk of sensor readings as a single write
    async fn insert_readings(&self, rows: &[SensorReading]) -> Result<()>;

    /// Append one chunk of quality measurements
    async fn insert_quality(&self, rows: &[QualityMeasurement]) -> Result<()>;

    /// Append one chunk of production events
    async fn insert_events(&self, rows: &[ProductionEvent]) -> Result<()>;

    /// Set the resolution fields of an event. Returns false if no such event.
    async fn resolve_event(&self, event_id: &str, resolution: &EventResolution) -> Result<bool>;

    /// Raw rows ordered by (sensor_id, timestamp), capped at `query.limit`
    async fn query_raw(&self, query: &SeriesQuery) -> Result<Vec<RawPointRow>>;

    /// Buckets ordered by (sensor_id, bucket), capped at `query.limit`
    async fn query_rollup(
        &self,
        granularity: Granularity,
        query: &SeriesQuery,
    ) -> Result<Vec<RollupPointRow>>;

    /// Rows of `table` with a timestamp inside `range`
    async fn count_rows(&self, table: TableKind, range: TimeRange) -> Result<u64>;

    /// Sum of bucket sample counts for buckets starting inside `range`
    async fn rollup_sample_count(&self, granularity: Granularity, range: TimeRange) -> Result<u64>;

    async fn table_stats(&self, table: TableKind) -> Result<TableStats>;

    /// True when no replica reports itself read-only or expired
    async fn replication_healthy(&self) -> Result<bool>;

    /// Release client resources. The handle must not be used afterwards.
    async fn close(&self);
}
