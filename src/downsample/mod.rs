//! Downsampling views
//!
//! Two continuously maintained rollups derive from raw sensor readings,
//! grouped by facility, line, sensor, and time bucket: 1-minute and 1-hour.
//! The engine updates them on every insert; nothing recomputes them in batch.

mod aggregate;

pub use aggregate::{BucketAggregate, RollupKey, RollupStore};

use crate::connection::{ConnectionManager, Principal};
use crate::control_plane::{require_active, ControlPlaneStore};
use crate::model::TimeRange;
use crate::schema::{RetentionPolicy, SchemaObject, SchemaObjectKind, TableKind};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Quantile levels stored per bucket
pub const QUANTILE_LEVELS: [f64; 4] = [0.5, 0.9, 0.95, 0.99];

/// Bucket width of a downsampling view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Minute,
    Hour,
}

impl Granularity {
    pub const ALL: [Granularity; 2] = [Granularity::Minute, Granularity::Hour];

    pub fn bucket_millis(&self) -> i64 {
        match self {
            Granularity::Minute => 60_000,
            Granularity::Hour => 3_600_000,
        }
    }

    /// Rollup table holding the aggregate states
    pub fn table_name(&self) -> &'static str {
        match self {
            Granularity::Minute => "sensor_readings_1m",
            Granularity::Hour => "sensor_readings_1h",
        }
    }

    pub fn view_name(&self) -> &'static str {
        match self {
            Granularity::Minute => "sensor_readings_1m_mv",
            Granularity::Hour => "sensor_readings_1h_mv",
        }
    }

    fn bucket_fn(&self) -> &'static str {
        match self {
            Granularity::Minute => "toStartOfMinute",
            Granularity::Hour => "toStartOfHour",
        }
    }

    pub fn bucket_start(&self, timestamp_ms: i64) -> i64 {
        let width = self.bucket_millis();
        timestamp_ms.div_euclid(width) * width
    }

    fn quantile_args() -> String {
        QUANTILE_LEVELS
            .iter()
            .map(|q| q.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Rollup table DDL followed by the materialized view feeding it
    pub fn schema_objects(&self, database: &str) -> Vec<SchemaObject> {
        let quantiles = Self::quantile_args();
        let raw = TableKind::SensorReadings.table_name();

        let table_ddl = format!(
            "CREATE TABLE IF NOT EXISTS {db}.{table}\n(\n\
             \x20   facility_id UInt32,\n\
             \x20   production_line LowCardinality(String),\n\
             \x20   sensor_id String,\n\
             \x20   bucket DateTime('UTC'),\n\
             \x20   count_state AggregateFunction(count),\n\
             \x20   avg_state AggregateFunction(avg, Float64),\n\
             \x20   min_state AggregateFunction(min, Float64),\n\
             \x20   max_state AggregateFunction(max, Float64),\n\
             \x20   stddev_state AggregateFunction(stddevPop, Float64),\n\
             \x20   quantiles_state AggregateFunction(quantiles({quantiles}), Float64)\n\
             )\n\
             ENGINE = AggregatingMergeTree()\n\
             PARTITION BY (facility_id, toStartOfMonth(bucket))\n\
             ORDER BY (facility_id, production_line, sensor_id, bucket)\n\
             TTL {ttl}\n\
             SETTINGS storage_policy = 'tiered', index_granularity = 8192",
            db = database,
            table = self.table_name(),
            quantiles = quantiles,
            ttl = RetentionPolicy::SENSOR.ttl_clause("bucket"),
        );

        let view_ddl = format!(
            "CREATE MATERIALIZED VIEW IF NOT EXISTS {db}.{view}\n\
             TO {db}.{table}\n\
             AS SELECT\n\
             \x20   facility_id,\n\
             \x20   production_line,\n\
             \x20   sensor_id,\n\
             \x20   {bucket_fn}(timestamp) AS bucket,\n\
             \x20   countState() AS count_state,\n\
             \x20   avgState(value) AS avg_state,\n\
             \x20   minState(value) AS min_state,\n\
             \x20   maxState(value) AS max_state,\n\
             \x20   stddevPopState(value) AS stddev_state,\n\
             \x20   quantilesState({quantiles})(value) AS quantiles_state\n\
             FROM {db}.{raw}\n\
             GROUP BY facility_id, production_line, sensor_id, bucket",
            db = database,
            view = self.view_name(),
            table = self.table_name(),
            bucket_fn = self.bucket_fn(),
            quantiles = quantiles,
            raw = raw,
        );

        vec![
            SchemaObject {
                name: self.table_name().to_string(),
                kind: SchemaObjectKind::RollupTable,
                ddl: table_ddl,
            },
            SchemaObject {
                name: self.view_name().to_string(),
                kind: SchemaObjectKind::MaterializedView,
                ddl: view_ddl,
            },
        ]
    }
}

impl std::fmt::Display for Granularity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Granularity::Minute => f.write_str("1m"),
            Granularity::Hour => f.write_str("1h"),
        }
    }
}

/// Raw row count versus summed bucket counts over an hour-aligned window
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub range: TimeRange,
    pub raw_rows: u64,
    pub minute_rows: u64,
    pub hour_rows: u64,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.raw_rows == self.minute_rows && self.raw_rows == self.hour_rows
    }
}

/// Verifies that the rollup views track raw ingestion
pub struct DownsamplingMaintainer {
    connections: Arc<ConnectionManager>,
    store: Arc<dyn ControlPlaneStore>,
}

impl DownsamplingMaintainer {
    pub fn new(connections: Arc<ConnectionManager>, store: Arc<dyn ControlPlaneStore>) -> Self {
        Self { connections, store }
    }

    /// Widen `range` to whole hours so both views cover exactly the same rows.
    pub fn align(range: TimeRange) -> TimeRange {
        let hour = Granularity::Hour.bucket_millis();
        let start = Granularity::Hour.bucket_start(range.start);
        let end = Granularity::Hour.bucket_start(range.end) + hour - 1;
        TimeRange::new(start, end)
    }

    pub async fn check_consistency(
        &self,
        cluster_id: &str,
        range: TimeRange,
    ) -> Result<ConsistencyReport> {
        let cluster = require_active(self.store.as_ref(), cluster_id).await?;
        let conn = self
            .connections
            .acquire_for_cluster(&cluster, Principal::ReadOnly)
            .await?;
        let range = Self::align(range);

        let raw_rows = conn
            .run("count_raw", conn.engine().count_rows(TableKind::SensorReadings, range))
            .await?;
        let minute_rows = conn
            .run(
                "count_rollup_1m",
                conn.engine().rollup_sample_count(Granularity::Minute, range),
            )
            .await?;
        let hour_rows = conn
            .run(
                "count_rollup_1h",
                conn.engine().rollup_sample_count(Granularity::Hour, range),
            )
            .await?;

        let report = ConsistencyReport {
            range,
            raw_rows,
            minute_rows,
            hour_rows,
        };
        if report.is_consistent() {
            info!(cluster_id, raw_rows, "Downsampling views consistent");
        } else {
            warn!(
                cluster_id,
                raw_rows, minute_rows, hour_rows, "Downsampling views diverge from raw table"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_start() {
        assert_eq!(Granularity::Minute.bucket_start(119_999), 60_000);
        assert_eq!(Granularity::Hour.bucket_start(3_600_001), 3_600_000);
        assert_eq!(Granularity::Minute.bucket_start(-1), -60_000);
    }

    #[test]
    fn test_view_ddl_is_incremental() {
        let objects = Granularity::Hour.schema_objects("plant");
        assert_eq!(objects.len(), 2);
        assert!(objects[0].ddl.contains("AggregatingMergeTree"));
        assert!(objects[0].ddl.contains("quantiles(0.5, 0.9, 0.95, 0.99)"));
        assert!(objects[1]
            .ddl
            .starts_with("CREATE MATERIALIZED VIEW IF NOT EXISTS plant.sensor_readings_1h_mv"));
        assert!(objects[1].ddl.contains("toStartOfHour(timestamp)"));
        assert!(objects[1].ddl.contains("stddevPopState(value)"));
    }

    #[test]
    fn test_align_to_hours() {
        let aligned = DownsamplingMaintainer::align(TimeRange::new(3_600_500, 7_300_000));
        assert_eq!(aligned.start, 3_600_000);
        assert_eq!(aligned.end, 3 * 3_600_000 - 1);
    }
}
