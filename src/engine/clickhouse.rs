//! ClickHouse-backed telemetry engine

use super::{RawPointRow, RollupPointRow, SeriesQuery, TableStats, TelemetryEngine};
use crate::connection::ConnectionConfig;
use crate::downsample::{Granularity, QUANTILE_LEVELS};
use crate::model::{EventResolution, ProductionEvent, QualityMeasurement, SensorReading, TimeRange};
use crate::schema::{DdlOutcome, SchemaObject, TableKind};
use crate::{Error, Result};
use ::clickhouse::{error::Error as ChError, Client, Row};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// ClickHouse server error code for TABLE_ALREADY_EXISTS
const TABLE_ALREADY_EXISTS: &str = "Code: 57";

#[derive(Row, Serialize)]
struct SensorReadingRow<'a> {
    facility_id: u32,
    production_line: &'a str,
    sensor_id: &'a str,
    sensor_type: &'a str,
    timestamp: i64,
    value: f64,
    unit: &'a str,
    quality_score: f64,
    status: &'a str,
    batch_id: &'a str,
    operator_id: &'a str,
    shift_id: &'a str,
}

impl<'a> From<&'a SensorReading> for SensorReadingRow<'a> {
    fn from(r: &'a SensorReading) -> Self {
        Self {
            facility_id: r.facility_id,
            production_line: &r.production_line,
            sensor_id: &r.sensor_id,
            sensor_type: r.sensor_type.as_str(),
            timestamp: r.timestamp,
            value: r.value,
            unit: &r.unit,
            quality_score: r.quality_score,
            status: r.status.as_str(),
            batch_id: r.batch_id_str(),
            operator_id: r.operator_id_str(),
            shift_id: r.shift_id_str(),
        }
    }
}

#[derive(Row, Serialize)]
struct QualityRow<'a> {
    measurement_id: &'a str,
    facility_id: u32,
    production_line: &'a str,
    batch_id: &'a str,
    timestamp: i64,
    measurement_type: &'a str,
    measured_value: f64,
    target_value: f64,
    upper_tolerance: f64,
    lower_tolerance: f64,
    verdict: &'a str,
    inspector_id: &'a str,
    equipment_id: &'a str,
    environmental_conditions: String,
    process_parameters: String,
    supplier_id: &'a str,
    material_lot: &'a str,
}

impl<'a> QualityRow<'a> {
    fn try_from_measurement(m: &'a QualityMeasurement) -> Result<Self> {
        Ok(Self {
            measurement_id: &m.measurement_id,
            facility_id: m.facility_id,
            production_line: &m.production_line,
            batch_id: &m.batch_id,
            timestamp: m.timestamp,
            measurement_type: &m.measurement_type,
            measured_value: m.measured_value,
            target_value: m.target_value,
            upper_tolerance: m.upper_tolerance,
            lower_tolerance: m.lower_tolerance,
            verdict: m.verdict.as_str(),
            inspector_id: &m.inspector_id,
            equipment_id: &m.equipment_id,
            environmental_conditions: serde_json::to_string(&m.environmental_conditions)?,
            process_parameters: serde_json::to_string(&m.process_parameters)?,
            supplier_id: &m.supplier_id,
            material_lot: &m.material_lot,
        })
    }
}

#[derive(Row, Serialize)]
struct EventRow<'a> {
    event_id: &'a str,
    facility_id: u32,
    production_line: &'a str,
    timestamp: i64,
    event_type: &'a str,
    category: &'a str,
    severity: &'a str,
    description: &'a str,
    operator_id: &'a str,
    equipment_id: &'a str,
    duration_seconds: Option<u64>,
    resolved_at: Option<i64>,
    resolved_by: &'a str,
    resolution_notes: &'a str,
}

impl<'a> From<&'a ProductionEvent> for EventRow<'a> {
    fn from(e: &'a ProductionEvent) -> Self {
        Self {
            event_id: &e.event_id,
            facility_id: e.facility_id,
            production_line: &e.production_line,
            timestamp: e.timestamp,
            event_type: e.event_type.as_str(),
            category: &e.category,
            severity: e.severity.as_str(),
            description: &e.description,
            operator_id: &e.operator_id,
            equipment_id: &e.equipment_id,
            duration_seconds: e.duration_seconds,
            resolved_at: e.resolution.as_ref().map(|r| r.resolved_at),
            resolved_by: e.resolution.as_ref().map(|r| r.resolved_by.as_str()).unwrap_or(""),
            resolution_notes: e.resolution.as_ref().map(|r| r.notes.as_str()).unwrap_or(""),
        }
    }
}

#[derive(Row, Deserialize)]
struct RawRow {
    sensor_id: String,
    timestamp: i64,
    value: f64,
}

#[derive(Row, Deserialize)]
struct RollupRow {
    sensor_id: String,
    bucket_ms: i64,
    sample_count: u64,
    avg_value: f64,
    min_value: f64,
    max_value: f64,
    stddev_value: f64,
    quantiles: Vec<f64>,
}

#[derive(Row, Deserialize)]
struct PartsRow {
    rows: u64,
    bytes: u64,
}

impl From<RawRow> for RawPointRow {
    fn from(r: RawRow) -> Self {
        Self {
            sensor_id: r.sensor_id,
            timestamp: r.timestamp,
            value: r.value,
        }
    }
}

impl From<RollupRow> for RollupPointRow {
    fn from(r: RollupRow) -> Self {
        Self {
            sensor_id: r.sensor_id,
            bucket: r.bucket_ms,
            sample_count: r.sample_count,
            avg_value: r.avg_value,
            min_value: r.min_value,
            max_value: r.max_value,
            stddev_value: r.stddev_value,
            quantiles: r.quantiles,
        }
    }
}

/// Network-level failures are connectivity errors; everything else keeps
/// the client error.
fn classify(e: ChError) -> Error {
    match e {
        ChError::Network(_) | ChError::TimedOut => Error::Connectivity(e.to_string()),
        other => Error::ClickHouse(other),
    }
}

/// Telemetry engine speaking to a ClickHouse server over HTTP
#[derive(Clone)]
pub struct ClickHouseEngine {
    client: Client,
    database: String,
}

impl ClickHouseEngine {
    pub fn new(config: &ConnectionConfig) -> Self {
        let client = Client::default()
            .with_url(config.http_url())
            .with_user(&config.username)
            .with_password(&config.password)
            .with_database(&config.database);
        Self {
            client,
            database: config.database.clone(),
        }
    }

    fn table(&self, name: &str) -> String {
        format!("{}.{}", self.database, name)
    }

    async fn count(&self, sql: &str, range: TimeRange) -> Result<u64> {
        self.client
            .query(sql)
            .bind(range.start)
            .bind(range.end)
            .fetch_one::<u64>()
            .await
            .map_err(classify)
    }
}

#[async_trait]
impl TelemetryEngine for ClickHouseEngine {
    async fn ping(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn create_object(&self, object: &SchemaObject) -> Result<DdlOutcome> {
        let existing = self
            .client
            .query("SELECT count() FROM system.tables WHERE database = ? AND name = ?")
            .bind(&self.database)
            .bind(&object.name)
            .fetch_one::<u64>()
            .await
            .map_err(classify)?;
        if existing > 0 {
            return Ok(DdlOutcome::AlreadyExists);
        }

        match self.client.query(&object.ddl).execute().await {
            Ok(()) => Ok(DdlOutcome::Created),
            Err(ChError::BadResponse(msg)) if msg.contains(TABLE_ALREADY_EXISTS) => {
                Ok(DdlOutcome::AlreadyExists)
            }
            Err(e) => Err(classify(e)),
        }
    }

    async fn insert_readings(&self, rows: &[SensorReading]) -> Result<()> {
        let mut insert = self
            .client
            .insert(&self.table(TableKind::SensorReadings.table_name()))
            .map_err(classify)?;
        for row in rows {
            insert
                .write(&SensorReadingRow::from(row))
                .await
                .map_err(classify)?;
        }
        insert.end().await.map_err(classify)
    }

    async fn insert_quality(&self, rows: &[QualityMeasurement]) -> Result<()> {
        let converted = rows
            .iter()
            .map(QualityRow::try_from_measurement)
            .collect::<Result<Vec<_>>>()?;
        let mut insert = self
            .client
            .insert(&self.table(TableKind::QualityMeasurements.table_name()))
            .map_err(classify)?;
        for row in &converted {
            insert.write(row).await.map_err(classify)?;
        }
        insert.end().await.map_err(classify)
    }

    async fn insert_events(&self, rows: &[ProductionEvent]) -> Result<()> {
        let mut insert = self
            .client
            .insert(&self.table(TableKind::ProductionEvents.table_name()))
            .map_err(classify)?;
        for row in rows {
            insert.write(&EventRow::from(row)).await.map_err(classify)?;
        }
        insert.end().await.map_err(classify)
    }

    async fn resolve_event(&self, event_id: &str, resolution: &EventResolution) -> Result<bool> {
        let table = self.table(TableKind::ProductionEvents.table_name());
        let started_at = self
            .client
            .query(&format!(
                "SELECT toUnixTimestamp64Milli(timestamp) FROM {} WHERE event_id = ? LIMIT 1",
                table
            ))
            .bind(event_id)
            .fetch_optional::<i64>()
            .await
            .map_err(classify)?;

        let Some(started_at) = started_at else {
            return Ok(false);
        };
        if resolution.resolved_at < started_at {
            return Err(Error::InvalidInput(format!(
                "event {} resolved before it occurred",
                event_id
            )));
        }

        self.client
            .query(&format!(
                "ALTER TABLE {} UPDATE resolved_at = fromUnixTimestamp64Milli(toInt64(?)), \
                 resolved_by = ?, resolution_notes = ? WHERE event_id = ?",
                table
            ))
            .bind(resolution.resolved_at)
            .bind(&resolution.resolved_by)
            .bind(&resolution.notes)
            .bind(event_id)
            .execute()
            .await
            .map_err(classify)?;
        Ok(true)
    }

    async fn query_raw(&self, query: &SeriesQuery) -> Result<Vec<RawPointRow>> {
        let sql = format!(
            "SELECT sensor_id, toUnixTimestamp64Milli(timestamp), value \
             FROM {} \
             WHERE has(?, sensor_id) \
               AND timestamp >= fromUnixTimestamp64Milli(toInt64(?)) \
               AND timestamp <= fromUnixTimestamp64Milli(toInt64(?)) \
             ORDER BY sensor_id, timestamp \
             LIMIT ? BY sensor_id \
             LIMIT ?",
            self.table(TableKind::SensorReadings.table_name())
        );
        let rows = self
            .client
            .query(&sql)
            .bind(&query.sensor_ids)
            .bind(query.range.start)
            .bind(query.range.end)
            .bind(query.per_sensor_limit() as u64)
            .bind(query.limit as u64)
            .fetch_all::<RawRow>()
            .await
            .map_err(classify)?;
        debug!(rows = rows.len(), "Raw query complete");
        Ok(rows.into_iter().map(RawPointRow::from).collect())
    }

    async fn query_rollup(
        &self,
        granularity: Granularity,
        query: &SeriesQuery,
    ) -> Result<Vec<RollupPointRow>> {
        let levels = QUANTILE_LEVELS
            .iter()
            .map(|q| q.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT sensor_id, toInt64(toUnixTimestamp(bucket)) * 1000 AS bucket_ms, \
                    countMerge(count_state), avgMerge(avg_state), \
                    minMerge(min_state), maxMerge(max_state), \
                    stddevPopMerge(stddev_state), quantilesMerge({levels})(quantiles_state) \
             FROM {table} \
             WHERE has(?, sensor_id) \
               AND bucket >= toDateTime(toInt64(?)) \
               AND bucket <= toDateTime(toInt64(?)) \
             GROUP BY sensor_id, bucket \
             ORDER BY sensor_id, bucket \
             LIMIT ? BY sensor_id \
             LIMIT ?",
            levels = levels,
            table = self.table(granularity.table_name()),
        );
        let rows = self
            .client
            .query(&sql)
            .bind(&query.sensor_ids)
            .bind(granularity.bucket_start(query.range.start).div_euclid(1000))
            .bind(query.range.end.div_euclid(1000))
            .bind(query.per_sensor_limit() as u64)
            .bind(query.limit as u64)
            .fetch_all::<RollupRow>()
            .await
            .map_err(classify)?;
        debug!(granularity = %granularity, rows = rows.len(), "Rollup query complete");
        Ok(rows.into_iter().map(RollupPointRow::from).collect())
    }

    async fn count_rows(&self, table: TableKind, range: TimeRange) -> Result<u64> {
        let sql = format!(
            "SELECT count() FROM {} \
             WHERE timestamp >= fromUnixTimestamp64Milli(toInt64(?)) \
               AND timestamp <= fromUnixTimestamp64Milli(toInt64(?))",
            self.table(table.table_name())
        );
        self.count(&sql, range).await
    }

    async fn rollup_sample_count(&self, granularity: Granularity, range: TimeRange) -> Result<u64> {
        let sql = format!(
            "SELECT countMerge(count_state) FROM {} \
             WHERE bucket >= toDateTime(intDiv(toInt64(?), 1000)) \
               AND bucket <= toDateTime(intDiv(toInt64(?), 1000))",
            self.table(granularity.table_name())
        );
        self.count(&sql, range).await
    }

    async fn table_stats(&self, table: TableKind) -> Result<TableStats> {
        let parts = self
            .client
            .query(
                "SELECT sum(rows) AS rows, sum(bytes_on_disk) AS bytes \
                 FROM system.parts WHERE database = ? AND table = ? AND active",
            )
            .bind(&self.database)
            .bind(table.table_name())
            .fetch_one::<PartsRow>()
            .await
            .map_err(classify)?;
        Ok(TableStats {
            rows: parts.rows,
            bytes: parts.bytes,
        })
    }

    async fn replication_healthy(&self) -> Result<bool> {
        let degraded = self
            .client
            .query(
                "SELECT count() FROM system.replicas \
                 WHERE database = ? AND (is_readonly OR is_session_expired)",
            )
            .bind(&self.database)
            .fetch_one::<u64>()
            .await
            .map_err(classify)?;
        Ok(degraded == 0)
    }

    async fn close(&self) {
        // The HTTP client pools connections internally; dropping the handle frees them.
        debug!(database = %self.database, "ClickHouse handle released");
    }
}
