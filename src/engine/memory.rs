//! In-memory telemetry engine for development and testing
//!
//! Sensor readings are held as Arrow record batches partitioned by
//! (facility, month), mirroring the physical layout a real cluster uses.
//! Downsampling views are kept as incremental bucket aggregates updated on
//! every insert once their view object exists.

use super::{RawPointRow, RollupPointRow, SeriesQuery, TableStats, TelemetryEngine};
use crate::downsample::{Granularity, RollupStore};
use crate::model::{EventResolution, ProductionEvent, QualityMeasurement, SensorReading, TimeRange};
use crate::schema::{
    DdlOutcome, SchemaObject, SchemaObjectKind, TableDefinition, TableKind, SENSOR_ID_FIELD,
    TIMESTAMP_FIELD, VALUE_FIELD,
};
use crate::{Error, Result};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float64Type, TimestampMillisecondType};
use arrow_array::{
    ArrayRef, Float64Array, RecordBatch, StringArray, TimestampMillisecondArray, UInt32Array,
};
use arrow_schema::SchemaRef;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// (facility_id, month start in epoch millis)
type PartitionKey = (u32, i64);

/// Switches for simulating engine failures in tests
#[derive(Debug, Default)]
pub struct MemoryEngineFaults {
    unreachable: AtomicBool,
    /// Inserts still allowed to succeed before every insert fails
    insert_budget: Mutex<Option<usize>>,
    ddl_error: Mutex<Option<String>>,
    latency: Mutex<Option<Duration>>,
    replication_broken: AtomicBool,
}

impl MemoryEngineFaults {
    /// Every operation, including `ping`, fails with a connectivity error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Let `successful` more inserts through, then fail every insert.
    pub fn fail_inserts_after(&self, successful: usize) {
        *self.insert_budget.lock() = Some(successful);
    }

    pub fn clear_insert_failures(&self) {
        *self.insert_budget.lock() = None;
    }

    /// Reject every DDL statement with a schema error.
    pub fn fail_ddl(&self, message: impl Into<String>) {
        *self.ddl_error.lock() = Some(message.into());
    }

    pub fn clear_ddl_failure(&self) {
        *self.ddl_error.lock() = None;
    }

    /// Delay applied before every operation
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    pub fn set_replication_broken(&self, broken: bool) {
        self.replication_broken.store(broken, Ordering::SeqCst);
    }

    fn take_insert_permit(&self) -> Result<()> {
        let mut budget = self.insert_budget.lock();
        match budget.as_mut() {
            None => Ok(()),
            Some(0) => Err(Error::Connectivity("connection reset during insert".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
        }
    }
}

/// In-memory engine
#[derive(Debug)]
pub struct MemoryEngine {
    /// Created schema objects by name
    objects: DashMap<String, SchemaObjectKind>,
    sensor_schema: SchemaRef,
    readings: RwLock<BTreeMap<PartitionKey, Vec<RecordBatch>>>,
    quality: RwLock<Vec<QualityMeasurement>>,
    events: RwLock<Vec<ProductionEvent>>,
    rollups: RwLock<HashMap<Granularity, RollupStore>>,
    faults: MemoryEngineFaults,
    /// Size of every acknowledged insert, in arrival order
    insert_log: Mutex<Vec<usize>>,
    closes: AtomicUsize,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self {
            objects: DashMap::new(),
            sensor_schema: TableDefinition::for_kind(TableKind::SensorReadings).arrow_schema(),
            readings: RwLock::new(BTreeMap::new()),
            quality: RwLock::new(Vec::new()),
            events: RwLock::new(Vec::new()),
            rollups: RwLock::new(HashMap::new()),
            faults: MemoryEngineFaults::default(),
            insert_log: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    pub fn faults(&self) -> &MemoryEngineFaults {
        &self.faults
    }

    pub fn has_object(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Sizes of acknowledged inserts, oldest first
    pub fn insert_log(&self) -> Vec<usize> {
        self.insert_log.lock().clone()
    }

    pub fn partition_count(&self) -> usize {
        self.readings.read().len()
    }

    pub fn reading_count(&self) -> usize {
        self.readings
            .read()
            .values()
            .flatten()
            .map(|b| b.num_rows())
            .sum()
    }

    /// Stored production events, in insert order
    pub fn events(&self) -> Vec<ProductionEvent> {
        self.events.read().clone()
    }

    pub fn event(&self, event_id: &str) -> Option<ProductionEvent> {
        self.events
            .read()
            .iter()
            .find(|e| e.event_id == event_id)
            .cloned()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> Result<()> {
        let latency = *self.faults.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.faults.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Connectivity("engine unreachable".to_string()));
        }
        Ok(())
    }

    fn require_object(&self, name: &str) -> Result<()> {
        if self.objects.contains_key(name) {
            Ok(())
        } else {
            Err(Error::Schema(format!("table {} does not exist", name)))
        }
    }

    fn build_batch(&self, rows: &[&SensorReading]) -> Result<RecordBatch> {
        let strings = |f: fn(&SensorReading) -> &str| -> ArrayRef {
            Arc::new(StringArray::from_iter_values(rows.iter().map(|r| f(r))))
        };

        let columns: Vec<ArrayRef> = vec![
            Arc::new(UInt32Array::from_iter_values(rows.iter().map(|r| r.facility_id))),
            strings(|r| &r.production_line),
            strings(|r| &r.sensor_id),
            strings(|r| r.sensor_type.as_str()),
            Arc::new(
                TimestampMillisecondArray::from_iter_values(rows.iter().map(|r| r.timestamp))
                    .with_timezone("UTC"),
            ),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.value))),
            strings(|r| &r.unit),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r.quality_score))),
            strings(|r| r.status.as_str()),
            strings(|r| r.batch_id_str()),
            strings(|r| r.operator_id_str()),
            strings(|r| r.shift_id_str()),
        ];

        Ok(RecordBatch::try_new(self.sensor_schema.clone(), columns)?)
    }

    fn scan_batch(
        batch: &RecordBatch,
        sensors: &HashSet<String>,
        range: TimeRange,
        out: &mut Vec<RawPointRow>,
    ) -> Result<()> {
        let schema = batch.schema();
        let sensor_ids = batch
            .column(schema.index_of(SENSOR_ID_FIELD)?)
            .as_string_opt::<i32>()
            .ok_or_else(|| Error::Internal("sensor_id column is not utf8".to_string()))?;
        let timestamps = batch
            .column(schema.index_of(TIMESTAMP_FIELD)?)
            .as_primitive_opt::<TimestampMillisecondType>()
            .ok_or_else(|| Error::Internal("timestamp column is not a timestamp".to_string()))?;
        let values = batch
            .column(schema.index_of(VALUE_FIELD)?)
            .as_primitive_opt::<Float64Type>()
            .ok_or_else(|| Error::Internal("value column is not float64".to_string()))?;

        for i in 0..batch.num_rows() {
            let timestamp = timestamps.value(i);
            if !range.contains(timestamp) {
                continue;
            }
            let sensor_id = sensor_ids.value(i);
            if !sensors.contains(sensor_id) {
                continue;
            }
            out.push(RawPointRow {
                sensor_id: sensor_id.to_string(),
                timestamp,
                value: values.value(i),
            });
        }
        Ok(())
    }

    fn count_batch(batch: &RecordBatch, range: TimeRange) -> Result<u64> {
        let timestamps = batch
            .column(batch.schema().index_of(TIMESTAMP_FIELD)?)
            .as_primitive_opt::<TimestampMillisecondType>()
            .ok_or_else(|| Error::Internal("timestamp column is not a timestamp".to_string()))?;
        Ok(timestamps.values().iter().filter(|ts| range.contains(**ts)).count() as u64)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// First millisecond of the UTC month containing `timestamp_ms`
fn month_start(timestamp_ms: i64) -> i64 {
    DateTime::from_timestamp_millis(timestamp_ms)
        .and_then(|dt| NaiveDate::from_ymd_opt(dt.year(), dt.month(), 1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc().timestamp_millis())
        .unwrap_or(timestamp_ms)
}

#[async_trait]
impl TelemetryEngine for MemoryEngine {
    async fn ping(&self) -> Result<()> {
        self.enter().await
    }

    async fn create_object(&self, object: &SchemaObject) -> Result<DdlOutcome> {
        self.enter().await?;
        if let Some(message) = self.faults.ddl_error.lock().clone() {
            return Err(Error::Schema(format!("{}: {}", object.name, message)));
        }
        if self.objects.contains_key(&object.name) {
            return Ok(DdlOutcome::AlreadyExists);
        }

        if object.kind == SchemaObjectKind::MaterializedView {
            let granularity = Granularity::ALL
                .into_iter()
                .find(|g| g.view_name() == object.name)
                .ok_or_else(|| Error::Schema(format!("unknown view {}", object.name)))?;
            self.rollups
                .write()
                .insert(granularity, RollupStore::new(granularity));
        }
        self.objects.insert(object.name.clone(), object.kind);
        Ok(DdlOutcome::Created)
    }

    async fn insert_readings(&self, rows: &[SensorReading]) -> Result<()> {
        self.enter().await?;
        self.require_object(TableKind::SensorReadings.table_name())?;
        self.faults.take_insert_permit()?;

        let mut grouped: BTreeMap<PartitionKey, Vec<&SensorReading>> = BTreeMap::new();
        for row in rows {
            grouped
                .entry((row.facility_id, month_start(row.timestamp)))
                .or_default()
                .push(row);
        }
        // Build everything before publishing so a chunk lands whole or not at all
        let batches = grouped
            .into_iter()
            .map(|(key, rows)| Ok((key, self.build_batch(&rows)?)))
            .collect::<Result<Vec<_>>>()?;

        {
            let mut readings = self.readings.write();
            for (key, batch) in batches {
                readings.entry(key).or_default().push(batch);
            }
        }
        {
            let mut rollups = self.rollups.write();
            for store in rollups.values_mut() {
                rows.iter().for_each(|r| store.apply(r));
            }
        }

        self.insert_log.lock().push(rows.len());
        debug!(rows = rows.len(), "Inserted sensor readings");
        Ok(())
    }

    async fn insert_quality(&self, rows: &[QualityMeasurement]) -> Result<()> {
        self.enter().await?;
        self.require_object(TableKind::QualityMeasurements.table_name())?;
        self.faults.take_insert_permit()?;
        self.quality.write().extend_from_slice(rows);
        self.insert_log.lock().push(rows.len());
        Ok(())
    }

    async fn insert_events(&self, rows: &[ProductionEvent]) -> Result<()> {
        self.enter().await?;
        self.require_object(TableKind::ProductionEvents.table_name())?;
        self.faults.take_insert_permit()?;
        self.events.write().extend_from_slice(rows);
        self.insert_log.lock().push(rows.len());
        Ok(())
    }

    async fn resolve_event(&self, event_id: &str, resolution: &EventResolution) -> Result<bool> {
        self.enter().await?;
        self.require_object(TableKind::ProductionEvents.table_name())?;

        let mut events = self.events.write();
        let mut found = false;
        for event in events.iter_mut().filter(|e| e.event_id == event_id) {
            event.resolve(resolution.clone())?;
            found = true;
        }
        Ok(found)
    }

    async fn query_raw(&self, query: &SeriesQuery) -> Result<Vec<RawPointRow>> {
        self.enter().await?;
        self.require_object(TableKind::SensorReadings.table_name())?;

        let sensors = query.sensor_set();
        let first_month = month_start(query.range.start);
        let mut rows = Vec::new();
        {
            let readings = self.readings.read();
            for ((_, month), batches) in readings.iter() {
                if *month < first_month || *month > query.range.end {
                    continue;
                }
                for batch in batches {
                    Self::scan_batch(batch, &sensors, query.range, &mut rows)?;
                }
            }
        }

        rows.sort_by(|a, b| {
            a.sensor_id
                .cmp(&b.sensor_id)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        Ok(query.cap(rows, |r| r.sensor_id.as_str()))
    }

    async fn query_rollup(
        &self,
        granularity: Granularity,
        query: &SeriesQuery,
    ) -> Result<Vec<RollupPointRow>> {
        self.enter().await?;
        let rollups = self.rollups.read();
        let store = rollups.get(&granularity).ok_or_else(|| {
            Error::Schema(format!("table {} does not exist", granularity.table_name()))
        })?;
        let rows = store.query(&query.sensor_set(), query.range);
        Ok(query.cap(rows, |r| r.sensor_id.as_str()))
    }

    async fn count_rows(&self, table: TableKind, range: TimeRange) -> Result<u64> {
        self.enter().await?;
        self.require_object(table.table_name())?;
        match table {
            TableKind::SensorReadings => {
                let readings = self.readings.read();
                let mut total = 0;
                for batch in readings.values().flatten() {
                    total += Self::count_batch(batch, range)?;
                }
                Ok(total)
            }
            TableKind::QualityMeasurements => Ok(self
                .quality
                .read()
                .iter()
                .filter(|m| range.contains(m.timestamp))
                .count() as u64),
            TableKind::ProductionEvents => Ok(self
                .events
                .read()
                .iter()
                .filter(|e| range.contains(e.timestamp))
                .count() as u64),
        }
    }

    async fn rollup_sample_count(&self, granularity: Granularity, range: TimeRange) -> Result<u64> {
        self.enter().await?;
        let rollups = self.rollups.read();
        rollups
            .get(&granularity)
            .map(|store| store.sample_count(range))
            .ok_or_else(|| {
                Error::Schema(format!("table {} does not exist", granularity.table_name()))
            })
    }

    async fn table_stats(&self, table: TableKind) -> Result<TableStats> {
        self.enter().await?;
        self.require_object(table.table_name())?;
        let stats = match table {
            TableKind::SensorReadings => {
                let readings = self.readings.read();
                readings.values().flatten().fold(TableStats::default(), |acc, b| TableStats {
                    rows: acc.rows + b.num_rows() as u64,
                    bytes: acc.bytes + b.get_array_memory_size() as u64,
                })
            }
            TableKind::QualityMeasurements => {
                let rows = self.quality.read().len() as u64;
                TableStats {
                    rows,
                    bytes: rows * std::mem::size_of::<QualityMeasurement>() as u64,
                }
            }
            TableKind::ProductionEvents => {
                let rows = self.events.read().len() as u64;
                TableStats {
                    rows,
                    bytes: rows * std::mem::size_of::<ProductionEvent>() as u64,
                }
            }
        };
        Ok(stats)
    }

    async fn replication_healthy(&self) -> Result<bool> {
        self.enter().await?;
        Ok(!self.faults.replication_broken.load(Ordering::SeqCst))
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        debug!("Memory engine handle closed");
    }
}
