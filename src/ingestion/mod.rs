//! Ingestion pipeline
//!
//! Records are validated and normalized up front, then written in fixed-size
//! chunks through the cluster's admin connection. Chunk N is only sent once
//! chunk N-1 is acknowledged. A failed chunk stops the call with
//! [`Error::PartialBatch`]; chunks already acknowledged stay committed, so the
//! caller resumes from the reported chunk.

mod telemetry;

use crate::connection::{ConnectionManager, Principal};
use crate::control_plane::{require_active, ControlPlaneStore};
use crate::engine::TelemetryEngine;
use crate::model::{EventResolution, ProductionEvent, QualityMeasurement, SensorReading};
use crate::schema::TableKind;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Records per chunk write
pub const CHUNK_SIZE: usize = 10_000;

/// Configuration for the ingestion pipeline
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    pub chunk_size: usize,
    /// Deadline for acknowledging one chunk
    pub write_timeout: Duration,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            write_timeout: Duration::from_secs(30),
        }
    }
}

/// Outcome of a fully acknowledged ingestion call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub records: usize,
    pub chunks: usize,
}

/// A record type that can be written through the pipeline
#[async_trait]
trait IngestRecord: Send + Sync + Sized {
    const TABLE: TableKind;

    fn validate(&self) -> Result<()>;

    fn normalize(&mut self);

    async fn write(engine: &dyn TelemetryEngine, rows: &[Self]) -> Result<()>;
}

#[async_trait]
impl IngestRecord for SensorReading {
    const TABLE: TableKind = TableKind::SensorReadings;

    fn validate(&self) -> Result<()> {
        SensorReading::validate(self)
    }

    fn normalize(&mut self) {
        SensorReading::normalize(self)
    }

    async fn write(engine: &dyn TelemetryEngine, rows: &[Self]) -> Result<()> {
        engine.insert_readings(rows).await
    }
}

#[async_trait]
impl IngestRecord for QualityMeasurement {
    const TABLE: TableKind = TableKind::QualityMeasurements;

    fn validate(&self) -> Result<()> {
        QualityMeasurement::validate(self)
    }

    fn normalize(&mut self) {
        QualityMeasurement::normalize(self)
    }

    async fn write(engine: &dyn TelemetryEngine, rows: &[Self]) -> Result<()> {
        engine.insert_quality(rows).await
    }
}

#[async_trait]
impl IngestRecord for ProductionEvent {
    const TABLE: TableKind = TableKind::ProductionEvents;

    fn validate(&self) -> Result<()> {
        ProductionEvent::validate(self)
    }

    fn normalize(&mut self) {
        ProductionEvent::normalize(self)
    }

    async fn write(engine: &dyn TelemetryEngine, rows: &[Self]) -> Result<()> {
        engine.insert_events(rows).await
    }
}

/// Chunked writer for telemetry records
pub struct IngestionPipeline {
    store: Arc<dyn ControlPlaneStore>,
    connections: Arc<ConnectionManager>,
    config: IngestionConfig,
}

impl IngestionPipeline {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        connections: Arc<ConnectionManager>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            store,
            connections,
            config,
        }
    }

    fn chunk_size(&self) -> usize {
        self.config.chunk_size.max(1)
    }

    /// Offset into the original batch where a retry after `err` should start.
    pub fn resume_offset(&self, err: &Error) -> Option<usize> {
        err.resume_point()
            .map(|(chunk_index, _)| chunk_index * self.chunk_size())
    }

    pub async fn ingest_readings(
        &self,
        cluster_id: &str,
        readings: Vec<SensorReading>,
    ) -> Result<IngestReport> {
        self.ingest_records(cluster_id, readings).await
    }

    pub async fn ingest_quality(
        &self,
        cluster_id: &str,
        measurements: Vec<QualityMeasurement>,
    ) -> Result<IngestReport> {
        self.ingest_records(cluster_id, measurements).await
    }

    pub async fn ingest_events(
        &self,
        cluster_id: &str,
        events: Vec<ProductionEvent>,
    ) -> Result<IngestReport> {
        self.ingest_records(cluster_id, events).await
    }

    async fn ingest_records<R: IngestRecord>(
        &self,
        cluster_id: &str,
        mut records: Vec<R>,
    ) -> Result<IngestReport> {
        let table = R::TABLE.table_name();
        if records.is_empty() {
            debug!(cluster_id, table, "Empty ingestion batch, nothing to write");
            return Ok(IngestReport::default());
        }

        for (index, record) in records.iter().enumerate() {
            record.validate().map_err(|e| match e {
                Error::InvalidInput(msg) => {
                    Error::InvalidInput(format!("record {}: {}", index, msg))
                }
                other => other,
            })?;
        }
        records.iter_mut().for_each(R::normalize);

        let cluster = require_active(self.store.as_ref(), cluster_id).await?;
        let conn = self
            .connections
            .acquire_for_cluster(&cluster, Principal::Admin)
            .await?;

        let started = Instant::now();
        let mut report = IngestReport::default();
        for (chunk_index, chunk) in records.chunks(self.chunk_size()).enumerate() {
            let chunk_started = Instant::now();
            let written = conn
                .run_with_timeout(
                    "insert",
                    self.config.write_timeout,
                    R::write(conn.engine(), chunk),
                )
                .await;
            let elapsed = chunk_started.elapsed().as_secs_f64();

            if let Err(e) = written {
                warn!(
                    cluster_id,
                    table,
                    chunk_index,
                    records_in_chunk = chunk.len(),
                    committed_chunks = report.chunks,
                    error = %e,
                    "Chunk write failed"
                );
                telemetry::record_chunk(table, "failed", chunk.len(), elapsed);
                telemetry::record_request(table, "partial");
                return Err(Error::PartialBatch {
                    chunk_index,
                    records_in_chunk: chunk.len(),
                    committed_chunks: report.chunks,
                    source: Box::new(e),
                });
            }

            telemetry::record_chunk(table, "ok", chunk.len(), elapsed);
            debug!(cluster_id, table, chunk_index, records = chunk.len(), "Chunk acknowledged");
            report.chunks += 1;
            report.records += chunk.len();
        }

        telemetry::record_request(table, "ok");
        telemetry::record_batch_duration(table, started.elapsed().as_secs_f64());
        info!(
            cluster_id,
            table,
            records = report.records,
            chunks = report.chunks,
            "Ingestion complete"
        );
        Ok(report)
    }

    /// Set the resolution fields of a production event. Nothing else on an
    /// event is mutable.
    pub async fn resolve_event(
        &self,
        cluster_id: &str,
        event_id: &str,
        resolution: EventResolution,
    ) -> Result<()> {
        if event_id.trim().is_empty() || resolution.resolved_by.trim().is_empty() {
            return Err(Error::InvalidInput(
                "event id and resolved_by are required".to_string(),
            ));
        }
        let cluster = require_active(self.store.as_ref(), cluster_id).await?;
        let conn = self
            .connections
            .acquire_for_cluster(&cluster, Principal::Admin)
            .await?;

        let found = conn
            .run("resolve_event", conn.engine().resolve_event(event_id, &resolution))
            .await?;
        if !found {
            return Err(Error::InvalidInput(format!("event {} not found", event_id)));
        }
        info!(cluster_id, event_id, resolved_by = %resolution.resolved_by, "Event resolved");
        Ok(())
    }
}
