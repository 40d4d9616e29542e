//! Schema registry for telemetry clusters
//!
//! Declares the physical layout of the three telemetry tables and the two
//! downsampling views. Layout rules:
//!
//! - Partition by `(facility_id, toStartOfMonth(timestamp))` so each tenant's
//!   month is colocated and evicted together.
//! - Order by `(facility_id, production_line, [batch_id], identifier, timestamp)`
//!   because line + sensor + time range scans dominate.
//! - Age-based TTL rules move data between volumes and never delete it.

mod retention;
mod tables;

pub use retention::{RetentionPolicy, StorageTier};
pub use tables::{
    ColumnDefinition, ColumnType, TableDefinition, TableKind, FACILITY_ID_FIELD,
    LOW_CARDINALITY_METADATA, PRODUCTION_LINE_FIELD, SENSOR_ID_FIELD, TIMESTAMP_FIELD,
    VALUE_FIELD,
};

use crate::clock::BoundedClock;
use crate::downsample::Granularity;
use crate::engine::TelemetryEngine;
use crate::{Error, Result};
use serde::Serialize;
use tracing::{debug, info};

/// What a DDL statement creates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaObjectKind {
    Table,
    /// Target table holding aggregate states for a view
    RollupTable,
    MaterializedView,
}

/// One named, idempotently creatable schema object
#[derive(Debug, Clone, Serialize)]
pub struct SchemaObject {
    pub name: String,
    pub kind: SchemaObjectKind,
    pub ddl: String,
}

/// Result of executing one schema object's DDL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOutcome {
    Created,
    AlreadyExists,
}

/// Summary of a registry application against one cluster
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaReport {
    pub created: Vec<String>,
    pub existing: Vec<String>,
}

impl SchemaReport {
    pub fn total(&self) -> usize {
        self.created.len() + self.existing.len()
    }
}

/// Registry of every table and view a telemetry cluster needs
#[derive(Debug, Clone)]
pub struct SchemaRegistry {
    tables: Vec<TableDefinition>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            tables: TableKind::ALL
                .iter()
                .map(|kind| TableDefinition::for_kind(*kind))
                .collect(),
        }
    }

    pub fn table(&self, kind: TableKind) -> &TableDefinition {
        // Built from TableKind::ALL, so declaration order matches the index.
        &self.tables[kind as usize]
    }

    pub fn tables(&self) -> &[TableDefinition] {
        &self.tables
    }

    /// All schema objects in creation order. Views come after the raw
    /// table they read from.
    pub fn objects(&self, database: &str) -> Vec<SchemaObject> {
        let mut objects: Vec<SchemaObject> = self
            .tables
            .iter()
            .map(|t| SchemaObject {
                name: t.name().to_string(),
                kind: SchemaObjectKind::Table,
                ddl: t.create_ddl(database),
            })
            .collect();

        for granularity in Granularity::ALL {
            objects.extend(granularity.schema_objects(database));
        }
        objects
    }

    /// Create every table and view on `engine`. Objects that already exist
    /// are reported, not treated as failures.
    pub async fn apply(
        &self,
        engine: &dyn TelemetryEngine,
        database: &str,
    ) -> Result<SchemaReport> {
        let mut report = SchemaReport::default();

        for object in self.objects(database) {
            let outcome = engine.create_object(&object).await.map_err(|e| match e {
                Error::Connectivity(_) | Error::Timeout(_) | Error::Schema(_) => e,
                other => Error::Schema(format!("creating {}: {}", object.name, other)),
            })?;

            match outcome {
                DdlOutcome::Created => {
                    debug!(object = %object.name, kind = ?object.kind, "Created schema object");
                    report.created.push(object.name);
                }
                DdlOutcome::AlreadyExists => report.existing.push(object.name),
            }
        }

        info!(
            database,
            created = report.created.len(),
            existing = report.existing.len(),
            "Schema registry applied"
        );
        Ok(report)
    }

    /// Tier a record of `kind` stamped `timestamp_ms` currently lives on.
    pub fn tier_of(&self, kind: TableKind, timestamp_ms: i64, clock: &BoundedClock) -> StorageTier {
        self.table(kind)
            .retention
            .tier_for_age(clock.age_days(timestamp_ms))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}
