//! Telemetry table definitions
//!
//! Each table is declared once as a list of columns plus its partition key,
//! sort key, and retention policy. The same declaration renders both the
//! engine DDL and the Arrow schema used by the in-process engine.

use super::retention::RetentionPolicy;
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Standard field names shared across tables
pub const FACILITY_ID_FIELD: &str = "facility_id";
pub const PRODUCTION_LINE_FIELD: &str = "production_line";
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const SENSOR_ID_FIELD: &str = "sensor_id";
pub const VALUE_FIELD: &str = "value";

/// Arrow field metadata key marking a low-cardinality column
pub const LOW_CARDINALITY_METADATA: &str = "millwright.low_cardinality";

/// The three append-only telemetry tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    SensorReadings,
    QualityMeasurements,
    ProductionEvents,
}

impl TableKind {
    pub const ALL: [TableKind; 3] = [
        TableKind::SensorReadings,
        TableKind::QualityMeasurements,
        TableKind::ProductionEvents,
    ];

    pub fn table_name(&self) -> &'static str {
        match self {
            TableKind::SensorReadings => "sensor_readings",
            TableKind::QualityMeasurements => "quality_measurements",
            TableKind::ProductionEvents => "production_events",
        }
    }

    pub fn retention(&self) -> RetentionPolicy {
        match self {
            TableKind::SensorReadings => RetentionPolicy::SENSOR,
            TableKind::QualityMeasurements => RetentionPolicy::QUALITY,
            TableKind::ProductionEvents => RetentionPolicy::EVENTS,
        }
    }
}

impl std::fmt::Display for TableKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Physical column types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    UInt32,
    UInt64,
    Float64,
    String,
    /// Dictionary-friendly string (enum-like values)
    LowCardinalityString,
    /// Millisecond instant, UTC
    Timestamp,
    NullableTimestamp,
    NullableUInt64,
    /// Key/value map stored as a JSON document
    JsonMap,
}

impl ColumnType {
    pub fn engine_type(&self) -> &'static str {
        match self {
            ColumnType::UInt32 => "UInt32",
            ColumnType::UInt64 => "UInt64",
            ColumnType::Float64 => "Float64",
            ColumnType::String | ColumnType::JsonMap => "String",
            ColumnType::LowCardinalityString => "LowCardinality(String)",
            ColumnType::Timestamp => "DateTime64(3, 'UTC')",
            ColumnType::NullableTimestamp => "Nullable(DateTime64(3, 'UTC'))",
            ColumnType::NullableUInt64 => "Nullable(UInt64)",
        }
    }

    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::UInt32 => DataType::UInt32,
            ColumnType::UInt64 | ColumnType::NullableUInt64 => DataType::UInt64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::String | ColumnType::LowCardinalityString | ColumnType::JsonMap => {
                DataType::Utf8
            }
            ColumnType::Timestamp | ColumnType::NullableTimestamp => {
                DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into()))
            }
        }
    }

    pub fn nullable(&self) -> bool {
        matches!(self, ColumnType::NullableTimestamp | ColumnType::NullableUInt64)
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: &'static str,
    pub column_type: ColumnType,
}

impl ColumnDefinition {
    pub const fn new(name: &'static str, column_type: ColumnType) -> Self {
        Self { name, column_type }
    }

    pub fn to_field(&self) -> Field {
        let field = Field::new(
            self.name,
            self.column_type.arrow_type(),
            self.column_type.nullable(),
        );
        if self.column_type == ColumnType::LowCardinalityString {
            field.with_metadata(HashMap::from([(
                LOW_CARDINALITY_METADATA.to_string(),
                "true".to_string(),
            )]))
        } else {
            field
        }
    }
}

/// Full physical declaration of one telemetry table
#[derive(Debug, Clone)]
pub struct TableDefinition {
    pub kind: TableKind,
    pub columns: Vec<ColumnDefinition>,
    /// Partition expression columns; always facility then month of timestamp
    pub partition_by: Vec<String>,
    pub order_by: Vec<&'static str>,
    pub retention: RetentionPolicy,
}

impl TableDefinition {
    pub fn for_kind(kind: TableKind) -> Self {
        use ColumnType::*;

        let columns = match kind {
            TableKind::SensorReadings => vec![
                ColumnDefinition::new(FACILITY_ID_FIELD, UInt32),
                ColumnDefinition::new(PRODUCTION_LINE_FIELD, LowCardinalityString),
                ColumnDefinition::new(SENSOR_ID_FIELD, String),
                ColumnDefinition::new("sensor_type", LowCardinalityString),
                ColumnDefinition::new(TIMESTAMP_FIELD, Timestamp),
                ColumnDefinition::new(VALUE_FIELD, Float64),
                ColumnDefinition::new("unit", LowCardinalityString),
                ColumnDefinition::new("quality_score", Float64),
                ColumnDefinition::new("status", LowCardinalityString),
                ColumnDefinition::new("batch_id", String),
                ColumnDefinition::new("operator_id", String),
                ColumnDefinition::new("shift_id", String),
            ],
            TableKind::QualityMeasurements => vec![
                ColumnDefinition::new("measurement_id", String),
                ColumnDefinition::new(FACILITY_ID_FIELD, UInt32),
                ColumnDefinition::new(PRODUCTION_LINE_FIELD, LowCardinalityString),
                ColumnDefinition::new("batch_id", String),
                ColumnDefinition::new(TIMESTAMP_FIELD, Timestamp),
                ColumnDefinition::new("measurement_type", LowCardinalityString),
                ColumnDefinition::new("measured_value", Float64),
                ColumnDefinition::new("target_value", Float64),
                ColumnDefinition::new("upper_tolerance", Float64),
                ColumnDefinition::new("lower_tolerance", Float64),
                ColumnDefinition::new("verdict", LowCardinalityString),
                ColumnDefinition::new("inspector_id", String),
                ColumnDefinition::new("equipment_id", String),
                ColumnDefinition::new("environmental_conditions", JsonMap),
                ColumnDefinition::new("process_parameters", JsonMap),
                ColumnDefinition::new("supplier_id", String),
                ColumnDefinition::new("material_lot", String),
            ],
            TableKind::ProductionEvents => vec![
                ColumnDefinition::new("event_id", String),
                ColumnDefinition::new(FACILITY_ID_FIELD, UInt32),
                ColumnDefinition::new(PRODUCTION_LINE_FIELD, LowCardinalityString),
                ColumnDefinition::new(TIMESTAMP_FIELD, Timestamp),
                ColumnDefinition::new("event_type", LowCardinalityString),
                ColumnDefinition::new("category", LowCardinalityString),
                ColumnDefinition::new("severity", LowCardinalityString),
                ColumnDefinition::new("description", String),
                ColumnDefinition::new("operator_id", String),
                ColumnDefinition::new("equipment_id", String),
                ColumnDefinition::new("duration_seconds", NullableUInt64),
                ColumnDefinition::new("resolved_at", NullableTimestamp),
                ColumnDefinition::new("resolved_by", String),
                ColumnDefinition::new("resolution_notes", String),
            ],
        };

        let order_by = match kind {
            TableKind::SensorReadings => vec![
                FACILITY_ID_FIELD,
                PRODUCTION_LINE_FIELD,
                SENSOR_ID_FIELD,
                TIMESTAMP_FIELD,
            ],
            TableKind::QualityMeasurements => vec![
                FACILITY_ID_FIELD,
                PRODUCTION_LINE_FIELD,
                "batch_id",
                "measurement_id",
                TIMESTAMP_FIELD,
            ],
            TableKind::ProductionEvents => vec![
                FACILITY_ID_FIELD,
                PRODUCTION_LINE_FIELD,
                "event_id",
                TIMESTAMP_FIELD,
            ],
        };

        Self {
            kind,
            columns,
            partition_by: vec![
                FACILITY_ID_FIELD.to_string(),
                format!("toStartOfMonth({})", TIMESTAMP_FIELD),
            ],
            order_by,
            retention: kind.retention(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind.table_name()
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        Arc::new(Schema::new(
            self.columns.iter().map(|c| c.to_field()).collect::<Vec<_>>(),
        ))
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Idempotent `CREATE TABLE` statement for `database`
    pub fn create_ddl(&self, database: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("    {} {}", c.name, c.column_type.engine_type()))
            .collect::<Vec<_>>()
            .join(",\n");

        format!(
            "CREATE TABLE IF NOT EXISTS {db}.{table}\n(\n{columns}\n)\n\
             ENGINE = MergeTree()\n\
             PARTITION BY ({partition})\n\
             ORDER BY ({order})\n\
             TTL {ttl}\n\
             SETTINGS storage_policy = 'tiered', index_granularity = 8192",
            db = database,
            table = self.name(),
            columns = columns,
            partition = self.partition_by.join(", "),
            order = self.order_by.join(", "),
            ttl = self
                .retention
                .ttl_clause(&format!("toDateTime({})", TIMESTAMP_FIELD)),
        )
    }
}
