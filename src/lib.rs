//! # Millwright
//!
//! Control plane and data path for manufacturing-telemetry analytics clusters.
//!
//! Millwright provisions columnar analytics clusters, gives each one a fixed
//! telemetry schema, and moves sensor readings, quality measurements, and
//! production events in and out of them.
//!
//! ## Architecture
//!
//! - **Lifecycle Manager**: drives each cluster through its provisioning
//!   stages, persisting every transition, then applies the schema
//! - **Schema Registry**: tiered-retention tables plus 1-minute and 1-hour
//!   downsampling views, created idempotently
//! - **Connection Manager**: one probed client handle per
//!   (host, port, principal)
//! - **Ingestion Pipeline**: sequential fixed-size chunk writes with
//!   resumable partial failures
//! - **Query Planner**: picks raw rows or a rollup view from the range and
//!   point budget
//! - **Health Monitor**: concurrent probes of every active cluster

pub mod api;
pub mod clock;
pub mod config;
pub mod connection;
pub mod control_plane;
pub mod downsample;
pub mod engine;
pub mod health;
pub mod ingestion;
pub mod lifecycle;
pub mod model;
pub mod query;
pub mod schema;
pub mod telemetry;

mod error;

pub use error::{Error, Result};

/// Configuration for the Millwright service
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub api: api::ApiServerConfig,
    pub connections: connection::ConnectionManagerConfig,
    pub lifecycle: lifecycle::LifecycleConfig,
    pub ingestion: ingestion::IngestionConfig,
    pub query: query::QueryConfig,
    pub health: health::HealthConfig,
}

/// Re-exports for convenience
pub mod prelude {
    pub use crate::connection::{ConnectionConfig, ConnectionManager, Principal};
    pub use crate::control_plane::{
        Cluster, ClusterStatus, ClusterType, ControlPlaneStore, HealthStatus,
    };
    pub use crate::health::{HealthConfig, HealthMonitor};
    pub use crate::ingestion::{IngestReport, IngestionConfig, IngestionPipeline};
    pub use crate::lifecycle::{ClusterRequest, LifecycleConfig, LifecycleManager};
    pub use crate::model::{
        ProductionEvent, QualityMeasurement, SensorReading, SensorType, TimeRange,
    };
    pub use crate::query::{QueryConfig, QueryPlanner, Resolution, SeriesPoint, TelemetryQuery};
    pub use crate::{Config, Error, Result};
}
