//! Resolution query planner
//!
//! Reads a set of sensor series over a time range from whichever source
//! [`plan`] selects, through the cluster's read-only connection. Every source
//! is adapted to the same [`SeriesPoint`] shape, ordered by sensor then time.

mod planner;
mod telemetry;

pub use planner::{plan, Resolution, HOUR_VIEW_MAX_POINTS, MINUTE_VIEW_MAX_POINTS};

use crate::connection::{ConnectionManager, Principal};
use crate::control_plane::{require_active, ControlPlaneStore};
use crate::engine::{RawPointRow, RollupPointRow, SeriesQuery};
use crate::model::TimeRange;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, Instrument};

/// Configuration for the query planner
#[derive(Debug, Clone)]
pub struct QueryConfig {
    /// Deadline for the single engine read a query issues
    pub query_timeout: Duration,
    /// Largest point budget a caller may ask for
    pub max_points_limit: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            query_timeout: Duration::from_secs(30),
            max_points_limit: 1_000_000,
        }
    }
}

/// Telemetry query request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryQuery {
    pub sensor_ids: Vec<String>,
    pub time_range: TimeRange,
    pub max_points: usize,
}

/// One point of a series, whatever source it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub sensor_id: String,
    pub timestamp: i64,
    pub value: f64,
    pub min_value: f64,
    pub max_value: f64,
}

impl From<RawPointRow> for SeriesPoint {
    fn from(row: RawPointRow) -> Self {
        Self {
            sensor_id: row.sensor_id,
            timestamp: row.timestamp,
            value: row.value,
            min_value: row.value,
            max_value: row.value,
        }
    }
}

impl From<RollupPointRow> for SeriesPoint {
    fn from(row: RollupPointRow) -> Self {
        Self {
            sensor_id: row.sensor_id,
            timestamp: row.bucket,
            value: row.avg_value,
            min_value: row.min_value,
            max_value: row.max_value,
        }
    }
}

/// Query answer with the source it was read from
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    pub resolution: Resolution,
    pub points: Vec<SeriesPoint>,
}

/// Executes telemetry queries against active clusters
pub struct QueryPlanner {
    store: Arc<dyn ControlPlaneStore>,
    connections: Arc<ConnectionManager>,
    config: QueryConfig,
}

impl QueryPlanner {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        connections: Arc<ConnectionManager>,
        config: QueryConfig,
    ) -> Self {
        Self {
            store,
            connections,
            config,
        }
    }

    fn validate(&self, query: &TelemetryQuery) -> Result<()> {
        if query.sensor_ids.iter().any(|id| id.trim().is_empty()) {
            return Err(Error::InvalidInput("sensor ids must not be empty".to_string()));
        }
        if query.time_range.start > query.time_range.end {
            return Err(Error::InvalidInput(format!(
                "time range start {} is after end {}",
                query.time_range.start, query.time_range.end
            )));
        }
        if query.max_points > self.config.max_points_limit {
            return Err(Error::InvalidInput(format!(
                "max_points {} exceeds limit {}",
                query.max_points, self.config.max_points_limit
            )));
        }
        Ok(())
    }

    /// Run `query` against `cluster_id`. Input errors are raised before any I/O.
    pub async fn execute(&self, cluster_id: &str, query: &TelemetryQuery) -> Result<QueryResult> {
        self.validate(query)?;
        let series = SeriesQuery::new(
            query.sensor_ids.iter().cloned(),
            query.time_range,
            query.max_points,
        );
        let resolution = plan(query.time_range, series.sensor_ids.len(), query.max_points)?;

        let span = info_span!(
            "telemetry_query",
            cluster_id,
            sensors = series.sensor_ids.len(),
            resolution = resolution.as_str()
        );
        let started = Instant::now();
        let result = self.read(cluster_id, &series, resolution).instrument(span).await;
        let elapsed = started.elapsed().as_secs_f64();

        match result {
            Ok(points) => {
                telemetry::record_query(resolution.as_str(), "ok", elapsed, points.len());
                Ok(QueryResult { resolution, points })
            }
            Err(e) => {
                telemetry::record_query(resolution.as_str(), "error", elapsed, 0);
                Err(e)
            }
        }
    }

    async fn read(
        &self,
        cluster_id: &str,
        series: &SeriesQuery,
        resolution: Resolution,
    ) -> Result<Vec<SeriesPoint>> {
        let cluster = require_active(self.store.as_ref(), cluster_id).await?;
        let conn = self
            .connections
            .acquire_for_cluster(&cluster, Principal::ReadOnly)
            .await?;
        let engine = conn.engine();
        let timeout = self.config.query_timeout;

        let mut points: Vec<SeriesPoint> = match resolution.granularity() {
            None => conn
                .run_with_timeout("query_raw", timeout, engine.query_raw(series))
                .await?
                .into_iter()
                .map(SeriesPoint::from)
                .collect(),
            Some(granularity) => conn
                .run_with_timeout(
                    "query_rollup",
                    timeout,
                    engine.query_rollup(granularity, series),
                )
                .await?
                .into_iter()
                .map(SeriesPoint::from)
                .collect(),
        };

        // Engines already order rows; this keeps the guarantee independent of them
        points.sort_by(|a, b| {
            a.sensor_id
                .cmp(&b.sensor_id)
                .then(a.timestamp.cmp(&b.timestamp))
        });
        let points = series.cap(points, |p| p.sensor_id.as_str());
        debug!(cluster_id, rows = points.len(), "Query complete");
        Ok(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MILLIS_PER_DAY;
    use crate::connection::{ConnectionManagerConfig, MemoryConnector};
    use crate::control_plane::fixtures::cluster;
    use crate::control_plane::{ClusterStatus, LocalControlPlane};
    use crate::engine::{MemoryEngine, TelemetryEngine};
    use crate::model::{SensorReading, SensorType};
    use crate::schema::SchemaRegistry;

    const T0: i64 = 1_700_000_000_000;

    async fn setup() -> (QueryPlanner, Arc<MemoryEngine>) {
        let store = Arc::new(LocalControlPlane::new());
        store
            .insert_cluster(cluster("c1", ClusterStatus::Active))
            .await
            .unwrap();
        let connector = Arc::new(MemoryConnector::new());
        let server = connector.server("c1.internal", 8123);
        SchemaRegistry::new()
            .apply(server.as_ref(), "telemetry")
            .await
            .unwrap();
        let connections = Arc::new(ConnectionManager::new(
            connector,
            ConnectionManagerConfig::default(),
        ));
        (
            QueryPlanner::new(store, connections, QueryConfig::default()),
            server,
        )
    }

    async fn load(server: &MemoryEngine, sensors: &[&str], count: usize, step_ms: i64) {
        let mut rows = Vec::new();
        for sensor in sensors {
            for i in 0..count {
                rows.push(SensorReading::new(
                    1,
                    "line-a",
                    *sensor,
                    SensorType::Pressure,
                    T0 + i as i64 * step_ms,
                    i as f64,
                    "bar",
                ));
            }
        }
        server.insert_readings(&rows).await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_rows_are_degenerate_quadruples() {
        let (planner, server) = setup().await;
        load(&server, &["b", "a"], 10, 1_000).await;

        let result = planner
            .execute(
                "c1",
                &TelemetryQuery {
                    sensor_ids: vec!["b".into(), "a".into()],
                    time_range: TimeRange::new(T0, T0 + 60_000),
                    max_points: 100,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.resolution, Resolution::Raw);
        assert_eq!(result.points.len(), 20);
        assert_eq!(result.points[0].sensor_id, "a");
        assert_eq!(result.points[10].sensor_id, "b");
        assert!(result
            .points
            .iter()
            .all(|p| p.min_value == p.value && p.max_value == p.value));
        assert!(result.points.windows(2).all(|w| {
            (w[0].sensor_id.as_str(), w[0].timestamp) < (w[1].sensor_id.as_str(), w[1].timestamp)
        }));
    }

    #[tokio::test]
    async fn test_long_range_reads_rollup() {
        let (planner, server) = setup().await;
        // One reading every 10 minutes for three days
        load(&server, &["a"], 432, 600_000).await;

        let result = planner
            .execute(
                "c1",
                &TelemetryQuery {
                    sensor_ids: vec!["a".into()],
                    time_range: TimeRange::new(T0, T0 + 3 * MILLIS_PER_DAY),
                    max_points: 1_000,
                },
            )
            .await
            .unwrap();

        assert_eq!(result.resolution, Resolution::OneMinute);
        assert_eq!(result.points.len(), 432);
        assert!(result.points.iter().all(|p| p.timestamp % 60_000 == 0));
    }

    #[tokio::test]
    async fn test_budget_caps_rows() {
        let (planner, server) = setup().await;
        load(&server, &["a", "b"], 50, 1_000).await;

        let result = planner
            .execute(
                "c1",
                &TelemetryQuery {
                    sensor_ids: vec!["a".into(), "b".into()],
                    time_range: TimeRange::new(T0, T0 + 3_600_000),
                    max_points: 30,
                },
            )
            .await
            .unwrap();
        assert_eq!(result.points.len(), 30);
        assert_eq!(result.points.iter().filter(|p| p.sensor_id == "a").count(), 15);
        assert_eq!(result.points.iter().filter(|p| p.sensor_id == "b").count(), 15);
    }

    #[tokio::test]
    async fn test_input_errors_before_io() {
        let (planner, _) = setup().await;
        let empty = TelemetryQuery {
            sensor_ids: Vec::new(),
            time_range: TimeRange::new(T0, T0 + 1),
            max_points: 10,
        };
        assert!(matches!(
            planner.execute("missing", &empty).await,
            Err(Error::InvalidInput(_))
        ));

        let inverted = TelemetryQuery {
            sensor_ids: vec!["a".into()],
            time_range: TimeRange {
                start: T0 + 1,
                end: T0,
            },
            max_points: 10,
        };
        assert!(matches!(
            planner.execute("missing", &inverted).await,
            Err(Error::InvalidInput(_))
        ));
    }
}
