//! Health monitor
//!
//! On a fixed cadence, probes every cluster whose persisted status is
//! `active`. Probes run concurrently and fail independently. At most one
//! probe per cluster is in flight at a time.
//!
//! Any failed check yields `critical`. `warning` is never produced by the
//! current check set.

mod telemetry;

use crate::clock::BoundedClock;
use crate::connection::{Connection, ConnectionManager, Principal};
use crate::control_plane::{
    Cluster, ClusterPatch, ClusterStatus, ControlPlaneStore, HealthChecks, HealthSnapshot,
    HealthStatus,
};
use crate::model::TimeRange;
use crate::schema::TableKind;
use crate::Result;
use dashmap::DashSet;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Window the query-performance check counts rows over
const QUERY_CHECK_WINDOW_MS: i64 = 3_600_000;

/// Configuration for the health monitor
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Deadline for each individual check
    pub probe_timeout: Duration,
    /// Slowest acceptable response to the query-performance check
    pub query_latency_threshold: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            query_latency_threshold: Duration::from_secs(2),
        }
    }
}

/// Removes a cluster from the in-flight set when the probe ends or is dropped
struct InFlight<'a> {
    set: &'a DashSet<String>,
    cluster_id: String,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set.remove(&self.cluster_id);
    }
}

/// Periodic prober of active clusters
pub struct HealthMonitor {
    store: Arc<dyn ControlPlaneStore>,
    connections: Arc<ConnectionManager>,
    clock: Arc<BoundedClock>,
    config: HealthConfig,
    in_flight: DashSet<String>,
}

impl HealthMonitor {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        connections: Arc<ConnectionManager>,
        clock: Arc<BoundedClock>,
        config: HealthConfig,
    ) -> Self {
        Self {
            store,
            connections,
            clock,
            config,
            in_flight: DashSet::new(),
        }
    }

    /// Sweep on the configured interval until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sweep().await {
                        error!("Health sweep failed: {}", e);
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Health monitor shutting down gracefully");
                    break;
                }
            }
        }
    }

    /// Probe every active cluster once. A failing cluster never prevents the
    /// others from being probed and recorded.
    pub async fn sweep(&self) -> Result<Vec<HealthSnapshot>> {
        let started = Instant::now();
        let clusters = self.store.list_clusters(Some(ClusterStatus::Active)).await?;
        let results = join_all(clusters.iter().map(|cluster| self.probe(cluster))).await;
        let snapshots: Vec<HealthSnapshot> = results.into_iter().flatten().collect();

        let critical = snapshots
            .iter()
            .filter(|s| s.status == HealthStatus::Critical)
            .count();
        telemetry::record_sweep(clusters.len(), started.elapsed().as_secs_f64());
        info!(
            clusters = clusters.len(),
            probed = snapshots.len(),
            critical,
            "Health sweep complete"
        );
        Ok(snapshots)
    }

    /// Probe one cluster and record the outcome. Returns `None` when a probe
    /// of the same cluster is already running.
    pub async fn probe(&self, cluster: &Cluster) -> Option<HealthSnapshot> {
        if !self.in_flight.insert(cluster.id.clone()) {
            debug!(cluster_id = %cluster.id, "Probe already in flight, skipping");
            telemetry::record_skipped_probe();
            return None;
        }
        let _guard = InFlight {
            set: &self.in_flight,
            cluster_id: cluster.id.clone(),
        };

        let started = Instant::now();
        let (checks, error) = self.run_checks(cluster).await;
        let status = if checks.all_passed() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Critical
        };
        let snapshot = HealthSnapshot {
            cluster_id: cluster.id.clone(),
            status,
            timestamp: self.clock.now(),
            checks,
            error,
        };
        telemetry::record_probe(status.as_str(), started.elapsed().as_secs_f64());

        if status == HealthStatus::Healthy {
            debug!(cluster_id = %cluster.id, "Cluster healthy");
        } else {
            warn!(
                cluster_id = %cluster.id,
                error = snapshot.error.as_deref().unwrap_or_default(),
                ?checks,
                "Cluster critical"
            );
        }
        self.record(&snapshot).await;
        Some(snapshot)
    }

    /// Persist the snapshot and the cluster's health fields. Failures are
    /// logged; a probe outcome is never thrown to the sweep.
    async fn record(&self, snapshot: &HealthSnapshot) {
        if let Err(e) = self.store.record_health(snapshot.clone()).await {
            error!(
                cluster_id = %snapshot.cluster_id,
                error = %e,
                "Failed to record health snapshot"
            );
        }

        let patch = ClusterPatch {
            health_status: Some(snapshot.status),
            last_health_check: Some(snapshot.timestamp),
            expect_status: Some(ClusterStatus::Active),
            ..Default::default()
        };
        match self.store.apply_patch(&snapshot.cluster_id, patch).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                debug!(
                    cluster_id = %snapshot.cluster_id,
                    "Cluster left active during probe, health not written"
                )
            }
            Err(e) => {
                error!(
                    cluster_id = %snapshot.cluster_id,
                    error = %e,
                    "Failed to write cluster health"
                )
            }
        }
    }

    async fn run_checks(&self, cluster: &Cluster) -> (HealthChecks, Option<String>) {
        let mut checks = HealthChecks::default();

        let conn = match self.connect(cluster).await {
            Ok(conn) => conn,
            Err(e) => return (checks, Some(e.to_string())),
        };
        checks.connectivity = true;

        let mut errors = Vec::new();
        let timeout = self.config.probe_timeout;
        let engine = conn.engine();

        let now = self.clock.now_millis();
        let window = TimeRange::new(now - QUERY_CHECK_WINDOW_MS, now);
        let query_started = Instant::now();
        match conn
            .run_with_timeout(
                "health_count",
                timeout,
                engine.count_rows(TableKind::SensorReadings, window),
            )
            .await
        {
            Ok(_) if query_started.elapsed() <= self.config.query_latency_threshold => {
                checks.query_performance = true;
            }
            Ok(_) => errors.push(format!(
                "query took {:?}, threshold {:?}",
                query_started.elapsed(),
                self.config.query_latency_threshold
            )),
            Err(e) => errors.push(e.to_string()),
        }

        let mut storage_ok = true;
        for table in TableKind::ALL {
            match conn
                .run_with_timeout("health_table_stats", timeout, engine.table_stats(table))
                .await
            {
                Ok(stats) => {
                    debug!(
                        cluster_id = %cluster.id,
                        table = table.table_name(),
                        rows = stats.rows,
                        bytes = stats.bytes,
                        "Table stats"
                    )
                }
                Err(e) => {
                    storage_ok = false;
                    errors.push(format!("{}: {}", table.table_name(), e));
                }
            }
        }
        checks.storage_health = storage_ok;

        match conn
            .run_with_timeout("health_replication", timeout, engine.replication_healthy())
            .await
        {
            Ok(true) => checks.replication_status = true,
            Ok(false) => {
                errors.push("replication reports read-only or expired replicas".to_string())
            }
            Err(e) => errors.push(e.to_string()),
        }

        let error = if errors.is_empty() {
            None
        } else {
            Some(errors.join("; "))
        };
        (checks, error)
    }

    /// Acquire the read-only handle and ping it. A handle that fails the ping
    /// is evicted so the next probe reconnects.
    async fn connect(&self, cluster: &Cluster) -> Result<Arc<Connection>> {
        let conn = self
            .connections
            .acquire_for_cluster(cluster, Principal::ReadOnly)
            .await?;
        if let Err(e) = conn
            .run_with_timeout("health_ping", self.config.probe_timeout, conn.engine().ping())
            .await
        {
            let key = conn.key();
            self.connections
                .release(&key.host, key.port, &key.principal)
                .await;
            return Err(e);
        }
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManagerConfig, MemoryConnector};
    use crate::control_plane::fixtures::cluster;
    use crate::control_plane::LocalControlPlane;
    use crate::schema::SchemaRegistry;

    async fn setup(ids: &[&str]) -> (HealthMonitor, Arc<LocalControlPlane>, Arc<MemoryConnector>) {
        let store = Arc::new(LocalControlPlane::new());
        let connector = Arc::new(MemoryConnector::new());
        for id in ids {
            store
                .insert_cluster(cluster(id, ClusterStatus::Active))
                .await
                .unwrap();
            let server = connector.server(&format!("{}.internal", id), 8123);
            SchemaRegistry::new()
                .apply(server.as_ref(), "telemetry")
                .await
                .unwrap();
        }
        let connections = Arc::new(ConnectionManager::new(
            connector.clone(),
            ConnectionManagerConfig {
                probe_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        ));
        let monitor = HealthMonitor::new(
            store.clone(),
            connections,
            Arc::new(BoundedClock::new()),
            HealthConfig {
                probe_timeout: Duration::from_millis(200),
                ..Default::default()
            },
        );
        (monitor, store, connector)
    }

    #[tokio::test]
    async fn test_unreachable_cluster_does_not_block_others() {
        let (monitor, store, connector) = setup(&["a", "b", "c"]).await;
        connector
            .server("b.internal", 8123)
            .faults()
            .set_unreachable(true);

        let snapshots = monitor.sweep().await.unwrap();
        assert_eq!(snapshots.len(), 3);

        for id in ["a", "c"] {
            let c = store.get_cluster(id).await.unwrap().unwrap();
            assert_eq!(c.health_status, HealthStatus::Healthy);
        }
        let b = store.get_cluster("b").await.unwrap().unwrap();
        assert_eq!(b.health_status, HealthStatus::Critical);
        assert!(b.last_health_check.is_some());

        let snapshot = store.latest_health("b").await.unwrap().unwrap();
        assert!(!snapshot.checks.connectivity);
        assert!(snapshot.error.is_some());
    }

    #[tokio::test]
    async fn test_any_failed_check_is_critical() {
        let (monitor, store, connector) = setup(&["a"]).await;
        connector
            .server("a.internal", 8123)
            .faults()
            .set_replication_broken(true);

        let cluster = store.get_cluster("a").await.unwrap().unwrap();
        let snapshot = monitor.probe(&cluster).await.unwrap();
        assert!(snapshot.checks.connectivity);
        assert!(!snapshot.checks.replication_status);
        assert_eq!(snapshot.status, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn test_recovered_handle_is_reprobed() {
        let (monitor, store, connector) = setup(&["a"]).await;
        let server = connector.server("a.internal", 8123);
        let cluster = store.get_cluster("a").await.unwrap().unwrap();

        assert_eq!(monitor.probe(&cluster).await.unwrap().status, HealthStatus::Healthy);
        server.faults().set_unreachable(true);
        assert_eq!(monitor.probe(&cluster).await.unwrap().status, HealthStatus::Critical);
        server.faults().set_unreachable(false);
        assert_eq!(monitor.probe(&cluster).await.unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_only_active_clusters_probed() {
        let (monitor, store, _) = setup(&["a"]).await;
        store
            .insert_cluster(cluster("t", ClusterStatus::Terminated))
            .await
            .unwrap();
        let snapshots = monitor.sweep().await.unwrap();
        assert_eq!(snapshots.len(), 1);
        assert!(store.latest_health("t").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_probe_of_same_cluster_is_skipped() {
        let (monitor, store, connector) = setup(&["a"]).await;
        connector
            .server("a.internal", 8123)
            .faults()
            .set_latency(Some(Duration::from_millis(20)));
        let cluster = store.get_cluster("a").await.unwrap().unwrap();

        let (first, second) = tokio::join!(monitor.probe(&cluster), monitor.probe(&cluster));
        assert!(first.is_some() != second.is_some());
        assert!(monitor.in_flight.is_empty());
    }
}
