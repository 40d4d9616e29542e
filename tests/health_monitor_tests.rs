//! Health sweep tests across several provisioned clusters

use millwright::clock::BoundedClock;
use millwright::connection::{ConnectionManager, ConnectionManagerConfig, MemoryConnector};
use millwright::control_plane::{
    ClusterStatus, ClusterType, ControlPlaneStore, Credentials, HealthStatus, LocalControlPlane,
};
use millwright::engine::MemoryEngine;
use millwright::health::{HealthConfig, HealthMonitor};
use millwright::lifecycle::{ClusterRequest, LifecycleConfig, LifecycleManager, SimulatedBackend};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Fleet {
    store: Arc<LocalControlPlane>,
    connector: Arc<MemoryConnector>,
    lifecycle: LifecycleManager,
    monitor: Arc<HealthMonitor>,
}

fn fleet(health: HealthConfig) -> Fleet {
    let store = Arc::new(LocalControlPlane::new());
    let connector = Arc::new(MemoryConnector::new());
    let connections = Arc::new(ConnectionManager::new(
        connector.clone(),
        ConnectionManagerConfig {
            probe_timeout: Duration::from_millis(200),
            ..Default::default()
        },
    ));
    let clock = Arc::new(BoundedClock::new());
    let lifecycle = LifecycleManager::new(
        store.clone(),
        Arc::new(SimulatedBackend::new(Duration::ZERO)),
        connections.clone(),
        clock.clone(),
        LifecycleConfig::default(),
    );
    let monitor = Arc::new(HealthMonitor::new(store.clone(), connections, clock, health));
    Fleet {
        store,
        connector,
        lifecycle,
        monitor,
    }
}

async fn provision(fleet: &Fleet, id: &str) -> Arc<MemoryEngine> {
    let request = ClusterRequest {
        cluster_id: id.to_string(),
        display_key: None,
        cluster_type: ClusterType::Analytics,
        region: "eu-central-1".to_string(),
        node_count: 2,
        cpu_per_node: 8,
        memory_per_node: 32,
        storage_per_node: 500,
        archive_enabled: true,
        database: None,
        admin_credentials: Credentials::new("admin", "a"),
        readonly_credentials: Credentials::new("reader", "r"),
    };
    fleet.lifecycle.create_cluster(request).await.unwrap();
    fleet.lifecycle.wait(id).await;

    let cluster = fleet.lifecycle.get_cluster(id).await.unwrap();
    assert_eq!(cluster.status, ClusterStatus::Active);
    let endpoint = cluster.endpoint.unwrap();
    fleet.connector.server(&endpoint.host, endpoint.port)
}

#[tokio::test]
async fn test_sweep_isolates_unreachable_cluster() {
    let f = fleet(HealthConfig::default());
    provision(&f, "line-a").await;
    let down = provision(&f, "line-b").await;
    provision(&f, "line-c").await;

    down.faults().set_unreachable(true);
    let snapshots = f.monitor.sweep().await.unwrap();
    assert_eq!(snapshots.len(), 3);

    for snapshot in &snapshots {
        if snapshot.cluster_id == "line-b" {
            assert_eq!(snapshot.status, HealthStatus::Critical);
            assert!(!snapshot.checks.connectivity);
            assert!(snapshot.error.is_some());
        } else {
            assert_eq!(snapshot.status, HealthStatus::Healthy);
            assert!(snapshot.checks.all_passed());
        }
    }

    let b = f.store.get_cluster("line-b").await.unwrap().unwrap();
    assert_eq!(b.health_status, HealthStatus::Critical);
    assert_eq!(b.status, ClusterStatus::Active);
    let latest = f.store.latest_health("line-b").await.unwrap().unwrap();
    assert_eq!(latest.status, HealthStatus::Critical);

    // Recovered cluster reconnects on the next sweep
    down.faults().set_unreachable(false);
    let snapshots = f.monitor.sweep().await.unwrap();
    assert!(snapshots.iter().all(|s| s.status == HealthStatus::Healthy));
}

#[tokio::test]
async fn test_replication_and_latency_failures_are_critical() {
    let f = fleet(HealthConfig {
        query_latency_threshold: Duration::from_millis(20),
        ..Default::default()
    });
    let slow = provision(&f, "slow").await;
    let replica = provision(&f, "replica").await;

    slow.faults().set_latency(Some(Duration::from_millis(60)));
    replica.faults().set_replication_broken(true);

    let snapshots = f.monitor.sweep().await.unwrap();
    let slow_snapshot = snapshots.iter().find(|s| s.cluster_id == "slow").unwrap();
    assert_eq!(slow_snapshot.status, HealthStatus::Critical);
    assert!(slow_snapshot.checks.connectivity);
    assert!(!slow_snapshot.checks.query_performance);

    let replica_snapshot = snapshots.iter().find(|s| s.cluster_id == "replica").unwrap();
    assert_eq!(replica_snapshot.status, HealthStatus::Critical);
    assert!(replica_snapshot.checks.query_performance);
    assert!(!replica_snapshot.checks.replication_status);
}

#[tokio::test]
async fn test_sweep_skips_clusters_that_are_not_active() {
    let f = fleet(HealthConfig::default());
    provision(&f, "kept").await;
    provision(&f, "gone").await;
    f.lifecycle.terminate("gone").await.unwrap();

    let snapshots = f.monitor.sweep().await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].cluster_id, "kept");
    assert!(f.store.latest_health("gone").await.unwrap().is_none());
}

#[tokio::test]
async fn test_run_loop_stops_on_cancel() {
    let f = fleet(HealthConfig {
        interval: Duration::from_millis(10),
        ..Default::default()
    });
    provision(&f, "looped").await;

    let token = CancellationToken::new();
    let task = tokio::spawn({
        let monitor = f.monitor.clone();
        let token = token.clone();
        async move { monitor.run(token).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("monitor stops after cancellation")
        .unwrap();

    assert!(f.store.latest_health("looped").await.unwrap().is_some());
}
