//! File-backed control plane: state and interrupted provisioning survive a restart

use millwright::clock::BoundedClock;
use millwright::connection::{ConnectionManager, ConnectionManagerConfig, MemoryConnector};
use millwright::control_plane::{
    ClusterPatch, ClusterStatus, ClusterType, ControlPlaneStore, Credentials, FileControlPlane,
};
use millwright::lifecycle::{
    ClusterRequest, LifecycleConfig, LifecycleManager, ProvisioningStage, SimulatedBackend,
};

use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn manager(store: Arc<FileControlPlane>, stage_delay: Duration) -> LifecycleManager {
    let connections = Arc::new(ConnectionManager::new(
        Arc::new(MemoryConnector::new()),
        ConnectionManagerConfig::default(),
    ));
    LifecycleManager::new(
        store,
        Arc::new(SimulatedBackend::new(stage_delay)),
        connections,
        Arc::new(BoundedClock::new()),
        LifecycleConfig::default(),
    )
}

fn request(id: &str) -> ClusterRequest {
    ClusterRequest {
        cluster_id: id.to_string(),
        display_key: Some("WELD-02".to_string()),
        cluster_type: ClusterType::Production,
        region: "ap-south-1".to_string(),
        node_count: 3,
        cpu_per_node: 16,
        memory_per_node: 64,
        storage_per_node: 1_000,
        archive_enabled: true,
        database: Some("weld_telemetry".to_string()),
        admin_credentials: Credentials::new("admin", "a"),
        readonly_credentials: Credentials::new("reader", "r"),
    }
}

#[tokio::test]
async fn test_records_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let store = Arc::new(FileControlPlane::open(&path).await.unwrap());
        let lifecycle = manager(store.clone(), Duration::ZERO);
        lifecycle.create_cluster(request("weld-02")).await.unwrap();
        lifecycle.wait("weld-02").await;
    }

    let reopened = FileControlPlane::open(&path).await.unwrap();
    let cluster = reopened.get_cluster("weld-02").await.unwrap().unwrap();
    assert_eq!(cluster.status, ClusterStatus::Active);
    assert_eq!(cluster.display_key, "WELD-02");
    assert_eq!(cluster.database, "weld_telemetry");
    assert!(cluster.endpoint.is_some());

    let status = reopened
        .get_provisioning_status("weld-02")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(status.progress, 100);
}

#[tokio::test]
async fn test_interrupted_provisioning_resumes_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let store = Arc::new(FileControlPlane::open(&path).await.unwrap());
        let lifecycle = manager(store.clone(), Duration::from_secs(60));
        lifecycle.create_cluster(request("press-9")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        lifecycle.shutdown();

        let cluster = store.get_cluster("press-9").await.unwrap().unwrap();
        assert!(cluster.status.is_provisioning());
    }

    let store = Arc::new(FileControlPlane::open(&path).await.unwrap());
    let lifecycle = manager(store.clone(), Duration::ZERO);
    let resumed = lifecycle.resume_incomplete().await.unwrap();
    assert_eq!(resumed, vec!["press-9".to_string()]);

    lifecycle.wait("press-9").await;
    let cluster = store.get_cluster("press-9").await.unwrap().unwrap();
    assert_eq!(cluster.status, ClusterStatus::Active);

    // Nothing left to resume
    assert!(lifecycle.resume_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_interrupted_scale_settles_after_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let store = Arc::new(FileControlPlane::open(&path).await.unwrap());
        let lifecycle = manager(store.clone(), Duration::ZERO);
        lifecycle.create_cluster(request("mixer-3")).await.unwrap();
        lifecycle.wait("mixer-3").await;

        // Rebalance never finishes before the process goes away
        let slow = manager(store.clone(), Duration::from_secs(60));
        let scaling = tokio::spawn(async move { slow.scale("mixer-3", 6).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scaling.abort();

        let cluster = store.get_cluster("mixer-3").await.unwrap().unwrap();
        assert_eq!(cluster.status, ClusterStatus::Configuring);
        let status = store.get_provisioning_status("mixer-3").await.unwrap().unwrap();
        assert_eq!(status.stage, Some(ProvisioningStage::Finalize));
    }

    let store = Arc::new(FileControlPlane::open(&path).await.unwrap());
    let lifecycle = manager(store.clone(), Duration::ZERO);
    assert_eq!(
        lifecycle.resume_incomplete().await.unwrap(),
        vec!["mixer-3".to_string()]
    );
    lifecycle.wait("mixer-3").await;

    let cluster = store.get_cluster("mixer-3").await.unwrap().unwrap();
    assert_eq!(cluster.status, ClusterStatus::Active);
    assert_eq!(cluster.node_count, 3);
    assert!(lifecycle.resume_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_status_guard_rejects_stale_patch() {
    let dir = tempdir().unwrap();
    let store = Arc::new(FileControlPlane::open(dir.path().join("state.json")).await.unwrap());
    let lifecycle = manager(store.clone(), Duration::ZERO);
    lifecycle.create_cluster(request("guarded")).await.unwrap();
    lifecycle.wait("guarded").await;

    let stale = ClusterPatch::status(ClusterStatus::Active).expecting(ClusterStatus::Testing);
    assert!(store.apply_patch("guarded", stale).await.unwrap().is_none());

    lifecycle.terminate("guarded").await.unwrap();
    let again = lifecycle.terminate("guarded").await.unwrap();
    assert_eq!(again.status, ClusterStatus::Terminated);
}
