//! Cluster lifecycle manager
//!
//! Each cluster is driven by its own background task through the ordered
//! provisioning stages:
//!
//! ```text
//! initializing -> provisioning -> configuring -> testing -> active
//!        \              \               \            \
//!         +--------------+---------------+------------+--> error
//! ```
//!
//! Every completed stage is persisted before the next one starts, so after a
//! restart [`LifecycleManager::resume_incomplete`] can continue from the last
//! recorded stage. Termination is allowed from any state and is idempotent.

mod backend;
mod stages;
mod telemetry;

pub use backend::{ProvisioningBackend, SimulatedBackend};
pub use stages::{estimate_duration, ProvisioningStage};

use crate::clock::BoundedClock;
use crate::connection::{ConnectionManager, Principal};
use crate::control_plane::{
    Cluster, ClusterPatch, ClusterStatus, ClusterType, ControlPlaneStore, CostEstimate,
    Credentials, Endpoint, HealthStatus, NodeSizing, ProvisioningStatus, TierSizing,
};
use crate::model::require_non_empty;
use crate::schema::{SchemaRegistry, SchemaReport};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Cluster creation request
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterRequest {
    pub cluster_id: String,
    #[serde(default)]
    pub display_key: Option<String>,
    pub cluster_type: ClusterType,
    pub region: String,
    pub node_count: u32,
    pub cpu_per_node: u32,
    /// GB
    pub memory_per_node: u32,
    /// GB
    pub storage_per_node: u32,
    #[serde(default)]
    pub archive_enabled: bool,
    /// Database holding the telemetry tables; defaults from config
    #[serde(default)]
    pub database: Option<String>,
    pub admin_credentials: Credentials,
    pub readonly_credentials: Credentials,
}

impl ClusterRequest {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("cluster_id", &self.cluster_id)?;
        require_non_empty("region", &self.region)?;
        require_non_empty("admin_credentials.username", &self.admin_credentials.username)?;
        require_non_empty(
            "readonly_credentials.username",
            &self.readonly_credentials.username,
        )?;
        if self.node_count == 0 {
            return Err(Error::InvalidInput("node_count must be at least 1".to_string()));
        }
        if self.cpu_per_node == 0 || self.memory_per_node == 0 || self.storage_per_node == 0 {
            return Err(Error::InvalidInput(
                "per-node cpu, memory, and storage must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn into_cluster(self, default_database: &str, now: DateTime<Utc>) -> Cluster {
        let sizing = NodeSizing {
            cpu_per_node: self.cpu_per_node,
            memory_per_node_gb: self.memory_per_node,
            storage_per_node_gb: self.storage_per_node,
        };
        let tiers = TierSizing::from_storage(self.node_count, &sizing, self.archive_enabled);
        Cluster {
            display_key: self
                .display_key
                .unwrap_or_else(|| self.cluster_id.to_uppercase()),
            id: self.cluster_id,
            cluster_type: self.cluster_type,
            region: self.region,
            node_count: self.node_count,
            sizing,
            tiers,
            status: ClusterStatus::Initializing,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            error_details: None,
            endpoint: None,
            database: self
                .database
                .unwrap_or_else(|| default_database.to_string()),
            admin_credentials: self.admin_credentials,
            readonly_credentials: self.readonly_credentials,
            cost: CostEstimate::compute(self.node_count, &sizing, &tiers),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle manager configuration
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    /// Attempts per stage before a transient error parks the cluster in `error`
    pub max_attempts: u32,
    /// Delay between attempts, doubled after each retry
    pub retry_backoff: Duration,
    /// Deadline for applying the full schema registry
    pub schema_timeout: Duration,
    pub default_database: String,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(200),
            schema_timeout: Duration::from_secs(60),
            default_database: "telemetry".to_string(),
        }
    }
}

struct LifecycleInner {
    store: Arc<dyn ControlPlaneStore>,
    backend: Arc<dyn ProvisioningBackend>,
    connections: Arc<ConnectionManager>,
    registry: SchemaRegistry,
    clock: Arc<BoundedClock>,
    config: LifecycleConfig,
    /// One driver task per cluster currently being provisioned
    drivers: DashMap<String, JoinHandle<()>>,
}

/// Drives clusters through provisioning, scaling, and termination
#[derive(Clone)]
pub struct LifecycleManager {
    inner: Arc<LifecycleInner>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn ControlPlaneStore>,
        backend: Arc<dyn ProvisioningBackend>,
        connections: Arc<ConnectionManager>,
        clock: Arc<BoundedClock>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            inner: Arc::new(LifecycleInner {
                store,
                backend,
                connections,
                registry: SchemaRegistry::new(),
                clock,
                config,
                drivers: DashMap::new(),
            }),
        }
    }

    /// Record a new cluster and start provisioning it in the background.
    pub async fn create_cluster(&self, request: ClusterRequest) -> Result<Cluster> {
        request.validate()?;
        let inner = &self.inner;
        let now = inner.clock.now();
        let cluster = request.into_cluster(&inner.config.default_database, now);
        let estimate = estimate_duration(cluster.cluster_type, cluster.node_count);
        let eta = chrono::Duration::from_std(estimate).ok().map(|d| now + d);

        inner.store.insert_cluster(cluster.clone()).await?;
        inner
            .put_status(
                &cluster.id,
                ClusterStatus::Initializing,
                None,
                "Provisioning request accepted",
                eta,
                None,
            )
            .await?;
        telemetry::record_transition(ClusterStatus::Initializing.as_str());
        info!(
            cluster_id = %cluster.id,
            cluster_type = ?cluster.cluster_type,
            node_count = cluster.node_count,
            "Cluster creation accepted"
        );

        self.spawn_driver(cluster.id.clone(), None, eta);
        Ok(cluster)
    }

    fn spawn_driver(
        &self,
        cluster_id: String,
        resume_after: Option<ProvisioningStage>,
        eta: Option<DateTime<Utc>>,
    ) {
        let inner = self.inner.clone();
        let id = cluster_id.clone();
        let handle = tokio::spawn(async move {
            inner.drive(&id, resume_after, eta).await;
        });
        self.inner.drivers.insert(cluster_id, handle);
    }

    fn is_driving(&self, cluster_id: &str) -> bool {
        self.inner
            .drivers
            .get(cluster_id)
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Wait for a cluster's driver task to finish, if one is running.
    pub async fn wait(&self, cluster_id: &str) {
        let handle = self.inner.drivers.remove(cluster_id).map(|(_, h)| h);
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(cluster_id, error = %e, "Provisioning driver panicked");
                }
            }
        }
    }

    pub async fn get_cluster(&self, cluster_id: &str) -> Result<Cluster> {
        self.inner.load(cluster_id).await
    }

    pub async fn list_clusters(&self, status: Option<ClusterStatus>) -> Result<Vec<Cluster>> {
        self.inner.store.list_clusters(status).await
    }

    pub async fn provisioning_status(&self, cluster_id: &str) -> Result<ProvisioningStatus> {
        self.inner
            .store
            .get_provisioning_status(cluster_id)
            .await?
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))
    }

    /// Change the node count of an active cluster.
    pub async fn scale(&self, cluster_id: &str, node_count: u32) -> Result<Cluster> {
        if node_count == 0 {
            return Err(Error::InvalidInput("node_count must be at least 1".to_string()));
        }
        let inner = &self.inner;

        let patch =
            ClusterPatch::status(ClusterStatus::Configuring).expecting(ClusterStatus::Active);
        let Some(cluster) = inner.store.apply_patch(cluster_id, patch).await? else {
            telemetry::record_scale("rejected");
            let current = inner.load(cluster_id).await?;
            return Err(Error::ClusterNotActive {
                cluster_id: cluster_id.to_string(),
                status: current.status.to_string(),
            });
        };
        telemetry::record_transition(ClusterStatus::Configuring.as_str());
        inner
            .put_status(
                cluster_id,
                ClusterStatus::Configuring,
                Some(ProvisioningStage::Finalize),
                &format!("Rebalancing from {} to {} nodes", cluster.node_count, node_count),
                None,
                None,
            )
            .await?;
        info!(cluster_id, from = cluster.node_count, to = node_count, "Scaling cluster");

        let rebalanced = inner
            .with_retries(cluster_id, "rebalance", || {
                inner.backend.rebalance(&cluster, node_count)
            })
            .await;

        if let Err(e) = rebalanced {
            telemetry::record_scale("failed");
            inner.park_in_error(cluster_id, &e).await;
            return Err(Error::Lifecycle(format!(
                "rebalancing {} failed: {}",
                cluster_id, e
            )));
        }

        let tiers =
            TierSizing::from_storage(node_count, &cluster.sizing, cluster.tiers.archive_enabled);
        let patch = ClusterPatch {
            node_count: Some(node_count),
            tiers: Some(tiers),
            cost: Some(CostEstimate::compute(node_count, &cluster.sizing, &tiers)),
            ..ClusterPatch::status(ClusterStatus::Active)
        }
        .expecting(ClusterStatus::Configuring);
        let Some(updated) = inner.store.apply_patch(cluster_id, patch).await? else {
            let current = inner.load(cluster_id).await?;
            return Err(Error::ClusterNotActive {
                cluster_id: cluster_id.to_string(),
                status: current.status.to_string(),
            });
        };
        inner
            .put_status(
                cluster_id,
                ClusterStatus::Active,
                Some(ProvisioningStage::Finalize),
                &format!("Scaled to {} nodes", node_count),
                None,
                None,
            )
            .await?;
        telemetry::record_transition(ClusterStatus::Active.as_str());
        telemetry::record_scale("ok");
        info!(cluster_id, node_count, "Cluster scaled");
        Ok(updated)
    }

    /// Mark a cluster terminated, stopping its driver and releasing its
    /// connections. The record itself is kept.
    pub async fn terminate(&self, cluster_id: &str) -> Result<Cluster> {
        let inner = &self.inner;
        if let Some((_, handle)) = inner.drivers.remove(cluster_id) {
            handle.abort();
        }

        let cluster = inner.load(cluster_id).await?;
        if cluster.status == ClusterStatus::Terminated {
            return Ok(cluster);
        }

        let updated = inner
            .store
            .apply_patch(cluster_id, ClusterPatch::status(ClusterStatus::Terminated))
            .await?
            .ok_or_else(|| Error::Internal(format!("unguarded patch of {} rejected", cluster_id)))?;
        inner.connections.release_cluster(&updated).await;
        if let Err(e) = inner.backend.release(&updated).await {
            warn!(
                cluster_id,
                error = %e,
                "Backend release failed; resources may need manual cleanup"
            );
        }

        let last_stage = inner
            .store
            .get_provisioning_status(cluster_id)
            .await?
            .and_then(|s| s.stage);
        inner
            .put_status(
                cluster_id,
                ClusterStatus::Terminated,
                last_stage,
                "Cluster terminated",
                None,
                None,
            )
            .await?;
        telemetry::record_transition(ClusterStatus::Terminated.as_str());
        info!(cluster_id, previous = %cluster.status, "Cluster terminated");
        Ok(updated)
    }

    /// Restart drivers for clusters persisted mid-provisioning, continuing
    /// after each one's last recorded stage.
    pub async fn resume_incomplete(&self) -> Result<Vec<String>> {
        let mut resumed = Vec::new();
        for cluster in self.inner.store.list_clusters(None).await? {
            if !cluster.status.is_provisioning() || self.is_driving(&cluster.id) {
                continue;
            }
            let last = self.inner.store.get_provisioning_status(&cluster.id).await?;
            let stage = last.as_ref().and_then(|s| s.stage);
            let eta = last.and_then(|s| s.estimated_completion);
            info!(cluster_id = %cluster.id, resume_after = ?stage, "Resuming provisioning");
            self.spawn_driver(cluster.id.clone(), stage, eta);
            resumed.push(cluster.id);
        }
        Ok(resumed)
    }

    /// Abort every driver task. Persisted progress is kept for resumption.
    pub fn shutdown(&self) {
        for entry in self.inner.drivers.iter() {
            entry.value().abort();
        }
        self.inner.drivers.clear();
    }
}

impl LifecycleInner {
    async fn load(&self, cluster_id: &str) -> Result<Cluster> {
        self.store
            .get_cluster(cluster_id)
            .await?
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))
    }

    async fn put_status(
        &self,
        cluster_id: &str,
        status: ClusterStatus,
        stage: Option<ProvisioningStage>,
        message: &str,
        estimated_completion: Option<DateTime<Utc>>,
        error_details: Option<String>,
    ) -> Result<()> {
        self.store
            .put_provisioning_status(ProvisioningStatus {
                cluster_id: cluster_id.to_string(),
                status,
                stage,
                progress: stage.map_or(0, |s| s.progress()),
                message: message.to_string(),
                estimated_completion,
                error_details,
                updated_at: self.clock.now(),
            })
            .await
    }

    /// Retry `op` on transient errors, up to the configured attempts.
    async fn with_retries<T, F, Fut>(
        &self,
        cluster_id: &str,
        step: &'static str,
        mut op: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.config.retry_backoff;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.config.max_attempts => {
                    warn!(
                        cluster_id,
                        step,
                        attempt,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    telemetry::record_stage_retry(step);
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn drive(
        &self,
        cluster_id: &str,
        resume_after: Option<ProvisioningStage>,
        eta: Option<DateTime<Utc>>,
    ) {
        let started = Instant::now();
        match self.provision(cluster_id, resume_after, eta).await {
            Ok(Some(_)) => {
                telemetry::record_provisioned(started.elapsed().as_secs_f64());
                info!(cluster_id, "Cluster active");
            }
            Ok(None) => {
                info!(cluster_id, "Provisioning stopped; cluster left the provisioning path");
            }
            Err(e) => self.park_in_error(cluster_id, &e).await,
        }
    }

    async fn attempt_stage(
        &self,
        cluster: &Cluster,
        stage: ProvisioningStage,
    ) -> Result<Option<Endpoint>> {
        if stage == ProvisioningStage::AllocateResources {
            // Allocation may have completed before a restart without its stage being recorded
            if let Some(endpoint) = cluster.endpoint.clone() {
                return Ok(Some(endpoint));
            }
            return Ok(Some(self.backend.allocate(cluster).await?));
        }
        self.backend.run_stage(cluster, stage).await?;
        Ok(None)
    }

    /// Returns the active cluster, or `None` if provisioning stopped because
    /// someone else moved the cluster off the provisioning path.
    async fn provision(
        &self,
        cluster_id: &str,
        resume_after: Option<ProvisioningStage>,
        eta: Option<DateTime<Utc>>,
    ) -> Result<Option<Cluster>> {
        let mut cluster = self.load(cluster_id).await?;

        for stage in ProvisioningStage::remaining(resume_after) {
            if !cluster.status.is_provisioning() {
                return Ok(None);
            }
            let current = &cluster;
            let endpoint = self
                .with_retries(cluster_id, stage.as_str(), || self.attempt_stage(current, stage))
                .await?;

            let previous = cluster.status;
            let patch = ClusterPatch {
                endpoint,
                ..ClusterPatch::status(stage.status())
            }
            .expecting(previous);
            match self.store.apply_patch(cluster_id, patch).await? {
                Some(updated) => cluster = updated,
                None => return Ok(None),
            }
            self.put_status(cluster_id, stage.status(), Some(stage), stage.message(), eta, None)
                .await?;
            if previous != cluster.status {
                telemetry::record_transition(cluster.status.as_str());
            }
            info!(
                cluster_id,
                stage = stage.as_str(),
                progress = stage.progress(),
                status = %cluster.status,
                "Provisioning stage complete"
            );
        }

        let settling_from = match cluster.status {
            ClusterStatus::Testing => ClusterStatus::Testing,
            // Scale interrupted before committing: settle on the recorded node count
            ClusterStatus::Configuring if resume_after == Some(ProvisioningStage::Finalize) => {
                let current = &cluster;
                warn!(
                    cluster_id,
                    node_count = current.node_count,
                    "Interrupted scale found, rebalancing to recorded size"
                );
                self.with_retries(cluster_id, "rebalance", || {
                    self.backend.rebalance(current, current.node_count)
                })
                .await?;
                ClusterStatus::Configuring
            }
            _ => return Ok(None),
        };

        let report = self.apply_schema(&cluster).await.map_err(|e| match e {
            Error::Schema(_) => e,
            other => Error::Schema(format!("schema creation failed: {}", other)),
        })?;
        info!(
            cluster_id,
            created = report.created.len(),
            existing = report.existing.len(),
            "Schema ready"
        );

        let patch = ClusterPatch {
            health_status: Some(HealthStatus::Healthy),
            last_health_check: Some(self.clock.now()),
            error_details: Some(None),
            ..ClusterPatch::status(ClusterStatus::Active)
        }
        .expecting(settling_from);
        let Some(active) = self.store.apply_patch(cluster_id, patch).await? else {
            return Ok(None);
        };
        self.put_status(
            cluster_id,
            ClusterStatus::Active,
            Some(ProvisioningStage::Finalize),
            "Cluster active",
            eta,
            None,
        )
        .await?;
        telemetry::record_transition(ClusterStatus::Active.as_str());
        Ok(Some(active))
    }

    async fn apply_schema(&self, cluster: &Cluster) -> Result<SchemaReport> {
        self.with_retries(&cluster.id, "apply_schema", || async move {
            let conn = self
                .connections
                .acquire_for_cluster(cluster, Principal::Admin)
                .await?;
            conn.run_with_timeout(
                "apply_schema",
                self.config.schema_timeout,
                self.registry.apply(conn.engine(), conn.database()),
            )
            .await
        })
        .await
    }

    /// Record a failure on the cluster. Terminated clusters stay terminated.
    async fn park_in_error(&self, cluster_id: &str, err: &Error) {
        let details = err.to_string();
        error!(cluster_id, error = %details, "Lifecycle operation failed");
        telemetry::record_failure(if matches!(err, Error::Schema(_)) {
            "schema"
        } else {
            "stage"
        });

        let current = match self.store.get_cluster(cluster_id).await {
            Ok(Some(cluster)) => cluster,
            Ok(None) => return,
            Err(e) => {
                error!(cluster_id, error = %e, "Cannot load cluster to record failure");
                return;
            }
        };
        if current.status == ClusterStatus::Terminated {
            return;
        }

        let patch = ClusterPatch {
            error_details: Some(Some(details.clone())),
            ..ClusterPatch::status(ClusterStatus::Error)
        }
        .expecting(current.status);
        match self.store.apply_patch(cluster_id, patch).await {
            Ok(Some(_)) => telemetry::record_transition(ClusterStatus::Error.as_str()),
            Ok(None) => return,
            Err(e) => {
                error!(cluster_id, error = %e, "Failed to persist error state");
                return;
            }
        }

        let last = self.store.get_provisioning_status(cluster_id).await.ok().flatten();
        let stage = last.as_ref().and_then(|s| s.stage);
        let eta = last.and_then(|s| s.estimated_completion);
        if let Err(e) = self
            .put_status(
                cluster_id,
                ClusterStatus::Error,
                stage,
                "Provisioning failed",
                eta,
                Some(details),
            )
            .await
        {
            error!(cluster_id, error = %e, "Failed to persist error status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionManagerConfig, MemoryConnector};
    use crate::control_plane::LocalControlPlane;

    struct Harness {
        manager: LifecycleManager,
        store: Arc<LocalControlPlane>,
        backend: Arc<SimulatedBackend>,
        connector: Arc<MemoryConnector>,
    }

    fn harness() -> Harness {
        let store = Arc::new(LocalControlPlane::new());
        let backend = Arc::new(SimulatedBackend::new(Duration::ZERO));
        let connector = Arc::new(MemoryConnector::new());
        let connections = Arc::new(ConnectionManager::new(
            connector.clone(),
            ConnectionManagerConfig::default(),
        ));
        let manager = LifecycleManager::new(
            store.clone(),
            backend.clone(),
            connections,
            Arc::new(BoundedClock::new()),
            LifecycleConfig {
                retry_backoff: Duration::from_millis(1),
                ..Default::default()
            },
        );
        Harness {
            manager,
            store,
            backend,
            connector,
        }
    }

    fn request(id: &str) -> ClusterRequest {
        ClusterRequest {
            cluster_id: id.to_string(),
            display_key: None,
            cluster_type: ClusterType::Development,
            region: "us-east-1".to_string(),
            node_count: 1,
            cpu_per_node: 2,
            memory_per_node: 8,
            storage_per_node: 100,
            archive_enabled: false,
            database: None,
            admin_credentials: Credentials::new("admin", "a"),
            readonly_credentials: Credentials::new("reader", "r"),
        }
    }

    #[tokio::test]
    async fn test_provisioning_reaches_active_with_schema() {
        let h = harness();
        let created = h.manager.create_cluster(request("c1")).await.unwrap();
        assert_eq!(created.status, ClusterStatus::Initializing);
        h.manager.wait("c1").await;

        let cluster = h.manager.get_cluster("c1").await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Active);
        assert_eq!(cluster.health_status, HealthStatus::Healthy);
        assert!(cluster.last_health_check.is_some());

        let status = h.manager.provisioning_status("c1").await.unwrap();
        assert_eq!(status.progress, 100);
        assert!(status.estimated_completion.is_some());

        let server = h.connector.server("c1.clusters.local", 8123);
        assert_eq!(server.object_count(), 7);
    }

    #[tokio::test]
    async fn test_schema_failure_parks_in_error() {
        let h = harness();
        h.connector
            .server("c2.clusters.local", 8123)
            .faults()
            .fail_ddl("permission denied");
        h.manager.create_cluster(request("c2")).await.unwrap();
        h.manager.wait("c2").await;

        let cluster = h.manager.get_cluster("c2").await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Error);
        assert!(cluster
            .error_details
            .as_deref()
            .unwrap_or_default()
            .contains("permission denied"));
        let status = h.manager.provisioning_status("c2").await.unwrap();
        assert_eq!(status.status, ClusterStatus::Error);
        assert!(status.error_details.is_some());
    }

    #[tokio::test]
    async fn test_transient_stage_failure_is_retried() {
        let h = harness();
        h.backend
            .fail_stage(ProvisioningStage::InstallEngine, 2, true);
        h.manager.create_cluster(request("c3")).await.unwrap();
        h.manager.wait("c3").await;
        assert_eq!(
            h.manager.get_cluster("c3").await.unwrap().status,
            ClusterStatus::Active
        );
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let h = harness();
        h.backend
            .fail_stage(ProvisioningStage::ConfigureStorage, 5, true);
        h.manager.create_cluster(request("c4")).await.unwrap();
        h.manager.wait("c4").await;

        let cluster = h.manager.get_cluster("c4").await.unwrap();
        assert_eq!(cluster.status, ClusterStatus::Error);
        let status = h.manager.provisioning_status("c4").await.unwrap();
        assert_eq!(status.stage, Some(ProvisioningStage::InstallEngine));
        assert_eq!(status.progress, 40);
    }

    #[tokio::test]
    async fn test_scale_only_when_active() {
        let h = harness();
        h.backend
            .fail_stage(ProvisioningStage::AllocateResources, 1, false);
        h.manager.create_cluster(request("c5")).await.unwrap();
        h.manager.wait("c5").await;
        assert!(matches!(
            h.manager.scale("c5", 3).await,
            Err(Error::ClusterNotActive { .. })
        ));

        h.manager.create_cluster(request("c6")).await.unwrap();
        h.manager.wait("c6").await;
        let before = h.manager.get_cluster("c6").await.unwrap();
        let scaled = h.manager.scale("c6", 3).await.unwrap();
        assert_eq!(scaled.status, ClusterStatus::Active);
        assert_eq!(scaled.node_count, 3);
        assert!(scaled.cost.total_monthly > before.cost.total_monthly);
    }

    #[tokio::test]
    async fn test_terminate_is_idempotent() {
        let h = harness();
        h.manager.create_cluster(request("c7")).await.unwrap();
        h.manager.wait("c7").await;

        let first = h.manager.terminate("c7").await.unwrap();
        let second = h.manager.terminate("c7").await.unwrap();
        assert_eq!(first.status, ClusterStatus::Terminated);
        assert_eq!(second.status, ClusterStatus::Terminated);
        assert!(h.store.get_cluster("c7").await.unwrap().is_some());
        assert!(matches!(
            h.manager.terminate("missing").await,
            Err(Error::ClusterNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resume_continues_after_last_stage() {
        let h = harness();
        let mut cluster = request("c8").into_cluster("telemetry", Utc::now());
        cluster.status = ClusterStatus::Configuring;
        cluster.endpoint = Some(Endpoint {
            host: "c8.clusters.local".to_string(),
            port: 8123,
            secure: false,
        });
        h.store.insert_cluster(cluster).await.unwrap();
        h.store
            .put_provisioning_status(ProvisioningStatus {
                cluster_id: "c8".to_string(),
                status: ClusterStatus::Configuring,
                stage: Some(ProvisioningStage::ConfigureStorage),
                progress: 60,
                message: "Configuring tiered storage volumes".to_string(),
                estimated_completion: None,
                error_details: None,
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        // Would fail if resumption re-ran allocation
        h.backend
            .fail_stage(ProvisioningStage::AllocateResources, 10, false);

        let resumed = h.manager.resume_incomplete().await.unwrap();
        assert_eq!(resumed, vec!["c8".to_string()]);
        h.manager.wait("c8").await;
        assert_eq!(
            h.manager.get_cluster("c8").await.unwrap().status,
            ClusterStatus::Active
        );
    }

    #[test]
    fn test_request_validation() {
        let mut bad = request("x");
        bad.node_count = 0;
        assert!(matches!(bad.validate(), Err(Error::InvalidInput(_))));
        let mut bad = request(" ");
        bad.node_count = 1;
        assert!(bad.validate().is_err());
    }
}
