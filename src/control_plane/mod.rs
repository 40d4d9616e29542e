//! Control-plane store
//!
//! The single source of truth for cluster status. Components read and write
//! cluster records here instead of caching status in memory, so that state
//! survives process restarts and nothing diverges.

mod cluster;
mod file;
mod local;
mod status;

pub use cluster::{
    Cluster, ClusterStatus, ClusterType, CostEstimate, Credentials, Endpoint, HealthStatus,
    NodeSizing, TierSizing,
};
pub use file::FileControlPlane;
pub use local::LocalControlPlane;
pub use status::{HealthChecks, HealthSnapshot, ProvisioningStatus};

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Partial update of a cluster record, applied atomically
#[derive(Debug, Clone, Default)]
pub struct ClusterPatch {
    /// Apply only if the stored status still equals this
    pub expect_status: Option<ClusterStatus>,
    pub status: Option<ClusterStatus>,
    pub health_status: Option<HealthStatus>,
    pub last_health_check: Option<DateTime<Utc>>,
    /// `Some(None)` clears the details
    pub error_details: Option<Option<String>>,
    pub endpoint: Option<Endpoint>,
    pub node_count: Option<u32>,
    pub tiers: Option<TierSizing>,
    pub cost: Option<CostEstimate>,
}

impl ClusterPatch {
    pub fn status(status: ClusterStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn expecting(mut self, status: ClusterStatus) -> Self {
        self.expect_status = Some(status);
        self
    }

    /// Apply to `cluster`. Returns false, leaving it untouched, when the
    /// status guard does not match.
    pub fn apply_to(self, cluster: &mut Cluster, now: DateTime<Utc>) -> bool {
        if let Some(expected) = self.expect_status {
            if cluster.status != expected {
                return false;
            }
        }
        if let Some(status) = self.status {
            cluster.status = status;
        }
        if let Some(health) = self.health_status {
            cluster.health_status = health;
        }
        if let Some(checked) = self.last_health_check {
            cluster.last_health_check = Some(checked);
        }
        if let Some(details) = self.error_details {
            cluster.error_details = details;
        }
        if let Some(endpoint) = self.endpoint {
            cluster.endpoint = Some(endpoint);
        }
        if let Some(node_count) = self.node_count {
            cluster.node_count = node_count;
        }
        if let Some(tiers) = self.tiers {
            cluster.tiers = tiers;
        }
        if let Some(cost) = self.cost {
            cluster.cost = cost;
        }
        cluster.updated_at = now;
        true
    }
}

/// Cluster metadata, provisioning status, and health snapshot storage
#[async_trait]
pub trait ControlPlaneStore: Send + Sync {
    /// Insert a new cluster. Fails if the id is taken.
    async fn insert_cluster(&self, cluster: Cluster) -> Result<()>;

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>>;

    /// All clusters, optionally only those in `status`, ordered by id
    async fn list_clusters(&self, status: Option<ClusterStatus>) -> Result<Vec<Cluster>>;

    /// Apply `patch` atomically. `Ok(None)` means the status guard rejected it.
    async fn apply_patch(&self, cluster_id: &str, patch: ClusterPatch) -> Result<Option<Cluster>>;

    async fn put_provisioning_status(&self, status: ProvisioningStatus) -> Result<()>;

    async fn get_provisioning_status(&self, cluster_id: &str) -> Result<Option<ProvisioningStatus>>;

    /// Keep `snapshot` as the latest health record of its cluster
    async fn record_health(&self, snapshot: HealthSnapshot) -> Result<()>;

    async fn latest_health(&self, cluster_id: &str) -> Result<Option<HealthSnapshot>>;
}

/// Load a cluster and require it to be serving traffic.
pub async fn require_active(store: &dyn ControlPlaneStore, cluster_id: &str) -> Result<Cluster> {
    let cluster = store
        .get_cluster(cluster_id)
        .await?
        .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))?;
    cluster.ensure_active()?;
    Ok(cluster)
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn cluster(id: &str, status: ClusterStatus) -> Cluster {
        let sizing = NodeSizing {
            cpu_per_node: 2,
            memory_per_node_gb: 8,
            storage_per_node_gb: 100,
        };
        let tiers = TierSizing::from_storage(1, &sizing, false);
        let now = Utc::now();
        Cluster {
            id: id.to_string(),
            display_key: id.to_uppercase(),
            cluster_type: ClusterType::Development,
            region: "eu-west-1".to_string(),
            node_count: 1,
            sizing,
            tiers,
            status,
            health_status: HealthStatus::Unknown,
            last_health_check: None,
            error_details: None,
            endpoint: Some(Endpoint {
                host: format!("{}.internal", id),
                port: 8123,
                secure: false,
            }),
            database: "telemetry".to_string(),
            admin_credentials: Credentials::new("admin", "admin-pw"),
            readonly_credentials: Credentials::new("reader", "reader-pw"),
            cost: CostEstimate::compute(1, &sizing, &tiers),
            created_at: now,
            updated_at: now,
        }
    }
}
