//! Local in-memory control plane for development and testing

use super::{
    Cluster, ClusterPatch, ClusterStatus, ControlPlaneStore, HealthSnapshot, ProvisioningStatus,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;

/// In-memory control plane. State is lost on restart.
#[derive(Debug, Default)]
pub struct LocalControlPlane {
    clusters: DashMap<String, Cluster>,
    provisioning: DashMap<String, ProvisioningStatus>,
    health: DashMap<String, HealthSnapshot>,
}

impl LocalControlPlane {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ControlPlaneStore for LocalControlPlane {
    async fn insert_cluster(&self, cluster: Cluster) -> Result<()> {
        match self.clusters.entry(cluster.id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(Error::InvalidInput(format!(
                "cluster {} already exists",
                cluster.id
            ))),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(cluster);
                Ok(())
            }
        }
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        Ok(self.clusters.get(cluster_id).map(|c| c.clone()))
    }

    async fn list_clusters(&self, status: Option<ClusterStatus>) -> Result<Vec<Cluster>> {
        let mut clusters: Vec<Cluster> = self
            .clusters
            .iter()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .map(|c| c.clone())
            .collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clusters)
    }

    async fn apply_patch(&self, cluster_id: &str, patch: ClusterPatch) -> Result<Option<Cluster>> {
        let mut cluster = self
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))?;
        if patch.apply_to(&mut cluster, Utc::now()) {
            Ok(Some(cluster.clone()))
        } else {
            Ok(None)
        }
    }

    async fn put_provisioning_status(&self, status: ProvisioningStatus) -> Result<()> {
        self.provisioning.insert(status.cluster_id.clone(), status);
        Ok(())
    }

    async fn get_provisioning_status(
        &self,
        cluster_id: &str,
    ) -> Result<Option<ProvisioningStatus>> {
        Ok(self.provisioning.get(cluster_id).map(|s| s.clone()))
    }

    async fn record_health(&self, snapshot: HealthSnapshot) -> Result<()> {
        self.health.insert(snapshot.cluster_id.clone(), snapshot);
        Ok(())
    }

    async fn latest_health(&self, cluster_id: &str) -> Result<Option<HealthSnapshot>> {
        Ok(self.health.get(cluster_id).map(|s| s.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::fixtures::cluster;

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let store = LocalControlPlane::new();
        store.insert_cluster(cluster("c1", ClusterStatus::Initializing)).await.unwrap();
        assert!(store
            .insert_cluster(cluster("c1", ClusterStatus::Initializing))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_list_filters_by_status() {
        let store = LocalControlPlane::new();
        store.insert_cluster(cluster("b", ClusterStatus::Active)).await.unwrap();
        store.insert_cluster(cluster("a", ClusterStatus::Active)).await.unwrap();
        store.insert_cluster(cluster("c", ClusterStatus::Error)).await.unwrap();

        let active = store.list_clusters(Some(ClusterStatus::Active)).await.unwrap();
        let ids: Vec<_> = active.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(store.list_clusters(None).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_patch_unknown_cluster() {
        let store = LocalControlPlane::new();
        let result = store
            .apply_patch("ghost", ClusterPatch::status(ClusterStatus::Active))
            .await;
        assert!(matches!(result, Err(Error::ClusterNotFound(_))));
    }
}
