//! File-backed control plane
//!
//! Keeps the whole control-plane state in one JSON document. Every mutation
//! rewrites the document through a temporary file and an atomic rename, so a
//! crash leaves either the previous or the new state on disk.

use super::{
    Cluster, ClusterPatch, ClusterStatus, ControlPlaneStore, HealthSnapshot, ProvisioningStatus,
};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ControlPlaneState {
    clusters: BTreeMap<String, Cluster>,
    provisioning: BTreeMap<String, ProvisioningStatus>,
    health: BTreeMap<String, HealthSnapshot>,
}

/// Control plane persisted to a JSON snapshot file
#[derive(Debug)]
pub struct FileControlPlane {
    path: PathBuf,
    state: Mutex<ControlPlaneState>,
}

impl FileControlPlane {
    /// Open the snapshot at `path`, starting empty if it does not exist.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ControlPlaneState::default(),
            Err(e) => return Err(e.into()),
        };
        info!(
            path = %path.display(),
            clusters = state.clusters.len(),
            "Opened file control plane"
        );
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &ControlPlaneState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "Persisted control plane");
        Ok(())
    }
}

#[async_trait]
impl ControlPlaneStore for FileControlPlane {
    async fn insert_cluster(&self, cluster: Cluster) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.clusters.contains_key(&cluster.id) {
            return Err(Error::InvalidInput(format!(
                "cluster {} already exists",
                cluster.id
            )));
        }
        state.clusters.insert(cluster.id.clone(), cluster);
        self.persist(&state).await
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        Ok(self.state.lock().await.clusters.get(cluster_id).cloned())
    }

    async fn list_clusters(&self, status: Option<ClusterStatus>) -> Result<Vec<Cluster>> {
        let state = self.state.lock().await;
        Ok(state
            .clusters
            .values()
            .filter(|c| status.map_or(true, |s| c.status == s))
            .cloned()
            .collect())
    }

    async fn apply_patch(&self, cluster_id: &str, patch: ClusterPatch) -> Result<Option<Cluster>> {
        let mut state = self.state.lock().await;
        let cluster = state
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))?;
        if !patch.apply_to(cluster, Utc::now()) {
            return Ok(None);
        }
        let updated = cluster.clone();
        self.persist(&state).await?;
        Ok(Some(updated))
    }

    async fn put_provisioning_status(&self, status: ProvisioningStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        state.provisioning.insert(status.cluster_id.clone(), status);
        self.persist(&state).await
    }

    async fn get_provisioning_status(
        &self,
        cluster_id: &str,
    ) -> Result<Option<ProvisioningStatus>> {
        Ok(self.state.lock().await.provisioning.get(cluster_id).cloned())
    }

    async fn record_health(&self, snapshot: HealthSnapshot) -> Result<()> {
        let mut state = self.state.lock().await;
        state.health.insert(snapshot.cluster_id.clone(), snapshot);
        self.persist(&state).await
    }

    async fn latest_health(&self, cluster_id: &str) -> Result<Option<HealthSnapshot>> {
        Ok(self.state.lock().await.health.get(cluster_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_plane::fixtures::cluster;
    use crate::control_plane::HealthStatus;

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control-plane.json");

        {
            let store = FileControlPlane::open(&path).await.unwrap();
            store.insert_cluster(cluster("c1", ClusterStatus::Provisioning)).await.unwrap();
            store
                .apply_patch(
                    "c1",
                    ClusterPatch {
                        health_status: Some(HealthStatus::Healthy),
                        ..ClusterPatch::status(ClusterStatus::Configuring)
                    },
                )
                .await
                .unwrap();
        }

        let reopened = FileControlPlane::open(&path).await.unwrap();
        let c1 = reopened.get_cluster("c1").await.unwrap().unwrap();
        assert_eq!(c1.status, ClusterStatus::Configuring);
        assert_eq!(c1.health_status, HealthStatus::Healthy);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_rejected_patch_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let store = FileControlPlane::open(&path).await.unwrap();
        store.insert_cluster(cluster("c1", ClusterStatus::Terminated)).await.unwrap();

        let outcome = store
            .apply_patch(
                "c1",
                ClusterPatch::status(ClusterStatus::Active).expecting(ClusterStatus::Testing),
            )
            .await
            .unwrap();
        assert!(outcome.is_none());
        let reopened = FileControlPlane::open(&path).await.unwrap();
        assert_eq!(
            reopened.get_cluster("c1").await.unwrap().unwrap().status,
            ClusterStatus::Terminated
        );
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            FileControlPlane::open(&path).await,
            Err(Error::Serialization(_))
        ));
    }
}
