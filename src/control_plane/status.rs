//! Provisioning progress and health snapshots

use super::{ClusterStatus, HealthStatus};
use crate::lifecycle::ProvisioningStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Last persisted provisioning progress of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningStatus {
    pub cluster_id: String,
    pub status: ClusterStatus,
    /// Last completed stage; `None` before the first stage runs
    pub stage: Option<ProvisioningStage>,
    /// 0 to 100
    pub progress: u8,
    pub message: String,
    pub estimated_completion: Option<DateTime<Utc>>,
    pub error_details: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of each probe in one health check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthChecks {
    pub connectivity: bool,
    pub query_performance: bool,
    pub storage_health: bool,
    pub replication_status: bool,
}

impl HealthChecks {
    pub fn all_passed(&self) -> bool {
        self.connectivity
            && self.query_performance
            && self.storage_health
            && self.replication_status
    }
}

/// One recorded health probe of a cluster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub cluster_id: String,
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub checks: HealthChecks,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
