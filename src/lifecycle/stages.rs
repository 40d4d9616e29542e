//! Ordered provisioning stages

use crate::control_plane::{ClusterStatus, ClusterType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Fixed-order provisioning stages. Progress is strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStage {
    AllocateResources,
    ConfigureNetwork,
    InstallEngine,
    ConfigureStorage,
    CreateAccounts,
    VerifyConnectivity,
    Finalize,
}

impl ProvisioningStage {
    pub const ALL: [ProvisioningStage; 7] = [
        ProvisioningStage::AllocateResources,
        ProvisioningStage::ConfigureNetwork,
        ProvisioningStage::InstallEngine,
        ProvisioningStage::ConfigureStorage,
        ProvisioningStage::CreateAccounts,
        ProvisioningStage::VerifyConnectivity,
        ProvisioningStage::Finalize,
    ];

    /// Progress reported once the stage completes
    pub fn progress(&self) -> u8 {
        match self {
            ProvisioningStage::AllocateResources => 10,
            ProvisioningStage::ConfigureNetwork => 25,
            ProvisioningStage::InstallEngine => 40,
            ProvisioningStage::ConfigureStorage => 60,
            ProvisioningStage::CreateAccounts => 75,
            ProvisioningStage::VerifyConnectivity => 90,
            ProvisioningStage::Finalize => 100,
        }
    }

    /// Cluster status while this stage is the latest completed one
    pub fn status(&self) -> ClusterStatus {
        match self {
            ProvisioningStage::AllocateResources | ProvisioningStage::ConfigureNetwork => {
                ClusterStatus::Provisioning
            }
            ProvisioningStage::InstallEngine
            | ProvisioningStage::ConfigureStorage
            | ProvisioningStage::CreateAccounts => ClusterStatus::Configuring,
            ProvisioningStage::VerifyConnectivity | ProvisioningStage::Finalize => {
                ClusterStatus::Testing
            }
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ProvisioningStage::AllocateResources => "Allocating compute and storage resources",
            ProvisioningStage::ConfigureNetwork => "Configuring network access",
            ProvisioningStage::InstallEngine => "Installing analytics engine",
            ProvisioningStage::ConfigureStorage => "Configuring tiered storage volumes",
            ProvisioningStage::CreateAccounts => "Creating admin and read-only accounts",
            ProvisioningStage::VerifyConnectivity => "Running connectivity tests",
            ProvisioningStage::Finalize => "Finalizing cluster",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProvisioningStage::AllocateResources => "allocate_resources",
            ProvisioningStage::ConfigureNetwork => "configure_network",
            ProvisioningStage::InstallEngine => "install_engine",
            ProvisioningStage::ConfigureStorage => "configure_storage",
            ProvisioningStage::CreateAccounts => "create_accounts",
            ProvisioningStage::VerifyConnectivity => "verify_connectivity",
            ProvisioningStage::Finalize => "finalize",
        }
    }

    /// Stages still to run after `completed`
    pub fn remaining(
        completed: Option<ProvisioningStage>,
    ) -> impl Iterator<Item = ProvisioningStage> {
        Self::ALL
            .into_iter()
            .filter(move |stage| completed.map_or(true, |done| *stage > done))
    }
}

/// Advisory end-to-end provisioning estimate. Never gates progress.
pub fn estimate_duration(cluster_type: ClusterType, node_count: u32) -> Duration {
    const BASE_SECS: f64 = 120.0;
    const PER_NODE_SECS: f64 = 60.0;
    let secs = (BASE_SECS + PER_NODE_SECS * f64::from(node_count)) * cluster_type.duration_weight();
    Duration::from_secs_f64(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_strictly_increasing() {
        let progress: Vec<u8> = ProvisioningStage::ALL.iter().map(|s| s.progress()).collect();
        assert!(progress.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(progress.last(), Some(&100));
    }

    #[test]
    fn test_status_sequence_follows_state_machine() {
        let mut statuses: Vec<ClusterStatus> =
            ProvisioningStage::ALL.iter().map(|s| s.status()).collect();
        statuses.dedup();
        assert_eq!(
            statuses,
            vec![
                ClusterStatus::Provisioning,
                ClusterStatus::Configuring,
                ClusterStatus::Testing
            ]
        );
    }

    #[test]
    fn test_remaining_after_resume_point() {
        let rest: Vec<_> =
            ProvisioningStage::remaining(Some(ProvisioningStage::CreateAccounts)).collect();
        assert_eq!(
            rest,
            vec![ProvisioningStage::VerifyConnectivity, ProvisioningStage::Finalize]
        );
        assert_eq!(ProvisioningStage::remaining(None).count(), 7);
    }

    #[test]
    fn test_production_weighting() {
        let dev = estimate_duration(ClusterType::Development, 3);
        let prod = estimate_duration(ClusterType::Production, 3);
        assert_eq!(dev, Duration::from_secs(300));
        assert_eq!(prod, Duration::from_secs(450));
    }
}
