//! Cluster records

use crate::connection::{ConnectionConfig, Principal};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterType {
    Production,
    Development,
    Analytics,
}

impl ClusterType {
    /// Provisioning time weight; production clusters take longer to stand up
    pub fn duration_weight(&self) -> f64 {
        match self {
            ClusterType::Production => 1.5,
            ClusterType::Development | ClusterType::Analytics => 1.0,
        }
    }
}

/// Lifecycle state of a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    Initializing,
    Provisioning,
    Configuring,
    Testing,
    Active,
    Error,
    Terminated,
}

impl ClusterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClusterStatus::Initializing => "initializing",
            ClusterStatus::Provisioning => "provisioning",
            ClusterStatus::Configuring => "configuring",
            ClusterStatus::Testing => "testing",
            ClusterStatus::Active => "active",
            ClusterStatus::Error => "error",
            ClusterStatus::Terminated => "terminated",
        }
    }

    /// Mid-provisioning states a driver may be resumed from
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            ClusterStatus::Initializing
                | ClusterStatus::Provisioning
                | ClusterStatus::Configuring
                | ClusterStatus::Testing
        )
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    #[default]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

/// Per-node hardware sizing
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeSizing {
    pub cpu_per_node: u32,
    pub memory_per_node_gb: u32,
    pub storage_per_node_gb: u32,
}

/// Estimated data volume per storage tier
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierSizing {
    pub hot_gb: f64,
    pub warm_gb: f64,
    pub cold_gb: f64,
    /// Cold data beyond the archive threshold moves to archive pricing
    pub archive_enabled: bool,
}

impl TierSizing {
    /// Split total cluster storage 30/30/40 across hot, warm, and cold.
    pub fn from_storage(node_count: u32, sizing: &NodeSizing, archive_enabled: bool) -> Self {
        let total = f64::from(node_count) * f64::from(sizing.storage_per_node_gb);
        Self {
            hot_gb: total * 0.3,
            warm_gb: total * 0.3,
            cold_gb: total * 0.4,
            archive_enabled,
        }
    }
}

/// Monthly cost estimate in USD
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CostEstimate {
    pub compute_monthly: f64,
    pub storage_monthly: f64,
    pub total_monthly: f64,
}

impl CostEstimate {
    const CPU_MONTH: f64 = 25.0;
    const MEMORY_GB_MONTH: f64 = 3.0;
    const HOT_GB_MONTH: f64 = 0.10;
    const WARM_GB_MONTH: f64 = 0.05;
    const COLD_GB_MONTH: f64 = 0.02;
    const ARCHIVE_GB_MONTH: f64 = 0.004;

    pub fn compute(node_count: u32, sizing: &NodeSizing, tiers: &TierSizing) -> Self {
        let nodes = f64::from(node_count);
        let compute_monthly = nodes
            * (f64::from(sizing.cpu_per_node) * Self::CPU_MONTH
                + f64::from(sizing.memory_per_node_gb) * Self::MEMORY_GB_MONTH);
        let cold_rate = if tiers.archive_enabled {
            Self::ARCHIVE_GB_MONTH
        } else {
            Self::COLD_GB_MONTH
        };
        let storage_monthly = tiers.hot_gb * Self::HOT_GB_MONTH
            + tiers.warm_gb * Self::WARM_GB_MONTH
            + tiers.cold_gb * cold_rate;
        Self {
            compute_monthly,
            storage_monthly,
            total_monthly: compute_monthly + storage_monthly,
        }
    }
}

/// Username and password for one cluster account
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Network endpoint of an allocated cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub secure: bool,
}

/// A telemetry cluster as recorded in the control plane
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub display_key: String,
    pub cluster_type: ClusterType,
    pub region: String,
    pub node_count: u32,
    pub sizing: NodeSizing,
    pub tiers: TierSizing,
    pub status: ClusterStatus,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub error_details: Option<String>,
    /// Set once the backend has allocated the cluster
    pub endpoint: Option<Endpoint>,
    pub database: String,
    pub admin_credentials: Credentials,
    pub readonly_credentials: Credentials,
    pub cost: CostEstimate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    /// Health as callers should read it: without a recorded check it is unknown.
    pub fn effective_health(&self) -> HealthStatus {
        match self.last_health_check {
            Some(_) => self.health_status,
            None => HealthStatus::Unknown,
        }
    }

    pub fn ensure_active(&self) -> Result<()> {
        if self.status == ClusterStatus::Active {
            Ok(())
        } else {
            Err(Error::ClusterNotActive {
                cluster_id: self.id.clone(),
                status: self.status.to_string(),
            })
        }
    }

    pub fn credentials(&self, principal: Principal) -> &Credentials {
        match principal {
            Principal::Admin => &self.admin_credentials,
            Principal::ReadOnly => &self.readonly_credentials,
        }
    }

    pub fn connection_config(&self, principal: Principal) -> Result<ConnectionConfig> {
        let endpoint = self.endpoint.as_ref().ok_or_else(|| {
            Error::Connectivity(format!("cluster {} has no allocated endpoint", self.id))
        })?;
        let credentials = self.credentials(principal);
        let mut config = ConnectionConfig::new(&endpoint.host, endpoint.port, &credentials.username)
            .with_password(&credentials.password)
            .with_database(&self.database);
        config.secure = endpoint.secure;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizing() -> NodeSizing {
        NodeSizing {
            cpu_per_node: 4,
            memory_per_node_gb: 16,
            storage_per_node_gb: 1000,
        }
    }

    #[test]
    fn test_cost_estimate_scales_with_nodes() {
        let tiers = TierSizing::from_storage(2, &sizing(), false);
        let two = CostEstimate::compute(2, &sizing(), &tiers);
        assert!((two.compute_monthly - 2.0 * (4.0 * 25.0 + 16.0 * 3.0)).abs() < 1e-9);
        assert!((two.storage_monthly - (600.0 * 0.10 + 600.0 * 0.05 + 800.0 * 0.02)).abs() < 1e-9);

        let archived = CostEstimate::compute(
            2,
            &sizing(),
            &TierSizing {
                archive_enabled: true,
                ..tiers
            },
        );
        assert!(archived.storage_monthly < two.storage_monthly);
    }

    #[test]
    fn test_status_provisioning_states() {
        assert!(ClusterStatus::Testing.is_provisioning());
        assert!(!ClusterStatus::Active.is_provisioning());
        assert!(!ClusterStatus::Error.is_provisioning());
        assert_eq!(
            serde_json::to_string(&ClusterStatus::Configuring).unwrap(),
            "\"configuring\""
        );
    }

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials::new("admin", "pa55");
        assert!(!format!("{:?}", creds).contains("pa55"));
    }
}
