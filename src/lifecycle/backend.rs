//! Provisioning backends
//!
//! The lifecycle manager drives stages; a backend performs them. The
//! simulated backend stands in for a real infrastructure provider.

use super::ProvisioningStage;
use crate::control_plane::{Cluster, Endpoint};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Performs the infrastructure side of each lifecycle step
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Reserve nodes and return the endpoint clients should connect to
    async fn allocate(&self, cluster: &Cluster) -> Result<Endpoint>;

    /// Perform one post-allocation stage
    async fn run_stage(&self, cluster: &Cluster, stage: ProvisioningStage) -> Result<()>;

    /// Move data to match a new node count
    async fn rebalance(&self, cluster: &Cluster, node_count: u32) -> Result<()>;

    /// Give the cluster's resources back. Best effort.
    async fn release(&self, cluster: &Cluster) -> Result<()>;
}

/// Backend that only waits. Every cluster is reachable at
/// `<cluster-id>.<domain>:<port>`.
#[derive(Debug)]
pub struct SimulatedBackend {
    stage_delay: Duration,
    domain: String,
    port: u16,
    /// Pending injected failures per stage: (remaining count, transient)
    failures: Mutex<HashMap<ProvisioningStage, (u32, bool)>>,
}

impl SimulatedBackend {
    pub fn new(stage_delay: Duration) -> Self {
        Self {
            stage_delay,
            domain: "clusters.local".to_string(),
            port: 8123,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    /// Make `stage` fail its next `times` attempts.
    pub fn fail_stage(&self, stage: ProvisioningStage, times: u32, transient: bool) {
        self.failures.lock().insert(stage, (times, transient));
    }

    fn injected_failure(&self, stage: ProvisioningStage) -> Option<Error> {
        let mut failures = self.failures.lock();
        let (remaining, transient) = failures.get_mut(&stage)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        let message = format!("simulated failure in {}", stage.as_str());
        Some(if *transient {
            Error::Connectivity(message)
        } else {
            Error::Lifecycle(message)
        })
    }

    async fn step(&self, stage: ProvisioningStage) -> Result<()> {
        if !self.stage_delay.is_zero() {
            tokio::time::sleep(self.stage_delay).await;
        }
        match self.injected_failure(stage) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new(Duration::from_millis(500))
    }
}

#[async_trait]
impl ProvisioningBackend for SimulatedBackend {
    async fn allocate(&self, cluster: &Cluster) -> Result<Endpoint> {
        self.step(ProvisioningStage::AllocateResources).await?;
        Ok(Endpoint {
            host: format!("{}.{}", cluster.id, self.domain),
            port: self.port,
            secure: false,
        })
    }

    async fn run_stage(&self, cluster: &Cluster, stage: ProvisioningStage) -> Result<()> {
        debug!(cluster_id = %cluster.id, stage = stage.as_str(), "Simulating stage");
        self.step(stage).await
    }

    async fn rebalance(&self, cluster: &Cluster, node_count: u32) -> Result<()> {
        debug!(
            cluster_id = %cluster.id,
            from = cluster.node_count,
            to = node_count,
            "Simulating rebalance"
        );
        if !self.stage_delay.is_zero() {
            tokio::time::sleep(self.stage_delay).await;
        }
        Ok(())
    }

    async fn release(&self, cluster: &Cluster) -> Result<()> {
        debug!(cluster_id = %cluster.id, "Simulating resource release");
        Ok(())
    }
}
