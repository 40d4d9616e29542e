//! Component factory for environment-based configuration
//!
//! Picks the engine connector, control-plane store, and provisioning backend
//! from environment variables, so the same binary runs fully in memory for
//! development or against ClickHouse with persisted control-plane state.

use crate::connection::{ClickHouseConnector, EngineConnector, MemoryConnector};
use crate::control_plane::{ControlPlaneStore, FileControlPlane, LocalControlPlane};
use crate::lifecycle::{ProvisioningBackend, SimulatedBackend};
use crate::{Error, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_STATE_PATH: &str = "millwright-state.json";

/// Analytics engine the connection manager talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineBackend {
    Memory,
    ClickHouse,
}

impl std::str::FromStr for EngineBackend {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "clickhouse" => Ok(Self::ClickHouse),
            other => Err(Error::Config(format!(
                "Unknown MILLWRIGHT_ENGINE: {}. Use 'memory' or 'clickhouse'",
                other
            ))),
        }
    }
}

/// Where cluster records and provisioning progress are kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlPlaneBackend {
    Memory,
    File(PathBuf),
}

impl ControlPlaneBackend {
    pub fn parse(kind: &str, path: Option<String>) -> Result<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "file" => Ok(Self::File(PathBuf::from(
                path.unwrap_or_else(|| DEFAULT_STATE_PATH.to_string()),
            ))),
            other => Err(Error::Config(format!(
                "Unknown MILLWRIGHT_CONTROL_PLANE: {}. Use 'memory' or 'file'",
                other
            ))),
        }
    }
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create the engine connector from environment
    ///
    /// Environment variables:
    /// - MILLWRIGHT_ENGINE: "memory" (default) or "clickhouse"
    pub fn create_connector() -> Result<Arc<dyn EngineConnector>> {
        let backend: EngineBackend = std::env::var("MILLWRIGHT_ENGINE")
            .unwrap_or_else(|_| "memory".to_string())
            .parse()?;
        Ok(Self::create_connector_for(backend))
    }

    pub fn create_connector_for(backend: EngineBackend) -> Arc<dyn EngineConnector> {
        match backend {
            EngineBackend::Memory => {
                info!("Using in-memory analytics engine (development mode)");
                Arc::new(MemoryConnector::new())
            }
            EngineBackend::ClickHouse => {
                info!("Using ClickHouse analytics engine");
                Arc::new(ClickHouseConnector)
            }
        }
    }

    /// Create the control-plane store from environment
    ///
    /// Environment variables:
    /// - MILLWRIGHT_CONTROL_PLANE: "memory" (default) or "file"
    /// - MILLWRIGHT_STATE_PATH: snapshot path for "file" (default: millwright-state.json)
    pub async fn create_control_plane() -> Result<Arc<dyn ControlPlaneStore>> {
        let kind =
            std::env::var("MILLWRIGHT_CONTROL_PLANE").unwrap_or_else(|_| "memory".to_string());
        let state_path = std::env::var("MILLWRIGHT_STATE_PATH").ok();
        let backend = ControlPlaneBackend::parse(&kind, state_path)?;
        Self::create_control_plane_for(&backend).await
    }

    pub async fn create_control_plane_for(
        backend: &ControlPlaneBackend,
    ) -> Result<Arc<dyn ControlPlaneStore>> {
        match backend {
            ControlPlaneBackend::Memory => {
                info!("Using in-memory control plane; cluster state is lost on restart");
                Ok(Arc::new(LocalControlPlane::new()))
            }
            ControlPlaneBackend::File(path) => {
                info!(path = %path.display(), "Using file-backed control plane");
                Ok(Arc::new(FileControlPlane::open(path).await?))
            }
        }
    }

    /// Create the provisioning backend from environment
    ///
    /// Environment variables:
    /// - MILLWRIGHT_STAGE_DELAY_MS: simulated time per stage (default: 500)
    /// - MILLWRIGHT_CLUSTER_DOMAIN: domain allocated clusters are reachable under
    ///   (default: clusters.local)
    pub fn create_provisioning_backend() -> Result<Arc<dyn ProvisioningBackend>> {
        let delay_ms = match std::env::var("MILLWRIGHT_STAGE_DELAY_MS") {
            Ok(raw) => raw.trim().parse::<u64>().map_err(|e| {
                Error::Config(format!("MILLWRIGHT_STAGE_DELAY_MS must be an integer: {e}"))
            })?,
            Err(_) => 500,
        };
        let mut backend = SimulatedBackend::new(Duration::from_millis(delay_ms));
        if let Ok(domain) = std::env::var("MILLWRIGHT_CLUSTER_DOMAIN") {
            backend = backend.with_domain(domain.trim());
        }
        info!(stage_delay_ms = delay_ms, "Using simulated provisioning backend");
        Ok(Arc::new(backend))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_backend_parse() {
        assert_eq!("memory".parse::<EngineBackend>().unwrap(), EngineBackend::Memory);
        assert_eq!(" ClickHouse ".parse::<EngineBackend>().unwrap(), EngineBackend::ClickHouse);
        assert!(matches!("postgres".parse::<EngineBackend>(), Err(Error::Config(_))));
    }

    #[test]
    fn test_control_plane_backend_parse() {
        assert_eq!(
            ControlPlaneBackend::parse("memory", None).unwrap(),
            ControlPlaneBackend::Memory
        );
        assert_eq!(
            ControlPlaneBackend::parse("file", None).unwrap(),
            ControlPlaneBackend::File(PathBuf::from(DEFAULT_STATE_PATH))
        );
        assert_eq!(
            ControlPlaneBackend::parse("file", Some("/var/lib/mw.json".into())).unwrap(),
            ControlPlaneBackend::File(PathBuf::from("/var/lib/mw.json"))
        );
        assert!(ControlPlaneBackend::parse("etcd", None).is_err());
    }

    #[tokio::test]
    async fn test_file_control_plane_created_at_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let store = ComponentFactory::create_control_plane_for(&ControlPlaneBackend::File(path))
            .await
            .unwrap();
        assert!(store.list_clusters(None).await.unwrap().is_empty());
    }
}
