//! Engine connectors

use super::ConnectionConfig;
use crate::engine::{ClickHouseEngine, MemoryEngine, TelemetryEngine};
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Opens a client handle for a connection config. The connection manager
/// owns caching and liveness probing.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn TelemetryEngine>>;
}

/// Connector for real ClickHouse servers
#[derive(Debug, Default, Clone, Copy)]
pub struct ClickHouseConnector;

#[async_trait]
impl EngineConnector for ClickHouseConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn TelemetryEngine>> {
        Ok(Arc::new(ClickHouseEngine::new(config)))
    }
}

/// Connector resolving each `host:port` to one shared in-memory server.
///
/// Every principal connecting to the same endpoint sees the same data.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    servers: DashMap<(String, u16), Arc<MemoryEngine>>,
    connects: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server behind `host:port`, created on first use
    pub fn server(&self, host: &str, port: u16) -> Arc<MemoryEngine> {
        self.servers
            .entry((host.to_string(), port))
            .or_insert_with(|| Arc::new(MemoryEngine::new()))
            .clone()
    }

    /// Number of client handles opened so far
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineConnector for MemoryConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Arc<dyn TelemetryEngine>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.server(&config.host, config.port))
    }
}
