//! Connection manager
//!
//! Holds at most one live client handle per (host, port, principal). Each key
//! owns a slot guarded by an async mutex: concurrent `acquire` calls for the
//! same key queue on the slot, the first one connects and probes, the rest
//! reuse its handle. `release` takes the same lock, so eviction never races an
//! in-flight `acquire`.

mod connector;
mod descriptor;

pub use connector::{ClickHouseConnector, EngineConnector, MemoryConnector};
pub use descriptor::{ConnectionConfig, DEFAULT_DATABASE, DEFAULT_PLAIN_PORT, DEFAULT_SECURE_PORT};

use crate::control_plane::Cluster;
use crate::engine::TelemetryEngine;
use crate::{Error, Result};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Which of a cluster's two accounts a caller connects as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Principal {
    /// Schema creation and ingestion
    Admin,
    /// Queries and health probes
    ReadOnly,
}

/// Cache key of a client handle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub host: String,
    pub port: u16,
    pub principal: String,
}

impl ConnectionKey {
    pub fn new(host: &str, port: u16, principal: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            principal: principal.to_string(),
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.principal, self.host, self.port)
    }
}

/// Connection manager configuration
#[derive(Debug, Clone)]
pub struct ConnectionManagerConfig {
    /// Deadline for opening a client plus its liveness probe
    pub probe_timeout: Duration,
    /// Default deadline for a single engine call
    pub operation_timeout: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(30),
        }
    }
}

/// A live, probed client handle
pub struct Connection {
    id: Uuid,
    key: ConnectionKey,
    config: ConnectionConfig,
    engine: Arc<dyn TelemetryEngine>,
    operation_timeout: Duration,
}

impl Connection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn database(&self) -> &str {
        &self.config.database
    }

    pub fn engine(&self) -> &dyn TelemetryEngine {
        self.engine.as_ref()
    }

    /// Run one engine call under the handle's deadline. A timed-out call is
    /// dropped; the handle stays usable.
    pub async fn run<T, F>(&self, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.run_with_timeout(operation, self.operation_timeout, call)
            .await
    }

    pub async fn run_with_timeout<T, F>(
        &self,
        operation: &str,
        timeout: Duration,
        call: F,
    ) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(connection = %self.key, operation, ?timeout, "Engine call timed out");
                Err(Error::Timeout(format!(
                    "{} on {} exceeded {:?}",
                    operation, self.key, timeout
                )))
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("key", &self.key)
            .finish()
    }
}

type Slot = Arc<Mutex<Option<Arc<Connection>>>>;

/// Registry of client handles, owned by the composition root
pub struct ConnectionManager {
    connector: Arc<dyn EngineConnector>,
    config: ConnectionManagerConfig,
    slots: DashMap<ConnectionKey, Slot>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn EngineConnector>, config: ConnectionManagerConfig) -> Self {
        Self {
            connector,
            config,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, key: &ConnectionKey) -> Slot {
        // Clone out of the map so no shard lock is held across an await
        self.slots.entry(key.clone()).or_default().clone()
    }

    /// Return the cached handle for `config`'s key, or open, probe, and cache a new one.
    pub async fn acquire(&self, config: &ConnectionConfig) -> Result<Arc<Connection>> {
        let key = config.key();
        let slot = self.slot(&key);
        let mut guard = slot.lock().await;

        if let Some(existing) = guard.as_ref() {
            return Ok(existing.clone());
        }

        let engine = tokio::time::timeout(self.config.probe_timeout, self.connector.connect(config))
            .await
            .map_err(|_| Error::Connectivity(format!("connecting to {} timed out", key)))??;

        let probe = tokio::time::timeout(self.config.probe_timeout, engine.ping()).await;
        let failure = match probe {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("liveness probe to {} failed: {}", key, e)),
            Err(_) => Some(format!(
                "liveness probe to {} exceeded {:?}",
                key, self.config.probe_timeout
            )),
        };
        if let Some(message) = failure {
            engine.close().await;
            warn!(connection = %key, "{}", message);
            return Err(Error::Connectivity(message));
        }

        let connection = Arc::new(Connection {
            id: Uuid::new_v4(),
            key: key.clone(),
            config: config.clone(),
            engine,
            operation_timeout: self.config.operation_timeout,
        });
        *guard = Some(connection.clone());
        info!(connection = %key, handle = %connection.id, "Opened engine connection");
        Ok(connection)
    }

    /// Acquire a handle for one of a cluster's principals.
    pub async fn acquire_for_cluster(
        &self,
        cluster: &Cluster,
        principal: Principal,
    ) -> Result<Arc<Connection>> {
        let config = cluster.connection_config(principal)?;
        self.acquire(&config).await
    }

    /// Close and evict one handle. Unknown keys are ignored.
    pub async fn release(&self, host: &str, port: u16, principal: &str) {
        let key = ConnectionKey::new(host, port, principal);
        let Some(slot) = self.slots.get(&key).map(|s| s.value().clone()) else {
            return;
        };
        let mut guard = slot.lock().await;
        if let Some(connection) = guard.take() {
            connection.engine.close().await;
            info!(connection = %key, handle = %connection.id, "Released engine connection");
        }
        drop(guard);
        drop(slot);
        self.evict_idle(&key);
    }

    /// Drop an empty slot nobody else is holding. A concurrent `acquire`
    /// keeps its own clone of the slot, so its entry survives.
    fn evict_idle(&self, key: &ConnectionKey) {
        self.slots.remove_if(key, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot.try_lock().map(|guard| guard.is_none()).unwrap_or(false)
        });
    }

    /// Release every handle a cluster's principals may hold.
    pub async fn release_cluster(&self, cluster: &Cluster) {
        for principal in [Principal::Admin, Principal::ReadOnly] {
            if let Ok(config) = cluster.connection_config(principal) {
                self.release(&config.host, config.port, &config.username)
                    .await;
            }
        }
    }

    /// Close and evict everything. Used at shutdown.
    pub async fn release_all(&self) {
        let slots: Vec<(ConnectionKey, Slot)> = self
            .slots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut closed = 0usize;
        for (key, slot) in slots {
            let mut guard = slot.lock().await;
            if let Some(connection) = guard.take() {
                connection.engine.close().await;
                debug!(connection = %key, "Closed engine connection");
                closed += 1;
            }
            drop(guard);
            drop(slot);
            self.evict_idle(&key);
        }
        info!(closed, "Released all engine connections");
    }

    /// Number of keys currently holding a live handle
    pub fn live_handles(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .try_lock()
                    .map(|guard| guard.is_some())
                    .unwrap_or(true)
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (Arc<MemoryConnector>, Arc<ConnectionManager>) {
        let connector = Arc::new(MemoryConnector::new());
        let manager = Arc::new(ConnectionManager::new(
            connector.clone(),
            ConnectionManagerConfig::default(),
        ));
        (connector, manager)
    }

    #[tokio::test]
    async fn test_concurrent_acquire_shares_handle() {
        let (connector, manager) = manager();
        let config = ConnectionConfig::new("db-1", 8123, "admin");

        let (a, b) = tokio::join!(manager.acquire(&config), manager.acquire(&config));
        let (a, b) = (a.unwrap(), b.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(connector.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_release_then_acquire_creates_new_handle() {
        let (connector, manager) = manager();
        let config = ConnectionConfig::new("db-1", 8123, "admin");

        let first = manager.acquire(&config).await.unwrap();
        manager.release("db-1", 8123, "admin").await;
        let second = manager.acquire(&config).await.unwrap();

        assert_ne!(first.id(), second.id());
        assert_eq!(connector.connect_count(), 2);
        assert_eq!(connector.server("db-1", 8123).close_count(), 1);
    }

    #[tokio::test]
    async fn test_release_forgets_key() {
        let (_, manager) = manager();
        for host in ["line-1", "line-2"] {
            manager
                .acquire(&ConnectionConfig::new(host, 8123, "admin"))
                .await
                .unwrap();
        }
        assert_eq!(manager.slots.len(), 2);

        manager.release("line-1", 8123, "admin").await;
        assert_eq!(manager.slots.len(), 1);
        assert!(!manager.slots.contains_key(&ConnectionKey::new("line-1", 8123, "admin")));

        manager.release_all().await;
        assert!(manager.slots.is_empty());
    }

    #[tokio::test]
    async fn test_principals_get_distinct_handles() {
        let (_, manager) = manager();
        let admin = manager
            .acquire(&ConnectionConfig::new("db-1", 8123, "admin"))
            .await
            .unwrap();
        let reader = manager
            .acquire(&ConnectionConfig::new("db-1", 8123, "reader"))
            .await
            .unwrap();
        assert_ne!(admin.id(), reader.id());
        assert_eq!(manager.live_handles(), 2);
    }

    #[tokio::test]
    async fn test_failed_probe_caches_nothing() {
        let (connector, manager) = manager();
        connector.server("db-2", 8123).faults().set_unreachable(true);
        let config = ConnectionConfig::new("db-2", 8123, "admin");

        let err = manager.acquire(&config).await.unwrap_err();
        assert!(matches!(err, Error::Connectivity(_)));
        assert_eq!(manager.live_handles(), 0);

        connector.server("db-2", 8123).faults().set_unreachable(false);
        assert!(manager.acquire(&config).await.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_run_times_out_without_poisoning_handle() {
        let (connector, manager) = manager();
        let config = ConnectionConfig::new("db-3", 8123, "reader");
        let conn = manager.acquire(&config).await.unwrap();

        connector
            .server("db-3", 8123)
            .faults()
            .set_latency(Some(Duration::from_millis(200)));
        let err = conn
            .run_with_timeout("ping", Duration::from_millis(10), conn.engine().ping())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));

        connector.server("db-3", 8123).faults().set_latency(None);
        assert!(conn.run("ping", conn.engine().ping()).await.is_ok());
        let again = manager.acquire(&config).await.unwrap();
        assert!(Arc::ptr_eq(&conn, &again));
    }

    #[tokio::test]
    async fn test_release_all() {
        let (_, manager) = manager();
        for host in ["a", "b", "c"] {
            manager
                .acquire(&ConnectionConfig::new(host, 8123, "admin"))
                .await
                .unwrap();
        }
        assert_eq!(manager.live_handles(), 3);
        manager.release_all().await;
        assert_eq!(manager.live_handles(), 0);
    }
}
