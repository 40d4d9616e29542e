//! Millwright service binary
//!
//! Runs the HTTP API, the health monitor loop, and provisioning resumption
//! in one process under a shared shutdown token.

use millwright::api::{self, ApiServerConfig, ApiState};
use millwright::clock::BoundedClock;
use millwright::config::{ComponentFactory, ControlPlaneBackend, EngineBackend};
use millwright::connection::{ConnectionManager, ConnectionManagerConfig};
use millwright::downsample::DownsamplingMaintainer;
use millwright::health::{HealthConfig, HealthMonitor};
use millwright::ingestion::{IngestionConfig, IngestionPipeline};
use millwright::lifecycle::{LifecycleConfig, LifecycleManager};
use millwright::query::{QueryConfig, QueryPlanner};
use millwright::telemetry::Telemetry;
use millwright::{Config, Error};

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Millwright telemetry cluster service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// HTTP API port
    #[arg(long, env = "MILLWRIGHT_HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// Analytics engine backend (memory, clickhouse)
    #[arg(long, env = "MILLWRIGHT_ENGINE", default_value = "memory")]
    engine: String,

    /// Control-plane backend (memory, file)
    #[arg(long, env = "MILLWRIGHT_CONTROL_PLANE", default_value = "memory")]
    control_plane: String,

    /// Control-plane snapshot path when the backend is "file"
    #[arg(long, env = "MILLWRIGHT_STATE_PATH", default_value = "millwright-state.json")]
    state_path: PathBuf,

    /// Seconds between health sweeps
    #[arg(long, env = "MILLWRIGHT_HEALTH_INTERVAL_SECS", default_value = "30")]
    health_interval_secs: u64,

    /// Attempts per provisioning stage before a cluster is parked in error
    #[arg(long, default_value = "3")]
    stage_attempts: u32,

    /// Database created on new clusters when a request names none
    #[arg(long, env = "MILLWRIGHT_DATABASE", default_value = "telemetry")]
    database: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let _telemetry = Telemetry::init_for_component("millwright", &args.log_level)?;

    info!("Starting Millwright");

    let config = Config {
        api: ApiServerConfig {
            http_port: args.http_port,
            ..Default::default()
        },
        connections: ConnectionManagerConfig::default(),
        lifecycle: LifecycleConfig {
            max_attempts: args.stage_attempts.max(1),
            default_database: args.database.clone(),
            ..Default::default()
        },
        ingestion: IngestionConfig::default(),
        query: QueryConfig::default(),
        health: HealthConfig {
            interval: Duration::from_secs(args.health_interval_secs.max(1)),
            ..Default::default()
        },
    };

    let engine: EngineBackend = args.engine.parse()?;
    let control_plane = ControlPlaneBackend::parse(
        &args.control_plane,
        Some(args.state_path.to_string_lossy().into_owned()),
    )?;

    let store = ComponentFactory::create_control_plane_for(&control_plane).await?;
    let connections = Arc::new(ConnectionManager::new(
        ComponentFactory::create_connector_for(engine),
        config.connections.clone(),
    ));
    let backend = ComponentFactory::create_provisioning_backend()?;
    let clock = Arc::new(BoundedClock::new());

    let lifecycle = LifecycleManager::new(
        store.clone(),
        backend,
        connections.clone(),
        clock.clone(),
        config.lifecycle.clone(),
    );
    let monitor = Arc::new(HealthMonitor::new(
        store.clone(),
        connections.clone(),
        clock,
        config.health.clone(),
    ));
    let state = ApiState {
        store: store.clone(),
        lifecycle: lifecycle.clone(),
        ingestion: Arc::new(IngestionPipeline::new(
            store.clone(),
            connections.clone(),
            config.ingestion.clone(),
        )),
        queries: Arc::new(QueryPlanner::new(
            store.clone(),
            connections.clone(),
            config.query.clone(),
        )),
        downsampling: Arc::new(DownsamplingMaintainer::new(connections.clone(), store)),
    };

    match lifecycle.resume_incomplete().await {
        Ok(resumed) if !resumed.is_empty() => {
            info!(clusters = ?resumed, "Resumed interrupted provisioning")
        }
        Ok(_) => {}
        Err(e) => warn!("Failed to resume interrupted provisioning: {}", e),
    }

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.cancel();
        }
    });

    let monitor_task = tokio::spawn({
        let monitor = monitor.clone();
        let shutdown = shutdown.clone();
        async move { monitor.run(shutdown).await }
    });

    let router = api::build_http_router(state, &config.api);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api.http_port));
    let listener = TcpListener::bind(addr).await?;

    info!(
        http_port = config.api.http_port,
        engine = ?engine,
        control_plane = ?control_plane,
        health_interval_secs = config.health.interval.as_secs(),
        "Millwright ready"
    );

    let http_shutdown = shutdown.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move { http_shutdown.cancelled().await })
        .await
        .map_err(|e| Error::Internal(format!("HTTP server error: {e}")));

    // The server can also stop on its own error; make sure the rest follows
    shutdown.cancel();
    if let Err(e) = monitor_task.await {
        error!("Health monitor task failed: {}", e);
    }
    lifecycle.shutdown();
    connections.release_all().await;

    info!("Millwright shut down");
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
