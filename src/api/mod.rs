//! HTTP API
//!
//! JSON over HTTP for the cluster lifecycle, ingestion, telemetry queries,
//! and health snapshots. All routes live under `/api/v1/clusters/:id`.

mod clusters;
mod data;
mod telemetry;

pub use clusters::{ClusterSummary, HealthReport, ScaleRequest};

use crate::control_plane::ControlPlaneStore;
use crate::downsample::DownsamplingMaintainer;
use crate::ingestion::IngestionPipeline;
use crate::lifecycle::LifecycleManager;
use crate::query::QueryPlanner;
use crate::Error;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use std::sync::Arc;
use tracing::error;

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    pub http_port: u16,
    /// Maximum request body size
    pub max_body_size: usize,
    pub enable_cors: bool,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            max_body_size: 64 * 1024 * 1024, // 64MB
            enable_cors: true,
        }
    }
}

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ControlPlaneStore>,
    pub lifecycle: LifecycleManager,
    pub ingestion: Arc<IngestionPipeline>,
    pub queries: Arc<QueryPlanner>,
    pub downsampling: Arc<DownsamplingMaintainer>,
}

/// Build the HTTP API router
pub fn build_http_router(state: ApiState, config: &ApiServerConfig) -> Router {
    use axum::middleware;
    use axum::routing::{get, post};
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let router = Router::new()
        .route("/health", get(health_check))

        // Lifecycle
        .route("/api/v1/clusters", post(clusters::create).get(clusters::list))
        .route(
            "/api/v1/clusters/:id",
            get(clusters::get).delete(clusters::terminate),
        )
        .route("/api/v1/clusters/:id/status", get(clusters::provisioning_status))
        .route("/api/v1/clusters/:id/scale", post(clusters::scale))
        .route("/api/v1/clusters/:id/health", get(clusters::health))

        // Telemetry data
        .route("/api/v1/clusters/:id/readings", post(data::ingest_readings))
        .route("/api/v1/clusters/:id/quality", post(data::ingest_quality))
        .route("/api/v1/clusters/:id/events", post(data::ingest_events))
        .route(
            "/api/v1/clusters/:id/events/:event_id/resolve",
            post(data::resolve_event),
        )
        .route("/api/v1/clusters/:id/query", post(data::query))
        .route("/api/v1/clusters/:id/rollups/consistency", get(data::rollup_consistency))

        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_body_size))
        .layer(middleware::from_fn(telemetry::http_observability_middleware))
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
    } else {
        router
    }
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Error response wrapper mapping crate errors onto HTTP status codes
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match &self.0 {
            Error::InvalidInput(_) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": message }),
            ),
            Error::ClusterNotFound(_) => (
                StatusCode::NOT_FOUND,
                serde_json::json!({ "error": message }),
            ),
            Error::ClusterNotActive { status, .. } => (
                StatusCode::CONFLICT,
                serde_json::json!({ "error": message, "status": status }),
            ),
            Error::PartialBatch {
                chunk_index,
                records_in_chunk,
                committed_chunks,
                ..
            } => (
                StatusCode::BAD_GATEWAY,
                serde_json::json!({
                    "error": message,
                    "failed_chunk_index": chunk_index,
                    "records_in_chunk": records_in_chunk,
                    "committed_chunks": committed_chunks,
                }),
            ),
            Error::Connectivity(_) | Error::Timeout(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": message }),
            ),
            _ => {
                error!(error = %message, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({ "error": message }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub(crate) type ApiResult<T> = std::result::Result<T, ApiError>;
