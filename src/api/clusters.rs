//! Cluster lifecycle endpoints

use super::{ApiResult, ApiState};
use crate::control_plane::{
    Cluster, ClusterStatus, ClusterType, CostEstimate, Endpoint, HealthChecks, HealthSnapshot,
    HealthStatus, NodeSizing, ProvisioningStatus, TierSizing,
};
use crate::lifecycle::ClusterRequest;
use crate::Error;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Cluster as returned over HTTP. Credentials are never included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
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
    pub endpoint: Option<Endpoint>,
    pub database: String,
    pub cost: CostEstimate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Cluster> for ClusterSummary {
    fn from(c: Cluster) -> Self {
        Self {
            health_status: c.effective_health(),
            id: c.id,
            display_key: c.display_key,
            cluster_type: c.cluster_type,
            region: c.region,
            node_count: c.node_count,
            sizing: c.sizing,
            tiers: c.tiers,
            status: c.status,
            last_health_check: c.last_health_check,
            error_details: c.error_details,
            endpoint: c.endpoint,
            database: c.database,
            cost: c.cost,
            created_at: c.created_at,
            updated_at: c.updated_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<ClusterStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScaleRequest {
    pub node_count: u32,
}

/// POST /api/v1/clusters
pub async fn create(
    State(state): State<ApiState>,
    Json(request): Json<ClusterRequest>,
) -> ApiResult<(StatusCode, Json<ClusterSummary>)> {
    let cluster = state.lifecycle.create_cluster(request).await?;
    Ok((StatusCode::ACCEPTED, Json(cluster.into())))
}

/// GET /api/v1/clusters
pub async fn list(
    State(state): State<ApiState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<ClusterSummary>>> {
    let clusters = state.lifecycle.list_clusters(params.status).await?;
    Ok(Json(clusters.into_iter().map(ClusterSummary::from).collect()))
}

/// GET /api/v1/clusters/:id
pub async fn get(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ClusterSummary>> {
    Ok(Json(state.lifecycle.get_cluster(&id).await?.into()))
}

/// GET /api/v1/clusters/:id/status
pub async fn provisioning_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ProvisioningStatus>> {
    Ok(Json(state.lifecycle.provisioning_status(&id).await?))
}

/// POST /api/v1/clusters/:id/scale
pub async fn scale(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<ScaleRequest>,
) -> ApiResult<Json<ClusterSummary>> {
    Ok(Json(state.lifecycle.scale(&id, request.node_count).await?.into()))
}

/// DELETE /api/v1/clusters/:id
pub async fn terminate(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ClusterSummary>> {
    Ok(Json(state.lifecycle.terminate(&id).await?.into()))
}

/// Latest health of a cluster. `checks` is absent until the monitor has probed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub cluster_id: String,
    pub status: HealthStatus,
    pub timestamp: Option<DateTime<Utc>>,
    pub checks: Option<HealthChecks>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<HealthSnapshot> for HealthReport {
    fn from(s: HealthSnapshot) -> Self {
        Self {
            cluster_id: s.cluster_id,
            status: s.status,
            timestamp: Some(s.timestamp),
            checks: Some(s.checks),
            error: s.error,
        }
    }
}

/// GET /api/v1/clusters/:id/health
pub async fn health(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> ApiResult<Json<HealthReport>> {
    let cluster = state
        .store
        .get_cluster(&id)
        .await?
        .ok_or_else(|| Error::ClusterNotFound(id.clone()))?;
    let report = match state.store.latest_health(&id).await? {
        Some(snapshot) => snapshot.into(),
        None => HealthReport {
            status: cluster.effective_health(),
            timestamp: cluster.last_health_check,
            checks: None,
            error: None,
            cluster_id: cluster.id,
        },
    };
    Ok(Json(report))
}
