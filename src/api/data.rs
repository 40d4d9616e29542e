//! Ingestion and query endpoints

use super::{ApiResult, ApiState};
use crate::downsample::ConsistencyReport;
use crate::ingestion::IngestReport;
use crate::model::{EventResolution, ProductionEvent, QualityMeasurement, SensorReading, TimeRange};
use crate::query::{QueryResult, TelemetryQuery};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub start: i64,
    pub end: i64,
}

/// POST /api/v1/clusters/:id/readings
pub async fn ingest_readings(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(readings): Json<Vec<SensorReading>>,
) -> ApiResult<Json<IngestReport>> {
    Ok(Json(state.ingestion.ingest_readings(&id, readings).await?))
}

/// POST /api/v1/clusters/:id/quality
pub async fn ingest_quality(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(measurements): Json<Vec<QualityMeasurement>>,
) -> ApiResult<Json<IngestReport>> {
    Ok(Json(state.ingestion.ingest_quality(&id, measurements).await?))
}

/// POST /api/v1/clusters/:id/events
pub async fn ingest_events(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(events): Json<Vec<ProductionEvent>>,
) -> ApiResult<Json<IngestReport>> {
    Ok(Json(state.ingestion.ingest_events(&id, events).await?))
}

/// POST /api/v1/clusters/:id/events/:event_id/resolve
pub async fn resolve_event(
    State(state): State<ApiState>,
    Path((id, event_id)): Path<(String, String)>,
    Json(resolution): Json<EventResolution>,
) -> ApiResult<StatusCode> {
    state
        .ingestion
        .resolve_event(&id, &event_id, resolution)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/clusters/:id/query
pub async fn query(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Json(request): Json<TelemetryQuery>,
) -> ApiResult<Json<QueryResult>> {
    Ok(Json(state.queries.execute(&id, &request).await?))
}

/// GET /api/v1/clusters/:id/rollups/consistency?start=..&end=..
pub async fn rollup_consistency(
    State(state): State<ApiState>,
    Path(id): Path<String>,
    Query(params): Query<RangeParams>,
) -> ApiResult<Json<ConsistencyReport>> {
    let range = TimeRange::try_new(params.start, params.end)?;
    Ok(Json(state.downsampling.check_consistency(&id, range).await?))
}
