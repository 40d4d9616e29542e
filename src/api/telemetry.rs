//! Per-operation request metrics for the HTTP API.
//!
//! Requests are labelled with the operation they perform and, for routes
//! under a cluster, the cluster id, so a misbehaving tenant shows up on its own.

use axum::extract::MatchedPath;
use axum::http::{Method, Request};
use axum::middleware::Next;
use axum::response::Response;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::KeyValue;
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{info_span, Instrument};

const CLUSTER_ROUTE_PREFIX: &str = "/api/v1/clusters/";

struct ApiInstruments {
    requests: Counter<u64>,
    duration_seconds: Histogram<f64>,
    rejected: Counter<u64>,
}

fn instruments() -> &'static ApiInstruments {
    static INSTRUMENTS: OnceLock<ApiInstruments> = OnceLock::new();
    INSTRUMENTS.get_or_init(|| {
        let meter = global::meter("millwright.api");
        ApiInstruments {
            requests: meter
                .u64_counter("millwright.api.requests")
                .with_description("API requests by operation and cluster")
                .init(),
            duration_seconds: meter
                .f64_histogram("millwright.api.request.duration")
                .with_description("API request latency by operation")
                .with_unit("s")
                .init(),
            rejected: meter
                .u64_counter("millwright.api.requests.rejected")
                .with_description("API requests answered with an error, by outcome class")
                .init(),
        }
    })
}

/// Operation name for a matched route template
fn operation(method: &Method, route: &str) -> &'static str {
    let tail = route.strip_prefix(CLUSTER_ROUTE_PREFIX).map(|rest| {
        // Drop the `:id` segment
        rest.split_once('/').map_or("", |(_, tail)| tail)
    });
    match (method.as_str(), route, tail) {
        ("GET", "/health", _) => "liveness",
        ("POST", "/api/v1/clusters", _) => "cluster.create",
        ("GET", "/api/v1/clusters", _) => "cluster.list",
        ("GET", _, Some("")) => "cluster.get",
        ("DELETE", _, Some("")) => "cluster.terminate",
        ("GET", _, Some("status")) => "cluster.status",
        ("POST", _, Some("scale")) => "cluster.scale",
        ("GET", _, Some("health")) => "cluster.health",
        ("POST", _, Some("readings")) => "ingest.readings",
        ("POST", _, Some("quality")) => "ingest.quality",
        ("POST", _, Some("events")) => "ingest.events",
        ("POST", _, Some(t)) if t.starts_with("events/") => "event.resolve",
        ("POST", _, Some("query")) => "query",
        ("GET", _, Some("rollups/consistency")) => "rollups.consistency",
        _ => "other",
    }
}

/// Cluster id from a concrete request path, if the route is cluster-scoped
fn cluster_id(path: &str) -> Option<&str> {
    let rest = path.strip_prefix(CLUSTER_ROUTE_PREFIX)?;
    let id = rest.split('/').next()?;
    (!id.is_empty()).then_some(id)
}

fn outcome(status: u16) -> &'static str {
    match status {
        404 => "not_found",
        409 => "conflict",
        400..=499 => "client_error",
        502 => "partial",
        500..=599 => "server_error",
        _ => "ok",
    }
}

/// Records one request: operation, cluster, latency, and outcome.
pub async fn http_observability_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let start = Instant::now();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let op = operation(req.method(), &route);
    let cluster = cluster_id(req.uri().path()).unwrap_or("").to_string();

    let span = info_span!("api.request", operation = op, cluster_id = %cluster);
    let response = next.run(req).instrument(span).await;

    let status = response.status().as_u16();
    let mut attrs = vec![KeyValue::new("operation", op)];
    if !cluster.is_empty() {
        attrs.push(KeyValue::new("cluster_id", cluster));
    }
    let instruments = instruments();
    instruments.requests.add(1, &attrs);
    instruments
        .duration_seconds
        .record(start.elapsed().as_secs_f64(), &attrs[..1]);
    if status >= 400 {
        attrs.push(KeyValue::new("outcome", outcome(status)));
        instruments.rejected.add(1, &attrs);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(operation(&Method::POST, "/api/v1/clusters"), "cluster.create");
        assert_eq!(operation(&Method::GET, "/api/v1/clusters/:id"), "cluster.get");
        assert_eq!(operation(&Method::DELETE, "/api/v1/clusters/:id"), "cluster.terminate");
        assert_eq!(
            operation(&Method::POST, "/api/v1/clusters/:id/readings"),
            "ingest.readings"
        );
        assert_eq!(
            operation(&Method::POST, "/api/v1/clusters/:id/events/:event_id/resolve"),
            "event.resolve"
        );
        assert_eq!(operation(&Method::GET, "/metrics"), "other");
    }

    #[test]
    fn test_cluster_id_from_path() {
        assert_eq!(cluster_id("/api/v1/clusters/press-9/query"), Some("press-9"));
        assert_eq!(cluster_id("/api/v1/clusters/press-9"), Some("press-9"));
        assert_eq!(cluster_id("/api/v1/clusters"), None);
        assert_eq!(cluster_id("/health"), None);
    }

    #[test]
    fn test_outcome_classes() {
        assert_eq!(outcome(200), "ok");
        assert_eq!(outcome(404), "not_found");
        assert_eq!(outcome(409), "conflict");
        assert_eq!(outcome(400), "client_error");
        assert_eq!(outcome(502), "partial");
        assert_eq!(outcome(503), "server_error");
    }
}
