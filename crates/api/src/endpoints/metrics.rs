//! Metrics export on the telemetry listener.

use axum::{
    Json, Router,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use fanout_common::{MetricsSnapshot, get_metrics};

/// Create the telemetry router.
pub fn router() -> Router {
    Router::new()
        .route("/metrics", get(prometheus))
        .route("/metrics/snapshot", get(snapshot))
}

/// Metrics in Prometheus text format.
async fn prometheus() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        get_metrics().to_prometheus(),
    )
        .into_response()
}

async fn snapshot() -> Json<MetricsSnapshot> {
    Json(get_metrics().snapshot())
}
