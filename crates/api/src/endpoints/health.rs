//! Liveness of the backing stores.

use std::collections::BTreeMap;

use axum::{Router, extract::State, http::StatusCode, response::Response, routing::get};
use futures::future::join_all;
use serde::Serialize;

use crate::{response::json_response, state::AppState};

/// Path of the health check.
pub const PATH: &str = "/health-45016490610398192";

/// Health check route.
pub fn router() -> Router<AppState> {
    Router::new().route(PATH, get(health))
}

#[derive(Debug, Serialize)]
struct HealthPayload {
    healthy: bool,
    services: BTreeMap<&'static str, bool>,
}

async fn health(State(state): State<AppState>) -> Response {
    let checks = join_all(state.probes.iter().map(|p| async move {
        (p.name(), p.healthy().await)
    }))
    .await;

    let services: BTreeMap<_, _> = checks.into_iter().collect();
    let healthy = services.values().all(|ok| *ok);
    if !healthy {
        tracing::warn!(?services, "health check failed");
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    json_response(status, &HealthPayload { healthy, services })
}
