//! API endpoints.

mod comments;
mod connections;
mod devices;
mod feed;
pub mod health;
mod likes;
mod metrics;
mod posts;
mod reactions;
mod users;

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};

use crate::middleware::{
    cors, ctx_app, ctx_device_id, ctx_user, has_user_agent, secure_headers, track_metrics,
    validate_content,
};
use crate::rate_limit::rate_limit;
use crate::state::AppState;

/// Version prefix of every API route.
pub const VERSION: &str = "/0.4";

/// Routes acting for a user: the app chain plus session resolution.
fn user_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(comments::router())
        .merge(connections::router())
        .merge(devices::router())
        .merge(feed::router())
        .merge(likes::router())
        .merge(posts::router())
        .merge(reactions::router())
        .merge(users::router())
        .route_layer(from_fn_with_state(state.clone(), ctx_user))
}

/// Versioned routes behind the app chain.
fn api(state: &AppState) -> Router<AppState> {
    let chain = ServiceBuilder::new()
        .layer(from_fn(secure_headers))
        .layer(from_fn(cors))
        .layer(from_fn(has_user_agent))
        .layer(from_fn(validate_content))
        .layer(from_fn_with_state(state.clone(), ctx_app))
        .layer(from_fn(ctx_device_id))
        .layer(from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .merge(users::app_router())
        .merge(user_routes(state))
        .route_layer(chain)
}

/// The public HTTP application.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest(VERSION, api(&state))
        .merge(health::router())
        .layer(from_fn(track_metrics))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// The telemetry listener application.
pub fn telemetry() -> Router {
    metrics::router()
}
