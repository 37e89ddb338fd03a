//! Axum router construction.

use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer};

use super::{handlers, middleware, state::AppState};

/// Build the application [`Router`] with all routes and middleware attached.
pub fn build(state: AppState, request_timeout: Duration) -> Router {
    Router::new()
        .route(
            "/v1/transit/keys",
            post(handlers::create_key).get(handlers::list_keys),
        )
        .route(
            "/v1/transit/keys/:name",
            get(handlers::read_key).delete(handlers::delete_key),
        )
        .route("/v1/transit/keys/:name/config", post(handlers::configure_key))
        .route("/v1/transit/keys/:name/rotate", post(handlers::rotate_key))
        .route("/v1/transit/encrypt", post(handlers::encrypt))
        .route("/v1/transit/decrypt", post(handlers::decrypt))
        .route("/v1/transit/rewrap", post(handlers::rewrap))
        .route("/v1/transit/encrypt/batch", post(handlers::encrypt_batch))
        .route("/v1/transit/decrypt/batch", post(handlers::decrypt_batch))
        .route("/v1/transit/rewrap/batch", post(handlers::rewrap_batch))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .layer(middleware::trace_layer())
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CompressionLayer::new())
        .with_state(state)
}
