//! Gateway HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and testable.
use crate::api;
use axum::Router;
use postbox_queue::QueueHub;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<QueueHub>,
    // Injected into every long-poll read; owned by the boundary, not the hub.
    pub connection_timeout: Duration,
}

pub fn build_router(prefix: &str, state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    let queues = Router::new()
        .route(
            "/:domain/put/:queue_name",
            axum::routing::put(api::queues::put_message),
        )
        .route(
            "/:domain/get/:queue_name/:signature",
            axum::routing::get(api::queues::get_message),
        )
        .route(
            "/:domain/delete/:queue_name/:message_id/:signature",
            axum::routing::delete(api::queues::delete_message),
        )
        .route(
            "/:domain/take/:queue_name/:signature",
            axum::routing::get(api::queues::take_message),
        );

    Router::new()
        .nest(prefix, queues)
        .layer(trace_layer)
        .with_state(state)
}
