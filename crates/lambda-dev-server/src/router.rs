//! HTTP router configuration.
//!
//! This module provides functions to build the Axum router with all
//! necessary routes and middleware.

use std::time::Duration;

use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handler::{handle_function, health_check, status};
use crate::state::AppState;

/// Prefix of the routes served by the dev server itself.
pub const INTERNAL_PREFIX: &str = "/__lambda";

/// Slack between `maxWaitTime` and the outer request timeout.
///
/// The bridge must report its own timeout (504) before the HTTP layer
/// gives up on the request (408).
pub const DEADLINE_MARGIN: Duration = Duration::from_secs(1);

/// Outer timeout for a server configured with `request_timeout`.
///
/// Never shorter than the function deadline plus [`DEADLINE_MARGIN`].
pub fn layer_timeout(state: &AppState, request_timeout: Duration) -> Duration {
    request_timeout.max(state.lambda().max_wait() + DEADLINE_MARGIN)
}

/// Build the main application router.
///
/// Routes:
/// - `GET /__lambda/health` - Health check
/// - `GET /__lambda/status` - Cache and artifact status
/// - everything else - Forwarded to the bundle
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let timeout = layer_timeout(&state, request_timeout);
    let internal_routes = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status));

    Router::new()
        .nest(INTERNAL_PREFIX, internal_routes)
        .fallback(handle_function)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
