//! Request handlers.
//!
//! Every path not claimed by the `/__lambda` routes is forwarded to the
//! bundle through the [`RequestBridge`](lambda_dev_core::RequestBridge).

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{error, info, instrument};
use uuid::Uuid;

use lambda_dev_common::LambdaError;
use lambda_dev_core::{OuterResponse, RequestEnvelope};

use crate::request::context_snapshot;
use crate::response::{error_response, into_axum_response};
use crate::state::AppState;

/// Largest request body forwarded to the bundle.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Forward a request to the bundle.
///
/// This handler:
/// 1. Snapshots the request (method, URL, headers, query, body, client ip)
/// 2. Hands it to the bridge with the session's deadline
/// 3. Converts the filled outer response, or the error, to HTTP
#[instrument(skip_all, fields(method = %request.method(), uri = %request.uri()))]
pub async fn handle_function(
    State(state): State<AppState>,
    remote: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let request_id = Uuid::new_v4().to_string();

    let (parts, body) = request.into_parts();
    let body = match axum::body::to_bytes(body, MAX_BODY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Failed to read request body");
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let remote = remote.map(|ConnectInfo(addr)| addr);
    let context = context_snapshot(&request_id, &parts, &body, remote);
    let envelope = RequestEnvelope::new(context, state.lambda());

    let mut outer = OuterResponse::new();
    match state.bridge().handle(envelope, &mut outer).await {
        Ok(_) => {
            info!(
                request_id = %request_id,
                status = ?outer.status(),
                duration_ms = start.elapsed().as_millis(),
                "Request served"
            );
            into_axum_response(&outer)
        }
        Err(e) => {
            log_failure(&request_id, &e);
            error_response(&e)
        }
    }
}

fn log_failure(request_id: &str, error: &LambdaError) {
    if error.is_construction_error() {
        error!(request_id, error = %error, "Function could not be loaded");
    } else {
        error!(request_id, error = %error, "Function failed");
    }
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Cache and artifact status.
pub async fn status(State(state): State<AppState>) -> Response<Body> {
    let cache = state.cache();
    let artifact = cache.lookup().map(|artifact| {
        serde_json::json!({
            "generation": artifact.generation(),
            "contentHash": artifact.content_hash(),
            "bindings": artifact.binding_names(),
            "events": artifact.events(),
            "pendingInvocations": artifact.pending_invocations(),
            "ageMs": millis(artifact.created_at().elapsed()),
        })
    });

    let body = serde_json::json!({
        "bundle": state.bridge().source().bundle.display().to_string(),
        "generation": cache.generation(),
        "maxWaitMs": millis(state.lambda().max_wait()),
        "uptimeSecs": state.uptime().as_secs(),
        "artifact": artifact,
    });

    axum::Json(body).into_response()
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
