//! HTTP request conversion for the bridge.
//!
//! This module turns an incoming axum request into the [`ContextSnapshot`]
//! handed to the bundle's `request` handlers.

use std::net::SocketAddr;

use axum::http::request::Parts;
use bytes::Bytes;

use lambda_dev_core::ContextSnapshot;

/// Build the context snapshot for one request.
///
/// Header names are lowercased, header values that are not visible ASCII are
/// skipped, and a non-empty body is decoded lossily as UTF-8.
pub fn context_snapshot(
    request_id: &str,
    parts: &Parts,
    body: &Bytes,
    remote: Option<SocketAddr>,
) -> ContextSnapshot {
    let url = parts
        .uri
        .path_and_query()
        .map_or_else(|| parts.uri.path().to_string(), ToString::to_string);

    let mut snapshot = ContextSnapshot::new(request_id, parts.method.as_str(), &url);

    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            snapshot = snapshot.with_header(name.as_str(), value);
        }
    }

    if let Some(query) = parts.uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            snapshot = snapshot.with_query(name, value);
        }
    }

    if !body.is_empty() {
        snapshot = snapshot.with_body(String::from_utf8_lossy(body));
    }

    snapshot.ip = remote.map(|addr| addr.ip().to_string());
    snapshot
}
