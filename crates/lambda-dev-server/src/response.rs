//! HTTP response conversion.
//!
//! The bridge fills an [`OuterResponse`]; this module turns it, or a broker
//! error, into an axum response.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};

use lambda_dev_common::LambdaError;
use lambda_dev_core::OuterResponse;

/// Convert the outer response filled by the bridge.
///
/// A response that never got a status is sent as 200.
pub fn into_axum_response(outer: &OuterResponse) -> Response<Body> {
    let status = outer
        .status()
        .and_then(|status| StatusCode::from_u16(status).ok())
        .unwrap_or(StatusCode::OK);

    let mut builder = Response::builder().status(status);
    for (name, value) in outer.headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            builder = builder.header(name, value);
        }
    }

    let body = outer
        .body()
        .map_or_else(Body::empty, |body| Body::from(body.to_bytes()));

    builder.body(body).unwrap_or_else(|_| internal_error())
}

/// Status code for a broker error.
pub fn error_status(error: &LambdaError) -> StatusCode {
    if error.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    }
}

/// Create an error response with JSON body.
pub fn error_response(error: &LambdaError) -> Response<Body> {
    let body = serde_json::json!({ "error": error.to_string() }).to_string();
    Response::builder()
        .status(error_status(error))
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap_or_else(|_| internal_error())
}

fn internal_error() -> Response<Body> {
    let mut response = Response::new(Body::from("Internal server error"));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use lambda_dev_core::ResponseDescriptor;
    use serde_json::json;

    async fn body_text(response: Response<Body>) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_json_descriptor() {
        let mut outer = OuterResponse::new();
        ResponseDescriptor::json(Some(201), json!({"id": 1})).apply_to(&mut outer);

        let response = into_axum_response(&outer);

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert_eq!(body_text(response).await, r#"{"id":1}"#);
    }

    #[tokio::test]
    async fn test_unset_status_defaults_to_ok() {
        let response = into_axum_response(&OuterResponse::new());

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("content-type").is_none());
        assert_eq!(body_text(response).await, "");
    }

    #[test]
    fn test_redirect() {
        let mut outer = OuterResponse::new();
        ResponseDescriptor::redirect(None, "/login").apply_to(&mut outer);

        let response = into_axum_response(&outer);

        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.headers()["location"], "/login");
    }

    #[test]
    fn test_error_status() {
        let timeout = LambdaError::Timeout { duration_ms: 5000 };
        assert_eq!(error_status(&timeout), StatusCode::GATEWAY_TIMEOUT);

        let denied = LambdaError::import_denied("kv", "get");
        assert_eq!(error_status(&denied), StatusCode::INTERNAL_SERVER_ERROR);

        let missing = LambdaError::bundle_not_found("/tmp/missing.wat");
        assert_eq!(error_status(&missing), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_error_response_body() {
        let response = error_response(&LambdaError::sandbox("boom"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("boom"));
    }
}
