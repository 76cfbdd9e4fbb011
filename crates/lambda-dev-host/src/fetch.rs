//! The `fetch` binding: outbound HTTP for guest code.
//!
//! Each artifact gets its own [`FetchHost`] sharing one connection-pooled
//! client, so the request budget resets on every rebuild.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use lambda_dev_common::{HostFunctionError, LambdaError};

use crate::policy::FetchPolicy;

/// Largest response body handed back to the guest.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Request description passed by the guest as JSON.
///
/// ```json
/// {"url": "https://api.example.com/items", "method": "POST", "body": "{}"}
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct FetchRequest {
    /// Target URL.
    pub url: String,
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request body.
    #[serde(default)]
    pub body: Option<String>,
    /// Per-request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_method() -> String {
    "GET".to_string()
}

/// Response handed back to the guest as JSON.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FetchResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: BTreeMap<String, String>,
    /// Response body, lossily decoded as UTF-8.
    pub body: String,
}

/// Why a fetch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchError {
    /// The policy refused the target.
    PermissionDenied,
    /// The per-artifact request budget is exhausted.
    RateLimited,
    /// The request description is malformed.
    InvalidRequest,
    /// The request timed out.
    Timeout,
    /// Connecting to the target failed.
    ConnectionFailed,
    /// The response body exceeded the size limit.
    BodyTooLarge,
    /// Anything else.
    Other,
}

impl FetchError {
    /// Convert into a host function error for `url`.
    pub fn into_host_error(self, url: &str) -> HostFunctionError {
        match self {
            FetchError::PermissionDenied => HostFunctionError::PermissionDenied {
                resource: format!("HTTP access to {url}"),
            },
            FetchError::RateLimited => HostFunctionError::RateLimitExceeded {
                operation: "fetch".into(),
            },
            FetchError::InvalidRequest => HostFunctionError::InvalidArgument {
                reason: format!("malformed fetch request for {url}"),
            },
            _ => HostFunctionError::HttpRequestFailed {
                url: url.to_string(),
                status: 0,
            },
        }
    }
}

/// Build the shared HTTP client.
///
/// # Errors
///
/// Returns [`LambdaError::Config`] if the TLS backend cannot be initialized.
pub fn build_client() -> Result<Client, LambdaError> {
    Client::builder()
        .timeout(Duration::from_secs(30))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .user_agent(concat!("lambda-dev/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LambdaError::config(format!("Failed to create HTTP client: {e}")))
}

/// Outbound HTTP for one artifact.
pub struct FetchHost {
    client: Client,
    policy: FetchPolicy,
    request_count: AtomicU32,
}

impl FetchHost {
    /// Create a host with a fresh request budget.
    pub fn new(client: Client, policy: FetchPolicy) -> Self {
        Self {
            client,
            policy,
            request_count: AtomicU32::new(0),
        }
    }

    /// Perform a request after checking the budget and the policy.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let count = self.request_count.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.policy.max_requests {
            if count >= max {
                warn!(url = %request.url, count, max, "Fetch budget exhausted");
                return Err(FetchError::RateLimited);
            }
        }

        if !self.policy.permits(&request.url) {
            warn!(url = %request.url, "Fetch blocked by policy");
            return Err(FetchError::PermissionDenied);
        }

        let method = reqwest::Method::from_bytes(request.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| FetchError::InvalidRequest)?;

        debug!(method = %method, url = %request.url, "Executing fetch");

        let mut builder = self.client.request(method, &request.url);
        if let Some(timeout_ms) = request.timeout_ms {
            builder = builder.timeout(Duration::from_millis(timeout_ms));
        }
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else if e.is_connect() {
                FetchError::ConnectionFailed
            } else {
                FetchError::Other
            }
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|v| (k.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await.map_err(|_| FetchError::Other)?;
        if body.len() > MAX_BODY_BYTES {
            return Err(FetchError::BodyTooLarge);
        }

        info!(
            url = %request.url,
            status,
            body_size = body.len(),
            "Fetch completed"
        );

        Ok(FetchResponse {
            status,
            headers,
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }

    /// Requests attempted so far.
    pub fn request_count(&self) -> u32 {
        self.request_count.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FetchHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHost")
            .field("policy", &self.policy)
            .field("request_count", &self.request_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(url: &str) -> FetchRequest {
        serde_json::from_value(serde_json::json!({ "url": url })).unwrap()
    }

    #[test]
    fn test_request_defaults() {
        let req = request("https://example.com/");
        assert_eq!(req.method, "GET");
        assert!(req.headers.is_empty());
        assert!(req.body.is_none());
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let policy = FetchPolicy::builder().allow_hosts(["*"]).max_requests(0).build();
        let host = FetchHost::new(build_client().unwrap(), policy);

        let result = host.fetch(request("https://example.com/")).await;
        assert_eq!(result, Err(FetchError::RateLimited));
        assert_eq!(host.request_count(), 1);
    }

    #[tokio::test]
    async fn test_policy_denied() {
        let policy = FetchPolicy::builder().allow_hosts(["allowed.com"]).build();
        let host = FetchHost::new(build_client().unwrap(), policy);

        let result = host.fetch(request("https://blocked.com/path")).await;
        assert_eq!(result, Err(FetchError::PermissionDenied));
    }

    #[tokio::test]
    async fn test_invalid_method() {
        let host = FetchHost::new(build_client().unwrap(), FetchPolicy::default());
        let mut req = request("https://example.com/");
        req.method = "NOT A METHOD".into();

        assert_eq!(host.fetch(req).await, Err(FetchError::InvalidRequest));
    }

    #[test]
    fn test_host_error_conversion() {
        let err = FetchError::PermissionDenied.into_host_error("https://x.test/");
        assert!(matches!(err, HostFunctionError::PermissionDenied { .. }));

        let err = FetchError::Timeout.into_host_error("https://x.test/");
        assert!(
            matches!(err, HostFunctionError::HttpRequestFailed { ref url, status: 0 } if url == "https://x.test/")
        );
    }
}
