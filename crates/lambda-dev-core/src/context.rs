//! Request context handed to handlers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Snapshot of the incoming request.
///
/// Serialized as JSON and exposed to handlers through `edge.context_read`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ContextSnapshot {
    /// Unique request identifier.
    pub request_id: String,

    /// HTTP method.
    pub method: String,

    /// Full request URL (path and query).
    pub url: String,

    /// Request path.
    pub path: String,

    /// Parsed query parameters.
    #[serde(default)]
    pub query: BTreeMap<String, String>,

    /// Request headers with lowercase names.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Request body as UTF-8 text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Client address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl ContextSnapshot {
    /// A snapshot for `method` on `url`.
    ///
    /// The path is everything before the first `?`.
    pub fn new(request_id: impl Into<String>, method: impl Into<String>, url: &str) -> Self {
        let path = url.split_once('?').map_or(url, |(path, _)| path);
        Self {
            request_id: request_id.into(),
            method: method.into(),
            url: url.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Add a header; the name is lowercased.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize for the guest.
    pub fn to_json_bytes(&self) -> Vec<u8> {
        // Plain strings and string maps always serialize.
        serde_json::to_vec(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_strips_query() {
        let context = ContextSnapshot::new("req-1", "GET", "/items?id=7");
        assert_eq!(context.path, "/items");
        assert_eq!(context.url, "/items?id=7");
    }

    #[test]
    fn test_json_shape() {
        let context = ContextSnapshot::new("req-1", "POST", "/")
            .with_header("X-Trace", "abc")
            .with_query("q", "1")
            .with_body("payload");

        let value: serde_json::Value =
            serde_json::from_slice(&context.to_json_bytes()).unwrap();

        assert_eq!(value["request_id"], "req-1");
        assert_eq!(value["method"], "POST");
        assert_eq!(value["headers"]["x-trace"], "abc");
        assert_eq!(value["query"]["q"], "1");
        assert_eq!(value["body"], "payload");
        assert!(value.get("ip").is_none());
    }
}
