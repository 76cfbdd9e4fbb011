//! Response descriptors produced by handlers and the outer response they are
//! mapped onto.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// `content-type` used for object and array bodies.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// `content-type` used for every other body.
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// A response body.
///
/// Strings stay text. Objects and arrays are JSON. Numbers and booleans are
/// rendered as text.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// A plain text body.
    Text(String),
    /// A JSON object or array.
    Json(Value),
}

impl ResponseBody {
    /// Returns `true` if the body counts as provided.
    ///
    /// An empty string is treated like no body at all.
    pub fn is_provided(&self) -> bool {
        match self {
            ResponseBody::Text(text) => !text.is_empty(),
            ResponseBody::Json(_) => true,
        }
    }

    /// The `content-type` inferred for this body.
    pub fn inferred_content_type(&self) -> &'static str {
        match self {
            ResponseBody::Text(_) => CONTENT_TYPE_TEXT,
            ResponseBody::Json(_) => CONTENT_TYPE_JSON,
        }
    }

    /// Encode the body for the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            ResponseBody::Text(text) => text.clone().into_bytes(),
            ResponseBody::Json(value) => value.to_string().into_bytes(),
        }
    }

    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(text) => Some(Self::Text(text)),
            Value::Object(_) | Value::Array(_) => Some(Self::Json(value)),
            other => Some(Self::Text(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for ResponseBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(value).unwrap_or(Self::Text(String::new())))
    }
}

impl Serialize for ResponseBody {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ResponseBody::Text(text) => serializer.serialize_str(text),
            ResponseBody::Json(value) => value.serialize(serializer),
        }
    }
}

/// What a handler asks the broker to send back.
///
/// ```json
/// {"status": 201, "headers": {"x-id": "7"}, "body": {"ok": true}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct ResponseDescriptor {
    /// HTTP status code.
    #[serde(default)]
    pub status: Option<u16>,

    /// Headers copied verbatim onto the outer response.
    #[serde(default)]
    pub headers: Option<Map<String, Value>>,

    /// Response body.
    #[serde(default)]
    pub body: Option<ResponseBody>,

    /// Redirect target.
    #[serde(default)]
    pub redirect: Option<String>,
}

impl ResponseDescriptor {
    /// A descriptor with a text body.
    pub fn text(status: Option<u16>, body: impl Into<String>) -> Self {
        Self {
            status,
            body: Some(ResponseBody::Text(body.into())),
            ..Default::default()
        }
    }

    /// A descriptor with a JSON body.
    pub fn json(status: Option<u16>, body: Value) -> Self {
        Self {
            status,
            body: ResponseBody::from_value(body),
            ..Default::default()
        }
    }

    /// A redirect descriptor.
    pub fn redirect(status: Option<u16>, location: impl Into<String>) -> Self {
        Self {
            status,
            redirect: Some(location.into()),
            ..Default::default()
        }
    }

    /// Map this descriptor onto `outer`.
    ///
    /// - status: descriptor status, else the outer status, else 200
    /// - headers: copied verbatim
    /// - body: replaces the outer body only when provided
    /// - content-type: inferred only when absent and a body was provided
    /// - redirect: sets `Location`, and 302 unless the status is already 3xx
    pub fn apply_to(self, outer: &mut OuterResponse) {
        let status = self.status.or(outer.status).unwrap_or(200);
        outer.set_status(status);

        for (name, value) in self.headers.into_iter().flatten() {
            let value = match value {
                Value::String(text) => text,
                other => other.to_string(),
            };
            outer.set_header(&name, value);
        }

        if let Some(body) = self.body.filter(ResponseBody::is_provided) {
            if outer.header("content-type").is_none() {
                outer.set_header("content-type", body.inferred_content_type());
            }
            outer.set_body(body);
        }

        if let Some(location) = self.redirect {
            outer.redirect(location);
        }
    }
}

/// The mutable response owned by the enclosing HTTP framework.
///
/// The broker only ever mutates it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OuterResponse {
    status: Option<u16>,
    headers: Vec<(String, String)>,
    body: Option<ResponseBody>,
}

impl OuterResponse {
    /// An empty response.
    pub fn new() -> Self {
        Self::default()
    }

    /// Status, if one was set.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// Set the status.
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    /// Header value, matched case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Set a header, replacing any header with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(name));
        self.headers.push((name.to_string(), value.into()));
    }

    /// All headers in insertion order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// The body, if one was set.
    pub fn body(&self) -> Option<&ResponseBody> {
        self.body.as_ref()
    }

    /// Replace the body.
    pub fn set_body(&mut self, body: ResponseBody) {
        self.body = Some(body);
    }

    /// Point the response at `location`.
    pub fn redirect(&mut self, location: impl Into<String>) {
        self.set_header("location", location);
        if !self.status.is_some_and(|status| (300..400).contains(&status)) {
            self.status = Some(302);
        }
    }
}

impl fmt::Display for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Text(text) => f.write_str(text),
            ResponseBody::Json(value) => write!(f, "{value}"),
        }
    }
}
