//! Logging capability.
//!
//! Guest log lines are emitted through `tracing` with `guest_log = true`, so
//! they can be filtered apart from broker logs.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use lambda_dev_common::LambdaError;
use lambda_dev_core::{BoundClient, CapabilityFactory, CapabilityKind, LogLevel, LogSink};

/// Name used when the `name` option is not set.
const DEFAULT_NAME: &str = "lambda";

/// Forwards guest logs to `tracing`.
#[derive(Debug, Clone)]
pub struct TracingLog {
    name: String,
}

impl TracingLog {
    /// A sink tagging every line with `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The tag attached to every line.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl LogSink for TracingLog {
    fn log(&self, level: LogLevel, message: &str) {
        let function = self.name.as_str();
        match level {
            LogLevel::Debug => debug!(function, guest_log = true, "{}", message),
            LogLevel::Info => info!(function, guest_log = true, "{}", message),
            LogLevel::Warn => warn!(function, guest_log = true, "{}", message),
            LogLevel::Error => error!(function, guest_log = true, "{}", message),
        }
    }
}

/// Convert a numeric log level to [`LogLevel`].
///
/// 0=debug, 1=info, 2=warn, 3=error; anything else is info.
pub fn level_from_i32(level: i32) -> LogLevel {
    match level {
        0 => LogLevel::Debug,
        2 => LogLevel::Warn,
        3 => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

/// Constructs [`TracingLog`] sinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFactory;

impl CapabilityFactory for LogFactory {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Log
    }

    fn create(&self, options: &Map<String, Value>) -> Result<BoundClient, LambdaError> {
        let name = options
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_NAME);
        Ok(BoundClient::Log(Arc::new(TracingLog::new(name))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_from_i32() {
        assert_eq!(level_from_i32(0), LogLevel::Debug);
        assert_eq!(level_from_i32(1), LogLevel::Info);
        assert_eq!(level_from_i32(2), LogLevel::Warn);
        assert_eq!(level_from_i32(3), LogLevel::Error);
        assert_eq!(level_from_i32(99), LogLevel::Info);
        assert_eq!(level_from_i32(-1), LogLevel::Info);
    }

    #[test]
    fn test_factory_name_option() {
        let options = Map::from_iter([("name".to_string(), json!("checkout"))]);
        let BoundClient::Log(sink) = LogFactory.create(&options).unwrap() else {
            panic!("expected a log client");
        };
        sink.log(LogLevel::Info, "hello");

        let default = TracingLog::new(DEFAULT_NAME);
        assert_eq!(default.name(), "lambda");
    }
}
