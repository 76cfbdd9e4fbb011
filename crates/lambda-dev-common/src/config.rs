//! Configuration structures for lambda-dev.
//!
//! This module defines configuration options for various components:
//! - [`RuntimeConfig`]: Wasmtime engine settings
//! - [`LambdaConfig`]: Per-session sandbox settings (deadline, env, allow-lists)
//! - [`CapabilitiesConfig`]: Which capability clients are injected
//! - [`FetchConfig`]: Outbound HTTP policy
//!
//! Everything in [`LambdaConfig`] except `maxWaitTime` is consumed only when a
//! sandbox is constructed. A cached artifact keeps the values it was built
//! with until the next rebuild.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Wasmtime engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Wasmtime engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable epoch-based yielding.
    ///
    /// Long-running guest code periodically yields back to the executor
    /// instead of monopolizing a worker thread. Guest code is never
    /// interrupted.
    #[serde(default = "defaults::epoch_interruption")]
    pub epoch_interruption: bool,

    /// Interval between epoch ticks in milliseconds.
    #[serde(default = "defaults::epoch_tick_ms")]
    pub epoch_tick_ms: u64,

    /// Maximum linear memory per sandbox in megabytes.
    #[serde(default = "defaults::instance_memory_mb")]
    pub instance_memory_mb: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            epoch_interruption: defaults::epoch_interruption(),
            epoch_tick_ms: defaults::epoch_tick_ms(),
            instance_memory_mb: defaults::instance_memory_mb(),
        }
    }
}

impl EngineConfig {
    /// Get the epoch tick interval as a `Duration`.
    pub fn epoch_tick(&self) -> Duration {
        Duration::from_millis(self.epoch_tick_ms.max(1))
    }

    /// Maximum linear memory per sandbox in bytes.
    pub fn instance_memory_bytes(&self) -> usize {
        (self.instance_memory_mb as usize) * 1024 * 1024
    }
}

/// Sandbox settings for the single bundle served by this process.
///
/// Keys use the camelCase spelling of the dev config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LambdaConfig {
    /// Deadline for a handler to respond, in seconds.
    #[serde(default = "defaults::max_wait_time")]
    pub max_wait_time: f64,

    /// Environment variables exposed through the `env` binding.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// External modules the bundle may import in addition to the static
    /// allow-list.
    #[serde(default)]
    pub allowed_require: Vec<String>,

    /// Allow access to built-in host facilities at all.
    #[serde(default)]
    pub allow_builtin: bool,

    /// Built-in host facilities the bundle may import when `allowBuiltin` is set.
    #[serde(default)]
    pub allowed_builtin: Vec<String>,

    /// Capability clients.
    #[serde(flatten)]
    pub capabilities: CapabilitiesConfig,
}

impl Default for LambdaConfig {
    fn default() -> Self {
        Self {
            max_wait_time: defaults::max_wait_time(),
            env: BTreeMap::new(),
            allowed_require: Vec::new(),
            allow_builtin: false,
            allowed_builtin: Vec::new(),
            capabilities: CapabilitiesConfig::default(),
        }
    }
}

impl LambdaConfig {
    /// Get the response deadline as a `Duration`.
    ///
    /// Non-positive or non-finite values fall back to the 10 second default.
    pub fn max_wait(&self) -> Duration {
        if self.max_wait_time > 0.0 {
            Duration::try_from_secs_f64(self.max_wait_time)
                .unwrap_or_else(|_| Duration::from_secs_f64(defaults::max_wait_time()))
        } else {
            Duration::from_secs_f64(defaults::max_wait_time())
        }
    }

    /// Built-in facilities that are effectively allowed.
    ///
    /// Empty unless `allowBuiltin` is set.
    pub fn effective_builtins(&self) -> Vec<String> {
        if self.allow_builtin {
            self.allowed_builtin.clone()
        } else {
            Vec::new()
        }
    }
}

/// Per-capability configuration.
///
/// The original dev config spells the blob store `oss` and the virtual
/// filesystem `cfs`; both spellings are accepted.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CapabilitiesConfig {
    /// Key-value storage.
    #[serde(default)]
    pub kv: CapabilityConfig,

    /// Blob storage.
    #[serde(default, alias = "oss")]
    pub blob: CapabilityConfig,

    /// Virtual filesystem.
    #[serde(default, alias = "cfs")]
    pub fs: CapabilityConfig,

    /// Structured logging.
    #[serde(default)]
    pub log: CapabilityConfig,
}

/// Configuration for a single capability.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CapabilityConfig {
    /// Whether the capability is injected into the sandbox.
    #[serde(default, alias = "enabled")]
    pub enable: bool,

    /// Free-form options handed to the capability factory.
    #[serde(flatten)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl CapabilityConfig {
    /// An enabled capability with no options.
    pub fn enabled() -> Self {
        Self {
            enable: true,
            options: serde_json::Map::new(),
        }
    }

    /// Add an option.
    #[must_use]
    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }
}

/// Outbound HTTP policy for the `fetch` binding.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Allowed host patterns (`api.example.com`, `*.example.com`, `*`).
    #[serde(default = "defaults::allowed_hosts")]
    pub allowed_hosts: Vec<String>,

    /// Refuse loopback, private and link-local targets.
    #[serde(default)]
    pub block_private_addresses: bool,

    /// Maximum outbound requests per artifact; unlimited when unset.
    #[serde(default)]
    pub max_requests: Option<u32>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            allowed_hosts: defaults::allowed_hosts(),
            block_private_addresses: false,
            max_requests: None,
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn epoch_interruption() -> bool {
        true
    }

    pub const fn epoch_tick_ms() -> u64 {
        10
    }

    pub const fn instance_memory_mb() -> u32 {
        64
    }

    pub const fn max_wait_time() -> f64 {
        10.0
    }

    pub fn allowed_hosts() -> Vec<String> {
        vec!["*".to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert!(config.engine.epoch_interruption);
        assert_eq!(config.engine.epoch_tick_ms, 10);
        assert_eq!(config.engine.instance_memory_mb, 64);

        let lambda = LambdaConfig::default();
        assert_eq!(lambda.max_wait(), Duration::from_secs(10));
        assert!(!lambda.capabilities.kv.enable);
        assert!(lambda.effective_builtins().is_empty());
    }

    #[test]
    fn test_lambda_config_camel_case() {
        let json = r#"{
            "maxWaitTime": 2.5,
            "env": {"API_KEY": "secret"},
            "allowedRequire": ["helpers"],
            "allowBuiltin": true,
            "allowedBuiltin": ["clock"],
            "kv": {"enable": true, "writeMode": "strict"},
            "oss": {"enable": false},
            "cfs": {"enabled": true}
        }"#;
        let config: LambdaConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.max_wait(), Duration::from_millis(2500));
        assert_eq!(config.env["API_KEY"], "secret");
        assert_eq!(config.allowed_require, vec!["helpers"]);
        assert_eq!(config.effective_builtins(), vec!["clock"]);
        assert!(config.capabilities.kv.enable);
        assert_eq!(config.capabilities.kv.options["writeMode"], "strict");
        assert!(!config.capabilities.blob.enable);
        assert!(config.capabilities.fs.enable);
        assert!(!config.capabilities.log.enable);
    }

    #[test]
    fn test_builtins_require_allow_flag() {
        let config = LambdaConfig {
            allow_builtin: false,
            allowed_builtin: vec!["clock".into()],
            ..Default::default()
        };
        assert!(config.effective_builtins().is_empty());
    }

    #[test]
    fn test_invalid_wait_time_falls_back() {
        let config = LambdaConfig {
            max_wait_time: -1.0,
            ..Default::default()
        };
        assert_eq!(config.max_wait(), Duration::from_secs(10));

        let config = LambdaConfig {
            max_wait_time: f64::NAN,
            ..Default::default()
        };
        assert_eq!(config.max_wait(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_deserialization() {
        let json = r#"{"engine": {"epoch_tick_ms": 5}}"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.engine.epoch_tick_ms, 5);
        assert!(config.engine.epoch_interruption);
        assert_eq!(config.engine.instance_memory_bytes(), 64 * 1024 * 1024);
    }

    #[test]
    fn test_fetch_defaults() {
        let config: FetchConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.allowed_hosts, vec!["*"]);
        assert!(!config.block_private_addresses);
        assert!(config.max_requests.is_none());
    }

    #[test]
    fn test_capability_builder() {
        let kv = CapabilityConfig::enabled().with_option("writeMode", "strict");
        assert!(kv.enable);
        assert_eq!(kv.options["writeMode"], "strict");
    }
}
