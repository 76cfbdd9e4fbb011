//! Configuration file structures for lambda-dev.
//!
//! The `start` command takes two files:
//! - [`DevConfigFile`]: server, engine, sandbox and storage settings
//! - [`BuildConfigFile`]: where the build step writes the bundle
//!
//! Both are read as JSON, or as TOML when the file name ends in `.toml`.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::{FetchConfig, LambdaConfig, RuntimeConfig};

/// Dev server configuration file.
///
/// # Example
///
/// ```json
/// {
///   "server": { "bind_addr": "127.0.0.1:3000" },
///   "lambda": {
///     "maxWaitTime": 10,
///     "env": { "API_BASE": "https://api.example.com" },
///     "kv": { "enable": true }
///   },
///   "storage": { "root": "./.lambda-dev" }
/// }
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevConfigFile {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfigFile,

    /// Runtime configuration (engine settings).
    #[serde(default)]
    pub runtime: RuntimeConfig,

    /// Sandbox settings.
    #[serde(default)]
    pub lambda: LambdaConfig,

    /// Local storage for capability backends.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Outbound HTTP policy.
    #[serde(default)]
    pub fetch: FetchConfig,
}

impl DevConfigFile {
    /// Load the dev config from a JSON or TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        load(path.as_ref())
    }

    /// Parse the dev config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        parse_toml(content)
    }

    /// Parse the dev config from a JSON string.
    pub fn from_json(content: &str) -> Result<Self, ConfigFileError> {
        parse_json(content)
    }
}

/// HTTP server configuration from config file.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfigFile {
    /// Bind address (e.g., "127.0.0.1:3000").
    #[serde(default = "defaults::bind_addr")]
    pub bind_addr: String,

    /// Outer request timeout in seconds.
    ///
    /// Should exceed `lambda.maxWaitTime` so the broker reports the
    /// gateway timeout itself.
    #[serde(default = "defaults::request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Enable graceful shutdown.
    #[serde(default = "defaults::graceful_shutdown")]
    pub graceful_shutdown: bool,
}

impl Default for ServerConfigFile {
    fn default() -> Self {
        Self {
            bind_addr: defaults::bind_addr(),
            request_timeout_secs: defaults::request_timeout_secs(),
            graceful_shutdown: defaults::graceful_shutdown(),
        }
    }
}

/// Local storage used by capability backends.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Base directory; KV, blob and filesystem data live below it.
    #[serde(default = "defaults::storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: defaults::storage_root(),
        }
    }
}

impl StorageConfig {
    /// Directory of the key-value database.
    pub fn kv_dir(&self) -> PathBuf {
        self.root.join("kv")
    }

    /// Directory of the blob store.
    pub fn blob_dir(&self) -> PathBuf {
        self.root.join("blob")
    }

    /// Root of the virtual filesystem.
    pub fn fs_dir(&self) -> PathBuf {
        self.root.join("fs")
    }
}

/// Build configuration file.
///
/// # Example
///
/// ```toml
/// bundle = "./dist/bundle.wat"
/// modules_dir = "./dist/modules"
///
/// [watch]
/// enabled = true
/// debounce_ms = 100
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct BuildConfigFile {
    /// Path of the bundle written by the build step.
    #[serde(default = "defaults::bundle", alias = "output")]
    pub bundle: PathBuf,

    /// Directory holding allowed external modules (`<name>.wat`).
    #[serde(default)]
    pub modules_dir: Option<PathBuf>,

    /// Bundle watching.
    #[serde(default)]
    pub watch: WatchConfig,
}

impl Default for BuildConfigFile {
    fn default() -> Self {
        Self {
            bundle: defaults::bundle(),
            modules_dir: None,
            watch: WatchConfig::default(),
        }
    }
}

impl BuildConfigFile {
    /// Load the build config from a JSON or TOML file.
    ///
    /// Relative paths inside the file are resolved against the file's
    /// directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let path = path.as_ref();
        let mut config: Self = load(path)?;
        if let Some(base) = path.parent() {
            config.bundle = base.join(&config.bundle);
            config.modules_dir = config.modules_dir.map(|dir| base.join(dir));
        }
        Ok(config)
    }

    /// Parse the build config from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigFileError> {
        parse_toml(content)
    }
}

/// Bundle watching options.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchConfig {
    /// Watch the bundle and report rebuilds.
    #[serde(default = "defaults::watch_enabled")]
    pub enabled: bool,

    /// Quiet period before a burst of file events is reported as one rebuild.
    #[serde(default = "defaults::debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::watch_enabled(),
            debounce_ms: defaults::debounce_ms(),
        }
    }
}

/// Configuration file errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigFileError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse configuration file.
    #[error("Failed to parse config file: {message}")]
    Parse { message: String },
}

fn load<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigFileError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigFileError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    debug!(path = %path.display(), toml = is_toml, "Loading config file");

    if is_toml {
        parse_toml(&content)
    } else {
        parse_json(&content)
    }
}

fn parse_toml<T: DeserializeOwned>(content: &str) -> Result<T, ConfigFileError> {
    toml::from_str(content).map_err(|e| ConfigFileError::Parse {
        message: e.to_string(),
    })
}

fn parse_json<T: DeserializeOwned>(content: &str) -> Result<T, ConfigFileError> {
    serde_json::from_str(content).map_err(|e| ConfigFileError::Parse {
        message: e.to_string(),
    })
}

/// Default value functions for serde.
mod defaults {
    use std::path::PathBuf;

    pub fn bind_addr() -> String {
        "127.0.0.1:3000".to_string()
    }

    pub const fn request_timeout_secs() -> u64 {
        60
    }

    pub const fn graceful_shutdown() -> bool {
        true
    }

    pub fn storage_root() -> PathBuf {
        PathBuf::from("./.lambda-dev")
    }

    pub fn bundle() -> PathBuf {
        PathBuf::from("./dist/bundle.wat")
    }

    pub const fn watch_enabled() -> bool {
        true
    }

    pub const fn debounce_ms() -> u64 {
        100
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dev_config() {
        let config = DevConfigFile::default();

        assert_eq!(config.server.bind_addr, "127.0.0.1:3000");
        assert_eq!(config.server.request_timeout_secs, 60);
        assert!(config.server.graceful_shutdown);
        assert_eq!(config.storage.kv_dir(), PathBuf::from("./.lambda-dev/kv"));
        assert!(!config.lambda.capabilities.kv.enable);
    }

    #[test]
    fn test_parse_json_dev_config() {
        let json = r#"{
            "server": {"bind_addr": "0.0.0.0:9000"},
            "lambda": {
                "maxWaitTime": 3,
                "kv": {"enable": true},
                "log": {"enable": true}
            },
            "storage": {"root": "/tmp/lambda"}
        }"#;

        let config = DevConfigFile::from_json(json).unwrap();

        assert_eq!(config.server.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.lambda.max_wait_time, 3.0);
        assert!(config.lambda.capabilities.kv.enable);
        assert!(config.lambda.capabilities.log.enable);
        assert_eq!(config.storage.blob_dir(), PathBuf::from("/tmp/lambda/blob"));
        assert_eq!(config.fetch.allowed_hosts, vec!["*"]);
    }

    #[test]
    fn test_parse_toml_dev_config() {
        let toml = r#"
            [runtime.engine]
            epoch_tick_ms = 20

            [lambda]
            maxWaitTime = 1.5
            allowedRequire = ["helpers"]

            [lambda.cfs]
            enable = true
            quota = 1024
        "#;

        let config = DevConfigFile::from_toml(toml).unwrap();

        assert_eq!(config.runtime.engine.epoch_tick_ms, 20);
        assert_eq!(config.lambda.allowed_require, vec!["helpers"]);
        assert!(config.lambda.capabilities.fs.enable);
        assert_eq!(config.lambda.capabilities.fs.options["quota"], 1024);
    }

    #[test]
    fn test_build_config_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.toml");
        std::fs::write(
            &path,
            "bundle = \"dist/bundle.wat\"\nmodules_dir = \"dist/modules\"\n",
        )
        .unwrap();

        let config = BuildConfigFile::from_file(&path).unwrap();

        assert_eq!(config.bundle, dir.path().join("dist/bundle.wat"));
        assert_eq!(config.modules_dir, Some(dir.path().join("dist/modules")));
        assert!(config.watch.enabled);
        assert_eq!(config.watch.debounce_ms, 100);
    }

    #[test]
    fn test_build_config_output_alias() {
        let config: BuildConfigFile =
            serde_json::from_str(r#"{"output": "./out/fn.wat"}"#).unwrap();
        assert_eq!(config.bundle, PathBuf::from("./out/fn.wat"));
    }

    #[test]
    fn test_missing_file() {
        let result = DevConfigFile::from_file("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigFileError::Io { .. })));
    }

    #[test]
    fn test_parse_invalid() {
        assert!(DevConfigFile::from_toml("this is not valid toml [").is_err());
        assert!(DevConfigFile::from_json("{not json").is_err());
    }
}
