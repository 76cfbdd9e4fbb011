//! Capability clients and the binder that injects them.
//!
//! A capability is an optional host-backed facility (key-value storage, blob
//! storage, virtual filesystem, logging). The broker only knows the narrow
//! client traits defined here; concrete backends live in `lambda-dev-host`
//! and are registered as [`CapabilityFactory`] implementations.
//!
//! [`CapabilityBinder::bind`] constructs a client only for capabilities whose
//! config has `enable = true`. A disabled capability has no entry in
//! [`Bindings`] and its import namespace is never linked, so the sandbox
//! cannot reach it at all.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use lambda_dev_common::{CapabilitiesConfig, CapabilityConfig, LambdaError, StorageError};

/// The capabilities a sandbox can be granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CapabilityKind {
    /// Key-value storage.
    Kv,
    /// Blob storage.
    Blob,
    /// Virtual filesystem.
    Fs,
    /// Structured logging.
    Log,
}

impl CapabilityKind {
    /// Every capability kind.
    pub const ALL: [CapabilityKind; 4] = [Self::Kv, Self::Blob, Self::Fs, Self::Log];

    /// Import namespace under which the client is linked.
    pub fn binding_name(self) -> &'static str {
        match self {
            Self::Kv => "kv",
            Self::Blob => "blob",
            Self::Fs => "fs",
            Self::Log => "log",
        }
    }

    fn config(self, config: &CapabilitiesConfig) -> &CapabilityConfig {
        match self {
            Self::Kv => &config.kv,
            Self::Blob => &config.blob,
            Self::Fs => &config.fs,
            Self::Log => &config.log,
        }
    }
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binding_name())
    }
}

/// Key-value client contract.
///
/// `get` on a key that was never written returns `Ok(None)`.
#[async_trait]
pub trait KeyValue: Send + Sync {
    /// Read and parse the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;

    /// Store `value` under `key`.
    async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// Delete `key`.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Blob storage client contract.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the object stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store `data` under `key`, replacing any previous object.
    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete the object stored under `key`.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Virtual filesystem client contract.
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Read a whole file.
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write a whole file, creating parent directories.
    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Delete a file.
    async fn remove(&self, path: &str) -> Result<(), StorageError>;
}

/// Log level for guest logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug-level messages.
    Debug,
    /// Informational messages.
    Info,
    /// Warning messages.
    Warn,
    /// Error messages.
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

/// Logging client contract.
pub trait LogSink: Send + Sync {
    /// Record a message emitted by guest code.
    fn log(&self, level: LogLevel, message: &str);
}

/// A constructed capability client.
#[derive(Clone)]
pub enum BoundClient {
    Kv(Arc<dyn KeyValue>),
    Blob(Arc<dyn BlobStore>),
    Fs(Arc<dyn FileSystem>),
    Log(Arc<dyn LogSink>),
}

impl BoundClient {
    /// The capability this client implements.
    pub fn kind(&self) -> CapabilityKind {
        match self {
            Self::Kv(_) => CapabilityKind::Kv,
            Self::Blob(_) => CapabilityKind::Blob,
            Self::Fs(_) => CapabilityKind::Fs,
            Self::Log(_) => CapabilityKind::Log,
        }
    }
}

/// Host-side constructor for one capability.
///
/// Factories are parameterized by the free-form options of the capability's
/// config section.
pub trait CapabilityFactory: Send + Sync {
    /// The capability this factory constructs.
    fn kind(&self) -> CapabilityKind;

    /// Construct a client.
    fn create(&self, options: &Map<String, Value>) -> Result<BoundClient, LambdaError>;
}

/// The clients bound into one sandbox.
#[derive(Clone, Default)]
pub struct Bindings {
    kv: Option<Arc<dyn KeyValue>>,
    blob: Option<Arc<dyn BlobStore>>,
    fs: Option<Arc<dyn FileSystem>>,
    log: Option<Arc<dyn LogSink>>,
}

impl Bindings {
    /// No capabilities bound.
    pub fn none() -> Self {
        Self::default()
    }

    /// Add a client, replacing one of the same kind.
    pub fn insert(&mut self, client: BoundClient) {
        match client {
            BoundClient::Kv(c) => self.kv = Some(c),
            BoundClient::Blob(c) => self.blob = Some(c),
            BoundClient::Fs(c) => self.fs = Some(c),
            BoundClient::Log(c) => self.log = Some(c),
        }
    }

    /// The key-value client, if bound.
    pub fn kv(&self) -> Option<&Arc<dyn KeyValue>> {
        self.kv.as_ref()
    }

    /// The blob client, if bound.
    pub fn blob(&self) -> Option<&Arc<dyn BlobStore>> {
        self.blob.as_ref()
    }

    /// The filesystem client, if bound.
    pub fn fs(&self) -> Option<&Arc<dyn FileSystem>> {
        self.fs.as_ref()
    }

    /// The log client, if bound.
    pub fn log(&self) -> Option<&Arc<dyn LogSink>> {
        self.log.as_ref()
    }

    /// Returns `true` if `kind` is bound.
    pub fn contains(&self, kind: CapabilityKind) -> bool {
        match kind {
            CapabilityKind::Kv => self.kv.is_some(),
            CapabilityKind::Blob => self.blob.is_some(),
            CapabilityKind::Fs => self.fs.is_some(),
            CapabilityKind::Log => self.log.is_some(),
        }
    }

    /// Binding names of every bound capability.
    pub fn names(&self) -> Vec<&'static str> {
        CapabilityKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .map(CapabilityKind::binding_name)
            .collect()
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("names", &self.names())
            .finish()
    }
}

/// Maps capability configuration onto bound clients.
#[derive(Clone, Default)]
pub struct CapabilityBinder {
    factories: HashMap<CapabilityKind, Arc<dyn CapabilityFactory>>,
}

impl CapabilityBinder {
    /// A binder with no factories.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory, replacing one of the same kind.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<dyn CapabilityFactory>) -> Self {
        self.register(factory);
        self
    }

    /// Register a factory, replacing one of the same kind.
    pub fn register(&mut self, factory: Arc<dyn CapabilityFactory>) {
        self.factories.insert(factory.kind(), factory);
    }

    /// Construct the clients for every enabled capability.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Config`] if a capability is enabled but no
    /// factory is registered for it, or the factory's own error.
    pub fn bind(&self, config: &CapabilitiesConfig) -> Result<Bindings, LambdaError> {
        let mut bindings = Bindings::none();

        for kind in CapabilityKind::ALL {
            let section = kind.config(config);
            if !section.enable {
                continue;
            }

            let factory = self.factories.get(&kind).ok_or_else(|| {
                LambdaError::config(format!(
                    "capability '{kind}' is enabled but no host factory is registered"
                ))
            })?;

            let client = factory.create(&section.options)?;
            debug!(capability = %kind, "Capability bound");
            bindings.insert(client);
        }

        Ok(bindings)
    }
}

impl fmt::Debug for CapabilityBinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityBinder")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullLog;

    impl LogSink for NullLog {
        fn log(&self, _level: LogLevel, _message: &str) {}
    }

    struct CountingLogFactory {
        created: AtomicUsize,
    }

    impl CapabilityFactory for CountingLogFactory {
        fn kind(&self) -> CapabilityKind {
            CapabilityKind::Log
        }

        fn create(&self, _options: &Map<String, Value>) -> Result<BoundClient, LambdaError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(BoundClient::Log(Arc::new(NullLog)))
        }
    }

    #[test]
    fn test_disabled_capability_is_never_constructed() {
        let factory = Arc::new(CountingLogFactory {
            created: AtomicUsize::new(0),
        });
        let binder = CapabilityBinder::new().with_factory(factory.clone());

        let bindings = binder.bind(&CapabilitiesConfig::default()).unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 0);
        assert!(bindings.log().is_none());
        assert!(bindings.names().is_empty());
    }

    #[test]
    fn test_enabled_capability_is_bound() {
        let factory = Arc::new(CountingLogFactory {
            created: AtomicUsize::new(0),
        });
        let binder = CapabilityBinder::new().with_factory(factory.clone());

        let config = CapabilitiesConfig {
            log: CapabilityConfig::enabled(),
            ..Default::default()
        };
        let bindings = binder.bind(&config).unwrap();

        assert_eq!(factory.created.load(Ordering::SeqCst), 1);
        assert!(bindings.contains(CapabilityKind::Log));
        assert!(!bindings.contains(CapabilityKind::Kv));
        assert_eq!(bindings.names(), vec!["log"]);
    }

    #[test]
    fn test_enabled_without_factory_is_config_error() {
        let binder = CapabilityBinder::new();
        let config = CapabilitiesConfig {
            kv: CapabilityConfig::enabled(),
            ..Default::default()
        };

        let result = binder.bind(&config);
        assert!(matches!(result, Err(LambdaError::Config { .. })));
    }

    #[test]
    fn test_binding_names() {
        assert_eq!(CapabilityKind::Kv.binding_name(), "kv");
        assert_eq!(CapabilityKind::Blob.binding_name(), "blob");
        assert_eq!(CapabilityKind::Fs.binding_name(), "fs");
        assert_eq!(CapabilityKind::Log.to_string(), "log");
    }

    #[test]
    fn test_log_level_display() {
        assert_eq!(LogLevel::Debug.to_string(), "DEBUG");
        assert_eq!(LogLevel::Info.to_string(), "INFO");
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
        assert_eq!(LogLevel::Error.to_string(), "ERROR");
    }
}
