//! Shared application state.
//!
//! This module provides [`AppState`], which holds shared resources
//! across all HTTP request handlers.

use std::sync::Arc;
use std::time::Instant;

use lambda_dev_common::{FetchConfig, LambdaConfig, LambdaError, RuntimeConfig, StorageConfig};
use lambda_dev_core::{ArtifactCache, BundleSource, RequestBridge, SandboxLoader, WasmEngine};
use lambda_dev_host::{FetchPolicy, HostBindings};

/// Everything needed to assemble the broker.
#[derive(Debug, Clone, Default)]
pub struct BrokerConfig {
    /// Engine configuration.
    pub runtime: RuntimeConfig,
    /// Session configuration.
    pub lambda: LambdaConfig,
    /// Capability storage.
    pub storage: StorageConfig,
    /// Outbound HTTP policy.
    pub fetch: FetchConfig,
}

/// Shared state across all request handlers.
///
/// This struct is cloned for each request, so it uses `Arc` for shared data.
#[derive(Clone)]
pub struct AppState {
    /// Wasmtime engine (shared with the loader).
    engine: WasmEngine,

    /// Bridge into the current artifact.
    bridge: Arc<RequestBridge>,

    /// Session configuration applied to every request.
    lambda: Arc<LambdaConfig>,

    /// When the server state was created.
    started_at: Instant,
}

impl AppState {
    /// Create state around an existing bridge.
    pub fn new(engine: WasmEngine, bridge: Arc<RequestBridge>, lambda: LambdaConfig) -> Self {
        Self {
            engine,
            bridge,
            lambda: Arc::new(lambda),
            started_at: Instant::now(),
        }
    }

    /// Assemble the broker for `source`: engine, capability backends, host
    /// bindings, loader, cache and bridge.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine or the HTTP client cannot be created.
    pub fn from_config(config: &BrokerConfig, source: BundleSource) -> Result<Self, LambdaError> {
        let engine = WasmEngine::new(&config.runtime.engine)?;
        let host = HostBindings::new(FetchPolicy::from_config(&config.fetch))?;
        let loader = SandboxLoader::new(
            engine.clone(),
            lambda_dev_host::binder(&config.storage),
            Arc::new(host),
        );
        let bridge = RequestBridge::new(Arc::new(ArtifactCache::new()), Arc::new(loader), source);

        Ok(Self::new(engine, Arc::new(bridge), config.lambda.clone()))
    }

    /// Get the Wasmtime engine.
    pub fn engine(&self) -> &WasmEngine {
        &self.engine
    }

    /// Get the request bridge.
    pub fn bridge(&self) -> &RequestBridge {
        &self.bridge
    }

    /// Get the artifact cache.
    pub fn cache(&self) -> &Arc<ArtifactCache> {
        self.bridge.cache()
    }

    /// Get the session configuration.
    pub fn lambda(&self) -> &LambdaConfig {
        &self.lambda
    }

    /// Time since the state was created.
    pub fn uptime(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("bundle", &self.bridge.source().bundle)
            .field("generation", &self.cache().generation())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_creation() {
        let dir = tempfile::tempdir().unwrap();
        let config = BrokerConfig {
            storage: StorageConfig {
                root: dir.path().to_path_buf(),
            },
            ..Default::default()
        };

        let state = AppState::from_config(&config, BundleSource::new(dir.path().join("index.wat")))
            .unwrap();

        assert_eq!(state.cache().generation(), 0);
        assert!(state.cache().lookup().is_none());
        assert_eq!(state.lambda().max_wait(), std::time::Duration::from_secs(10));
    }
}
