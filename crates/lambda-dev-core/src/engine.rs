//! Wasmtime engine configuration and creation.
//!
//! The [`WasmEngine`] is shared by every artifact the broker builds. It is:
//! - Thread-safe and cheap to clone
//! - Configured for async host functions
//! - Set up with epoch-based yielding so long-running guest code never pins
//!   a tokio worker thread

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use wasmtime::{Config, Engine};

use lambda_dev_common::{EngineConfig, LambdaError};

/// Thread-safe WebAssembly engine wrapper.
///
/// # Configuration
///
/// The engine is configured with:
/// - **Async Support**: host functions backed by I/O (KV, fetch) await
///   without blocking the executor
/// - **Epoch Interruption**: stores yield to the executor on every tick; the
///   guest resumes afterwards, it is never cancelled
///
/// # Example
///
/// ```ignore
/// use lambda_dev_common::EngineConfig;
/// use lambda_dev_core::WasmEngine;
///
/// let engine = WasmEngine::new(&EngineConfig::default())?;
/// let _ticker = engine.start_epoch_ticker();
/// ```
#[derive(Clone)]
pub struct WasmEngine {
    engine: Arc<Engine>,
    config: EngineConfig,
}

impl WasmEngine {
    /// Create a new WebAssembly engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the Wasmtime configuration is rejected.
    pub fn new(config: &EngineConfig) -> Result<Self, LambdaError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.async_support(true);

        if config.epoch_interruption {
            wasmtime_config.epoch_interruption(true);
        }

        wasmtime_config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        let engine = Engine::new(&wasmtime_config).map_err(|e| {
            LambdaError::config(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        info!(
            epoch_interruption = config.epoch_interruption,
            instance_memory_mb = config.instance_memory_mb,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            engine: Arc::new(engine),
            config: config.clone(),
        })
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Increment the epoch counter.
    pub fn increment_epoch(&self) {
        self.engine.increment_epoch();
    }

    /// Spawn the background task that advances the epoch.
    ///
    /// Returns `None` when epoch interruption is disabled or when called
    /// outside a tokio runtime.
    pub fn start_epoch_ticker(&self) -> Option<JoinHandle<()>> {
        if !self.config.epoch_interruption {
            return None;
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available; epoch ticker not started");
            return None;
        };

        let engine = Arc::clone(&self.engine);
        let tick = self.config.epoch_tick();
        debug!(tick_ms = tick.as_millis(), "Starting epoch ticker");

        Some(handle.spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                engine.increment_epoch();
            }
        }))
    }
}

impl std::fmt::Debug for WasmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasmEngine")
            .field("epoch_interruption", &self.config.epoch_interruption)
            .field("instance_memory_mb", &self.config.instance_memory_mb)
            .finish_non_exhaustive()
    }
}
