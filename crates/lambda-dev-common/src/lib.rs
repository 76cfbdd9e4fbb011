//! Common types, errors, and configuration for lambda-dev.
//!
//! This crate provides shared functionality used across the lambda-dev workspace:
//! - Error types using `thiserror` for type-safe error handling
//! - Configuration structures for the engine and the sandbox
//! - Configuration file loading for the `start` command

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{
    CapabilitiesConfig, CapabilityConfig, EngineConfig, FetchConfig, LambdaConfig, RuntimeConfig,
};
pub use config_file::{
    BuildConfigFile, ConfigFileError, DevConfigFile, ServerConfigFile, StorageConfig, WatchConfig,
};
pub use error::{HostFunctionError, LambdaError, StorageError};
