//! Error types for lambda-dev.
//!
//! This module defines a hierarchy of error types using `thiserror`:
//! - [`LambdaError`]: Top-level errors for the broker
//! - [`StorageError`]: Failures reported by capability storage backends
//! - [`HostFunctionError`]: Errors from host function implementations

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Top-level broker errors.
///
/// Construction-time variants ([`LambdaError::BundleNotFound`],
/// [`LambdaError::ImportDenied`], [`LambdaError::Compilation`]) abort only the
/// construction attempt that raised them; nothing is cached and the next
/// request retries. Per-request variants ([`LambdaError::Timeout`],
/// [`LambdaError::Sandbox`]) abort only that request.
#[derive(Error, Debug)]
pub enum LambdaError {
    /// A required startup argument or configuration value is missing or invalid.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of the configuration problem.
        reason: String,
    },

    /// The bundle file does not exist.
    #[error("Cannot find the bundled script file: {}", path.display())]
    BundleNotFound {
        /// The configured bundle path.
        path: PathBuf,
    },

    /// The bundle imports a namespace that is not in the allow-list.
    #[error("Import denied: module '{module}' (requested '{name}') is not allowed")]
    ImportDenied {
        /// The import namespace that was refused.
        module: String,
        /// The imported item within that namespace.
        name: String,
    },

    /// The bundle text failed to compile or link.
    #[error("Compilation failed: {reason}")]
    Compilation {
        /// Description of the compilation failure.
        reason: String,
    },

    /// The handler did not complete before the deadline.
    #[error("The function execution time is above the limit ({duration_ms}ms)")]
    Timeout {
        /// The deadline in milliseconds.
        duration_ms: u64,
    },

    /// Sandboxed code signalled an error or trapped.
    #[error("Sandbox error: {message}")]
    Sandbox {
        /// Message reported by the sandbox.
        message: String,
    },

    /// A capability storage backend failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A host function returned an error.
    #[error("Host function error: {0}")]
    Host(#[from] HostFunctionError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors reported by capability storage backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend rejected or failed the operation.
    #[error("{operation} failed: {message}")]
    Backend {
        /// The storage operation (`get`, `set`, `remove`, ...).
        operation: &'static str,
        /// Backend-provided description.
        message: String,
    },

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A key or path escapes the capability's storage root.
    #[error("Invalid key: {key}")]
    InvalidKey {
        /// The offending key or path.
        key: String,
    },

    /// Filesystem-backed storage failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Errors from host function implementations.
#[derive(Error, Debug)]
pub enum HostFunctionError {
    /// An HTTP request made by the guest failed.
    #[error("HTTP request failed: {url} (status: {status})")]
    HttpRequestFailed {
        /// The URL that was requested.
        url: String,
        /// The HTTP status code (0 if connection failed).
        status: u16,
    },

    /// The requested operation was denied by policy.
    #[error("Permission denied: {resource}")]
    PermissionDenied {
        /// Description of the resource that access was denied to.
        resource: String,
    },

    /// The per-artifact request budget was exhausted.
    #[error("Rate limit exceeded: {operation}")]
    RateLimitExceeded {
        /// The operation that was rate-limited.
        operation: String,
    },

    /// Invalid argument was passed to a host function.
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Description of why the argument was invalid.
        reason: String,
    },
}

impl LambdaError {
    /// Create a new `Config` error.
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// Create a new `BundleNotFound` error.
    pub fn bundle_not_found(path: impl AsRef<Path>) -> Self {
        Self::BundleNotFound {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Create a new `ImportDenied` error.
    pub fn import_denied(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self::ImportDenied {
            module: module.into(),
            name: name.into(),
        }
    }

    /// Create a new `Compilation` error.
    pub fn compilation(reason: impl Into<String>) -> Self {
        Self::Compilation {
            reason: reason.into(),
        }
    }

    /// Create a new `Sandbox` error.
    pub fn sandbox(message: impl Into<String>) -> Self {
        Self::Sandbox {
            message: message.into(),
        }
    }

    /// Returns `true` if this error was raised while constructing an artifact.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::BundleNotFound { .. } | Self::ImportDenied { .. } | Self::Compilation { .. }
        )
    }

    /// Returns `true` if the request deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

impl StorageError {
    /// Create a new `Backend` error.
    pub fn backend(operation: &'static str, message: impl ToString) -> Self {
        Self::Backend {
            operation,
            message: message.to_string(),
        }
    }
}
