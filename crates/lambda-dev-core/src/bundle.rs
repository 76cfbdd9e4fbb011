//! Bundle loading and compilation.
//!
//! A bundle is the single script produced by the external build step. It is
//! WebAssembly text (or binary) and is compiled by Wasmtime when the first
//! request after a (re)build constructs a sandbox.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::{info, instrument};
use wasmtime::{Engine, Module};

use lambda_dev_common::LambdaError;

/// Raw bundle source read from disk.
#[derive(Clone)]
pub struct Bundle {
    path: PathBuf,
    source: Vec<u8>,
    content_hash: String,
}

impl Bundle {
    /// Read the bundle at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::BundleNotFound`] if the file does not exist.
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, LambdaError> {
        let path = path.as_ref();
        let source = tokio::fs::read(path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                LambdaError::bundle_not_found(path)
            } else {
                LambdaError::Io(e)
            }
        })?;

        Ok(Self::from_source(path, source))
    }

    /// Wrap in-memory source, e.g. an external module or a test fixture.
    pub fn from_source(path: impl AsRef<Path>, source: impl Into<Vec<u8>>) -> Self {
        let source = source.into();
        let content_hash = compute_hash(&source);
        Self {
            path: path.as_ref().to_path_buf(),
            source,
            content_hash,
        }
    }

    /// Path the bundle was read from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Hash of the bundle bytes.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// Compile the bundle.
    ///
    /// # Errors
    ///
    /// Returns [`LambdaError::Compilation`] if the source is not valid
    /// WebAssembly text or binary.
    #[instrument(skip(self, engine), fields(path = %self.path.display(), bytes_len = self.source.len()))]
    pub fn compile(&self, engine: &Engine) -> Result<Module, LambdaError> {
        let start = Instant::now();

        let module = Module::new(engine, &self.source).map_err(|e| {
            LambdaError::compilation(format!("{}: {e}", self.path.display()))
        })?;

        info!(
            content_hash = %self.content_hash,
            duration_ms = start.elapsed().as_millis(),
            "Bundle compiled"
        );

        Ok(module)
    }
}

impl std::fmt::Debug for Bundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bundle")
            .field("path", &self.path)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}
