//! Virtual filesystem capability rooted in a host directory.
//!
//! Guest paths are virtual: `/data/a.json` and `data/a.json` name the same
//! file below the root. Nothing outside the root is reachable.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use lambda_dev_common::{LambdaError, StorageError};
use lambda_dev_core::{BoundClient, CapabilityFactory, CapabilityKind, FileSystem};

use super::resolve;

/// A filesystem confined to `root`.
#[derive(Debug, Clone)]
pub struct RootedFs {
    root: PathBuf,
}

impl RootedFs {
    /// A filesystem rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn host_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        resolve(&self.root, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl FileSystem for RootedFs {
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let host_path = self.host_path(path)?;
        match tokio::fs::read(&host_path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &str, data: &[u8]) -> Result<(), StorageError> {
        let host_path = self.host_path(path)?;
        if let Some(parent) = host_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&host_path, data).await?;
        debug!(path, size = data.len(), "File written");
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), StorageError> {
        let host_path = self.host_path(path)?;
        match tokio::fs::remove_file(&host_path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Constructs [`RootedFs`] clients.
#[derive(Debug, Clone)]
pub struct FsFactory {
    root: PathBuf,
}

impl FsFactory {
    /// A factory whose filesystems are rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CapabilityFactory for FsFactory {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Fs
    }

    fn create(&self, _options: &Map<String, Value>) -> Result<BoundClient, LambdaError> {
        Ok(BoundClient::Fs(Arc::new(RootedFs::new(self.root.clone()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_virtual_paths_share_root() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RootedFs::new(dir.path());

        fs.write("/data/a.json", b"{}").await.unwrap();

        assert_eq!(fs.read("data/a.json").await.unwrap().as_deref(), Some(&b"{}"[..]));
        assert!(dir.path().join("data").join("a.json").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RootedFs::new(dir.path());

        assert_eq!(fs.read("/nope.txt").await.unwrap(), None);
        assert!(fs.remove("/nope.txt").await.is_ok());
    }

    #[tokio::test]
    async fn test_traversal_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fs = RootedFs::new(dir.path().join("root"));

        let err = fs.write("/../escape.txt", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { ref key } if key == "../escape.txt"));

        let err = fs.read("a/../../b").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }
}
