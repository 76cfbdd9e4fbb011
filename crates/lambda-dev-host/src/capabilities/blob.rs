//! Directory-backed blob capability.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use lambda_dev_common::{LambdaError, StorageError};
use lambda_dev_core::{BlobStore, BoundClient, CapabilityFactory, CapabilityKind};

use super::resolve;

/// Objects stored as files below a root directory.
#[derive(Debug, Clone)]
pub struct DirBlobStore {
    root: PathBuf,
}

impl DirBlobStore {
    /// A store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait]
impl BlobStore for DirBlobStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = resolve(&self.root, key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = resolve(&self.root, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        debug!(key, size = data.len(), "Blob stored");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = resolve(&self.root, key)?;
        match tokio::fs::remove_file(&path).await {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

/// Constructs [`DirBlobStore`]s.
///
/// The `bucket` option selects a subdirectory of the blob root.
#[derive(Debug, Clone)]
pub struct BlobFactory {
    root: PathBuf,
}

impl BlobFactory {
    /// A factory storing objects below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl CapabilityFactory for BlobFactory {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Blob
    }

    fn create(&self, options: &Map<String, Value>) -> Result<BoundClient, LambdaError> {
        let root = match options.get("bucket").and_then(Value::as_str) {
            Some(bucket) => resolve(&self.root, bucket)?,
            None => self.root.clone(),
        };
        debug!(root = %root.display(), "Blob client created");
        Ok(BoundClient::Blob(Arc::new(DirBlobStore::new(root))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::new(dir.path());

        assert_eq!(store.get("images/logo.png").await.unwrap(), None);

        store.put("images/logo.png", b"\x89PNG").await.unwrap();
        assert_eq!(
            store.get("images/logo.png").await.unwrap().as_deref(),
            Some(&b"\x89PNG"[..])
        );

        store.remove("images/logo.png").await.unwrap();
        store.remove("images/logo.png").await.unwrap();
        assert_eq!(store.get("images/logo.png").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_bucket_option() {
        let dir = tempfile::tempdir().unwrap();
        let factory = BlobFactory::new(dir.path());
        let options = Map::from_iter([("bucket".to_string(), json!("assets"))]);

        let BoundClient::Blob(store) = factory.create(&options).unwrap() else {
            panic!("expected a blob client");
        };
        store.put("a.txt", b"a").await.unwrap();

        assert!(dir.path().join("assets").join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_escaping_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirBlobStore::new(dir.path());

        let err = store.put("../outside", b"x").await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey { .. }));
    }
}
