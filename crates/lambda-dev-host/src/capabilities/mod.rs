//! Reference capability backends.
//!
//! - [`kv`]: SQLite-backed key-value storage
//! - [`blob`]: Directory-backed object storage
//! - [`fs`]: Virtual filesystem confined to a directory
//! - [`log`]: Guest logging through `tracing`

pub mod blob;
pub mod fs;
pub mod kv;
pub mod log;

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use lambda_dev_common::{StorageConfig, StorageError};
use lambda_dev_core::CapabilityBinder;

pub use blob::{BlobFactory, DirBlobStore};
pub use fs::{FsFactory, RootedFs};
pub use kv::{KvClient, KvFactory, SqliteKv, WriteMode};
pub use log::{LogFactory, TracingLog};

/// A binder with every reference backend, storing data below `storage`.
pub fn binder(storage: &StorageConfig) -> CapabilityBinder {
    CapabilityBinder::new()
        .with_factory(Arc::new(KvFactory::new(storage.kv_dir())))
        .with_factory(Arc::new(BlobFactory::new(storage.blob_dir())))
        .with_factory(Arc::new(FsFactory::new(storage.fs_dir())))
        .with_factory(Arc::new(LogFactory))
}

/// Join a guest-supplied relative `key` onto `root`.
///
/// Rejects empty keys and keys that are absolute or contain `..`.
pub(crate) fn resolve(root: &Path, key: &str) -> Result<PathBuf, StorageError> {
    let invalid = || StorageError::InvalidKey {
        key: key.to_string(),
    };

    let mut path = root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(key).components() {
        match component {
            Component::Normal(part) => {
                path.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            _ => return Err(invalid()),
        }
    }

    if depth == 0 {
        return Err(invalid());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let root = Path::new("/srv/data");

        assert_eq!(resolve(root, "a/b.txt").unwrap(), root.join("a").join("b.txt"));
        assert_eq!(resolve(root, "./a").unwrap(), root.join("a"));
        assert!(resolve(root, "").is_err());
        assert!(resolve(root, ".").is_err());
        assert!(resolve(root, "../x").is_err());
        assert!(resolve(root, "a/../../x").is_err());
        assert!(resolve(root, "/etc/passwd").is_err());
    }

    #[test]
    fn test_binder_has_every_backend() {
        let dir = tempfile::tempdir().unwrap();
        let storage = StorageConfig {
            root: dir.path().to_path_buf(),
        };
        let config = lambda_dev_common::CapabilitiesConfig {
            kv: lambda_dev_common::CapabilityConfig::enabled(),
            blob: lambda_dev_common::CapabilityConfig::enabled(),
            fs: lambda_dev_common::CapabilityConfig::enabled(),
            log: lambda_dev_common::CapabilityConfig::enabled(),
        };

        let bindings = binder(&storage).bind(&config).unwrap();
        assert_eq!(bindings.names(), vec!["kv", "blob", "fs", "log"]);
    }
}
