//! SQLite-backed key-value capability.
//!
//! Values are stored as JSON text, one row per key. The database handle is
//! opened once per [`KvFactory`]; every sandbox built afterwards shares it, so
//! data written before a rebuild is still there after it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use lambda_dev_common::{LambdaError, StorageError};
use lambda_dev_core::{BoundClient, CapabilityFactory, CapabilityKind, KeyValue};

/// Database file created inside the KV directory.
pub const DATABASE_FILE: &str = "kv.sqlite3";

/// What `set` and `remove` do when the backend fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Log the failure and report success.
    #[default]
    Lenient,
    /// Report the failure to the caller.
    Strict,
}

impl WriteMode {
    /// Read `writeMode` from the capability options.
    pub fn from_options(options: &Map<String, Value>) -> Self {
        match options.get("writeMode").and_then(Value::as_str) {
            Some("strict") => Self::Strict,
            _ => Self::Lenient,
        }
    }
}

/// A SQLite database holding JSON values.
#[derive(Clone)]
pub struct SqliteKv {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteKv {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the file cannot be opened or the table
    /// cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path).map_err(|e| StorageError::backend("open", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| StorageError::backend("open", e))?;

        info!(path = %path.display(), "KV store opened");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the raw JSON text stored under `key`.
    pub async fn get_raw(&self, key: &str) -> Result<Option<String>, StorageError> {
        let key = key.to_string();
        self.blocking("get", move |conn| {
            conn.query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()
        })
        .await
    }

    /// Store raw JSON text under `key`.
    pub async fn set_raw(&self, key: &str, value: String) -> Result<(), StorageError> {
        let key = key.to_string();
        self.blocking("set", move |conn| {
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map(|_| ())
        })
        .await
    }

    /// Delete `key`. Deleting a missing key is not an error.
    pub async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_string();
        self.blocking("remove", move |conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map(|_| ())
        })
        .await
    }

    async fn blocking<R, F>(&self, operation: &'static str, f: F) -> Result<R, StorageError>
    where
        R: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| StorageError::backend(operation, e))?
            .map_err(|e| StorageError::backend(operation, e))
    }
}

impl std::fmt::Debug for SqliteKv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteKv").field("path", &self.path).finish()
    }
}

/// The key-value client bound into a sandbox.
#[derive(Debug, Clone)]
pub struct KvClient {
    store: SqliteKv,
    mode: WriteMode,
}

impl KvClient {
    /// A client over `store`.
    pub fn new(store: SqliteKv, mode: WriteMode) -> Self {
        Self { store, mode }
    }

    /// The write mode of this client.
    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    fn settle(
        &self,
        operation: &str,
        key: &str,
        result: Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        match (result, self.mode) {
            (Ok(()), _) => Ok(()),
            (Err(e), WriteMode::Lenient) => {
                warn!(operation, key, error = %e, "KV write failed");
                Ok(())
            }
            (Err(e), WriteMode::Strict) => Err(e),
        }
    }
}

#[async_trait]
impl KeyValue for KvClient {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        match self.store.get_raw(key).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        let text = serde_json::to_string(value)?;
        let result = self.store.set_raw(key, text).await;
        self.settle("set", key, result)
    }

    async fn remove(&self, key: &str) -> Result<(), StorageError> {
        let result = self.store.delete(key).await;
        self.settle("remove", key, result)
    }
}

/// Constructs [`KvClient`]s over a database in `dir`.
///
/// The first construction opens the database; later constructions reuse the
/// handle even if the options changed.
pub struct KvFactory {
    dir: PathBuf,
    handle: Mutex<Option<SqliteKv>>,
}

impl KvFactory {
    /// A factory keeping its database in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            handle: Mutex::new(None),
        }
    }

    fn handle(&self) -> Result<SqliteKv, StorageError> {
        let mut handle = self.handle.lock();
        if let Some(store) = handle.as_ref() {
            return Ok(store.clone());
        }
        let store = SqliteKv::open(self.dir.join(DATABASE_FILE))?;
        *handle = Some(store.clone());
        Ok(store)
    }
}

impl CapabilityFactory for KvFactory {
    fn kind(&self) -> CapabilityKind {
        CapabilityKind::Kv
    }

    fn create(&self, options: &Map<String, Value>) -> Result<BoundClient, LambdaError> {
        let mode = WriteMode::from_options(options);
        let store = self.handle()?;
        debug!(path = %store.path().display(), mode = ?mode, "KV client created");
        Ok(BoundClient::Kv(Arc::new(KvClient::new(store, mode))))
    }
}

impl std::fmt::Debug for KvFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KvFactory")
            .field("dir", &self.dir)
            .field("open", &self.handle.lock().is_some())
            .finish()
    }
}
