//! `RocksDB` storage backend, the production default.
//!
//! Every call is moved onto the Tokio blocking pool with
//! [`tokio::task::spawn_blocking`] because `RocksDB` is a synchronous C++
//! library. Batches map onto a native `WriteBatch`, so a batch either lands
//! completely or not at all.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rocksdb::{DBWithThreadMode, Direction, IteratorMode, MultiThreaded, Options, WriteBatch};

use crate::{BatchOp, StorageBackend, StorageError};

type Db = DBWithThreadMode<MultiThreaded>;

/// A storage backend backed by `RocksDB`.
///
/// # Examples
///
/// ```no_run
/// # use vaultmesh_storage::RocksDbBackend;
/// let backend = RocksDbBackend::open("/var/lib/vaultmesh/db").unwrap();
/// ```
#[derive(Clone)]
pub struct RocksDbBackend {
    db: Arc<Db>,
    path: PathBuf,
}

impl std::fmt::Debug for RocksDbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksDbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RocksDbBackend {
    /// Open a `RocksDB` database at the given path, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if `RocksDB` fails to open or create the
    /// database at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let mut opts = Options::default();
        opts.create_if_missing(true);

        let db = Db::open(&opts, path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        tracing::debug!(path = %path.display(), "rocksdb opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Return the filesystem path of this database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the database on the blocking pool.
    ///
    /// `on_join` builds the error reported when the blocking task itself
    /// panics or is cancelled.
    async fn blocking<T, F, E>(&self, f: F, on_join: E) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Db) -> Result<T, StorageError> + Send + 'static,
        E: FnOnce(String) -> StorageError,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| on_join(format!("blocking task failed: {e}")))?
    }
}

/// Collect `(key, value)` pairs under `prefix`, stopping at the first key
/// outside it.
fn scan_prefix(db: &Db, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
    let mut entries = Vec::new();
    for item in db.iterator(IteratorMode::From(prefix.as_bytes(), Direction::Forward)) {
        let (k, v) = item.map_err(|e| StorageError::List {
            prefix: prefix.to_owned(),
            reason: e.to_string(),
        })?;
        let key = String::from_utf8(k.to_vec()).map_err(|e| StorageError::InvalidKey {
            reason: e.to_string(),
        })?;
        if !key.starts_with(prefix) {
            break;
        }
        entries.push((key, v.to_vec()));
    }
    Ok(entries)
}

#[async_trait::async_trait]
impl StorageBackend for RocksDbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let key = key.to_owned();
        let join_key = key.clone();
        self.blocking(
            move |db| {
                db.get(key.as_bytes()).map_err(|e| StorageError::Read {
                    key,
                    reason: e.to_string(),
                })
            },
            |reason| StorageError::Read {
                key: join_key,
                reason,
            },
        )
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let key = key.to_owned();
        let join_key = key.clone();
        let value = value.to_vec();
        self.blocking(
            move |db| {
                db.put(key.as_bytes(), &value)
                    .map_err(|e| StorageError::Write {
                        key,
                        reason: e.to_string(),
                    })
            },
            |reason| StorageError::Write {
                key: join_key,
                reason,
            },
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let key = key.to_owned();
        let join_key = key.clone();
        self.blocking(
            move |db| {
                db.delete(key.as_bytes()).map_err(|e| StorageError::Delete {
                    key,
                    reason: e.to_string(),
                })
            },
            |reason| StorageError::Delete {
                key: join_key,
                reason,
            },
        )
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.scan(prefix).await?;
        Ok(entries.into_iter().map(|(k, _)| k).collect())
    }

    async fn batch(&self, ops: Vec<BatchOp>) -> Result<(), StorageError> {
        let count = ops.len();
        self.blocking(
            move |db| {
                let mut batch = WriteBatch::default();
                for op in &ops {
                    match op {
                        BatchOp::Put { key, value } => batch.put(key.as_bytes(), value),
                        BatchOp::Delete { key } => batch.delete(key.as_bytes()),
                    }
                }
                db.write(batch).map_err(|e| StorageError::Transaction {
                    ops: count,
                    reason: e.to_string(),
                })
            },
            |reason| StorageError::Transaction { ops: count, reason },
        )
        .await
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StorageError> {
        let prefix = prefix.to_owned();
        let join_prefix = prefix.clone();
        self.blocking(
            move |db| scan_prefix(db, &prefix),
            |reason| StorageError::List {
                prefix: join_prefix,
                reason,
            },
        )
        .await
    }
}
