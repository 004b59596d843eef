//! Async access to a blocking store session.
//!
//! RocksDB calls perform disk I/O and block the calling thread. From async
//! code they are run on Tokio's blocking thread pool with `spawn_blocking`.
//!
//! ## Usage
//!
//! ```ignore
//! let store = AsyncSession::new(Arc::new(session));
//! store.put(Some("users"), b"u:1".to_vec(), b"alice".to_vec()).await?;
//! let value = store.get(Some("users"), b"u:1".to_vec()).await?;
//! ```
//!
//! `spawn_blocking` costs a few microseconds per call; batch writes through
//! [`AsyncSession::write`] when issuing many mutations.

use std::sync::Arc;

use rocksdb::WriteBatch;

use super::error::{Result, StorageError};
use super::session::Session;

/// Run a blocking database operation on Tokio's blocking thread pool.
///
/// A panic inside `f` is reported as [`StorageErrorKind::Other`](super::StorageErrorKind::Other).
pub async fn spawn_db_op<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::other(format!("blocking task failed: {e}")))
}

/// Like [`spawn_db_op`] for operations that already return a storage `Result`.
pub async fn spawn_db_op_result<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_db_op(f).await?
}

/// Shared session whose calls run on the blocking pool.
#[derive(Clone)]
pub struct AsyncSession {
    inner: Arc<Session>,
}

impl AsyncSession {
    pub fn new(inner: Arc<Session>) -> Self {
        Self { inner }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner
    }

    /// Run an arbitrary blocking operation against the session
    pub async fn run<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.inner);
        spawn_db_op_result(move || f(&session)).await
    }

    pub async fn get(&self, family: Option<&str>, key: Vec<u8>) -> Result<Option<Vec<u8>>> {
        let family = family.map(str::to_owned);
        self.run(move |s| s.get(family.as_deref(), key)).await
    }

    pub async fn put(&self, family: Option<&str>, key: Vec<u8>, value: Vec<u8>) -> Result<()> {
        let family = family.map(str::to_owned);
        self.run(move |s| s.put(family.as_deref(), key, value)).await
    }

    pub async fn delete(&self, family: Option<&str>, key: Vec<u8>) -> Result<()> {
        let family = family.map(str::to_owned);
        self.run(move |s| s.delete(family.as_deref(), key)).await
    }

    pub async fn write(&self, batch: WriteBatch) -> Result<()> {
        self.run(move |s| s.write(batch)).await
    }

    pub async fn property(&self, family: Option<&str>, name: &str) -> Result<Option<String>> {
        let family = family.map(str::to_owned);
        let name = name.to_owned();
        self.run(move |s| s.property(family.as_deref(), &name)).await
    }
}
