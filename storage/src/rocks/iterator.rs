//! Cached per-family iterators.
//!
//! A session keeps at most one raw iterator per column family. Iterators are
//! only lent out for a scoped traversal; the session is the one that drops
//! them, before anything they depend on.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rocksdb::{DBRawIterator, DB};
use tracing::debug;

use super::error::{Result, StorageOperation, StorageResultExt};

/// Raw iterator over one column family, owned by a session.
pub struct StoreIterator {
    family: String,
    // Declared before `_db`: the iterator is dropped first.
    inner: DBRawIterator<'static>,
    _db: Arc<DB>,
}

// SAFETY: the native iterator has no thread affinity; the cache only hands it
// out behind a mutex, so it is never used from two threads at once.
unsafe impl Send for StoreIterator {}

impl StoreIterator {
    pub(crate) fn open(
        db: &Arc<DB>,
        cf: &rocksdb::ColumnFamily,
        family: &str,
        read_opts: rocksdb::ReadOptions,
    ) -> Self {
        let iter = db.raw_iterator_cf_opt(cf, read_opts);
        // SAFETY: the iterator only borrows the database, which `_db` keeps
        // alive for as long as this struct exists. Field order guarantees the
        // iterator is dropped before that reference.
        let inner = unsafe { std::mem::transmute::<DBRawIterator<'_>, DBRawIterator<'static>>(iter) };
        Self {
            family: family.to_string(),
            inner,
            _db: Arc::clone(db),
        }
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    pub fn valid(&self) -> bool {
        self.inner.valid()
    }

    pub fn seek_to_first(&mut self) {
        self.inner.seek_to_first();
    }

    pub fn seek_to_last(&mut self) {
        self.inner.seek_to_last();
    }

    /// Position at the first key at or after `key`
    pub fn seek(&mut self, key: impl AsRef<[u8]>) {
        self.inner.seek(key);
    }

    /// Position at the last key at or before `key`
    pub fn seek_for_prev(&mut self, key: impl AsRef<[u8]>) {
        self.inner.seek_for_prev(key);
    }

    pub fn next(&mut self) {
        self.inner.next();
    }

    pub fn prev(&mut self) {
        self.inner.prev();
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.inner.key()
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.inner.value()
    }

    /// Error the iterator stopped on, if any
    pub fn status(&self) -> Result<()> {
        self.inner
            .status()
            .with_operation(StorageOperation::Iterate)
            .with_cf(self.family.as_str())
    }

    /// Every entry from the first key on, leaving the iterator exhausted.
    pub fn entries(&mut self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        self.inner.seek_to_first();
        while let Some((k, v)) = self.inner.item() {
            out.push((k.to_vec(), v.to_vec()));
            self.inner.next();
        }
        self.status()?;
        Ok(out)
    }
}

/// Iterator cache keyed by column family name.
#[derive(Default)]
pub(crate) struct IteratorCache {
    iterators: Mutex<HashMap<String, Arc<Mutex<StoreIterator>>>>,
}

impl IteratorCache {
    /// Cached iterator for `family`, or the one `open` creates.
    ///
    /// Runs under the cache lock, so concurrent callers for the same family
    /// never create two iterators. `open` returning `None` caches nothing.
    pub(crate) fn get_or_open<F>(&self, family: &str, open: F) -> Option<Arc<Mutex<StoreIterator>>>
    where
        F: FnOnce() -> Option<StoreIterator>,
    {
        let mut iterators = self.iterators.lock();
        if let Some(it) = iterators.get(family) {
            return Some(Arc::clone(it));
        }

        let it = Arc::new(Mutex::new(open()?));
        debug!(cf = family, "Created cached iterator");
        iterators.insert(family.to_string(), Arc::clone(&it));
        Some(it)
    }

    pub(crate) fn len(&self) -> usize {
        self.iterators.lock().len()
    }

    /// Drop every cached iterator, returning how many were released.
    pub(crate) fn release_all(&self) -> usize {
        let drained: Vec<_> = self.iterators.lock().drain().collect();
        let count = drained.len();
        for (family, it) in drained {
            if Arc::strong_count(&it) > 1 {
                tracing::warn!(cf = %family, "Iterator still referenced at release");
            }
            drop(it);
        }
        count
    }
}
