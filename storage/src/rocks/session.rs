//! Store session: one open RocksDB handle and everything that hangs off it.
//!
//! A [`Session`] is bound to a directory and an [`AccessMode`]. It is
//! configured, opened once with [`Session::init`], used, and torn down with
//! [`Session::destroy`] (also run on drop). The session owns every native
//! resource it creates and releases them in dependency order:
//!
//! 1. cached iterators
//! 2. read options (if owned)
//! 3. write options (if owned)
//! 4. database options (if owned)
//! 5. column family handles
//! 6. the store handle
//!
//! Structural changes (option bundles, the family list, `init`, `destroy`)
//! take the write side of the session lock. Point operations take the read
//! side and run concurrently.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rocksdb::{ReadOptions, WriteBatch, WriteOptions, DB};
use tracing::{debug, info, warn};

use super::column_family::{
    descriptor_set, resolve_descriptors, DescriptorSet, FamilyDescriptor, DEFAULT_COLUMN_FAMILY,
};
use super::config::SessionConfig;
use super::engine;
use super::error::{Result, StorageError, StorageOperation, StorageResultExt};
use super::iterator::{IteratorCache, StoreIterator};
use super::options::{release_slot, replace_bundle, BundleKind, OptionBundle};

/// Property holding RocksDB's estimate of the number of keys in a family
pub const ESTIMATE_NUM_KEYS: &str = "rocksdb.estimate-num-keys";

/// How a session opens its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Existing store only; no write path at all
    ReadOnly,
    /// Store and missing column families are created on open
    ReadWrite,
}

impl AccessMode {
    pub fn is_read_only(&self) -> bool {
        matches!(self, AccessMode::ReadOnly)
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessMode::ReadOnly => write!(f, "read-only"),
            AccessMode::ReadWrite => write!(f, "read-write"),
        }
    }
}

#[derive(Default)]
struct SessionState {
    initialized: bool,
    destroyed: bool,
    descriptors: DescriptorSet,
    /// Families the open call returned a handle for
    open_families: BTreeSet<String>,
    db_options: Option<OptionBundle<rocksdb::Options>>,
    read_options: Option<OptionBundle<ReadOptions>>,
    /// Read bundle came from `set_read_options`, not from the config
    caller_read_options: bool,
    write_options: Option<OptionBundle<WriteOptions>>,
    db: Option<Arc<DB>>,
}

impl SessionState {
    fn db(&self, op: StorageOperation) -> Result<&Arc<DB>> {
        self.db.as_ref().ok_or_else(|| StorageError::not_ready(op))
    }

    fn cf_handle<'a>(&self, db: &'a DB, name: &str) -> Result<&'a rocksdb::ColumnFamily> {
        if !self.open_families.contains(name) {
            return Err(StorageError::cf_not_exists(name));
        }
        db.cf_handle(name)
            .ok_or_else(|| StorageError::cf_not_exists(name))
    }

    /// A caller-installed read bundle is active. Cached iterators do not see it.
    fn iterators_ignore_read_options(&self) -> bool {
        self.caller_read_options && self.read_options.is_some()
    }

    fn read_options<'a>(
        &'a self,
        overridden: Option<&'a ReadOptions>,
        op: StorageOperation,
    ) -> Result<&'a ReadOptions> {
        overridden
            .or(self.read_options.as_deref())
            .ok_or_else(|| {
                StorageError::invalid_configuration("no read options available").with_operation(op)
            })
    }

    fn write_options<'a>(
        &'a self,
        overridden: Option<&'a WriteOptions>,
        op: StorageOperation,
    ) -> Result<&'a WriteOptions> {
        overridden
            .or(self.write_options.as_deref())
            .ok_or_else(|| {
                StorageError::invalid_configuration("no write options available").with_operation(op)
            })
    }
}

/// Managed access to one RocksDB store.
pub struct Session {
    path: PathBuf,
    mode: AccessMode,
    config: SessionConfig,
    state: RwLock<SessionState>,
    iterators: IteratorCache,
}

impl Session {
    // =========================================================================
    // Construction
    // =========================================================================

    /// Create a session. Touches neither the filesystem nor the engine.
    pub fn new(path: impl AsRef<Path>, mode: AccessMode) -> Self {
        Self::with_config(path, mode, SessionConfig::default())
    }

    pub fn with_config(path: impl AsRef<Path>, mode: AccessMode, config: SessionConfig) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            mode,
            config,
            state: RwLock::new(SessionState::default()),
            iterators: IteratorCache::default(),
        }
    }

    pub fn read_only(path: impl AsRef<Path>) -> Self {
        Self::new(path, AccessMode::ReadOnly)
    }

    pub fn read_write(path: impl AsRef<Path>) -> Self {
        Self::new(path, AccessMode::ReadWrite)
    }

    /// Open an existing store read-only with default options.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let session = Self::read_only(path);
        session.init()?;
        Ok(session)
    }

    /// Open an existing store read-only with the given option bundles.
    pub fn open_read_only_with(
        path: impl AsRef<Path>,
        db_options: impl Into<OptionBundle<rocksdb::Options>>,
        read_options: impl Into<OptionBundle<ReadOptions>>,
    ) -> Result<Self> {
        let session = Self::read_only(path);
        session.set_db_options(db_options).set_read_options(read_options);
        session.init()?;
        Ok(session)
    }

    /// Open (creating if needed) a store read-write with default options.
    ///
    /// An empty family list opens whatever families the store already has.
    pub fn open_read_write<I, S>(path: impl AsRef<Path>, families: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let session = Self::read_write(path);
        session.set_column_families(families);
        session.init()?;
        Ok(session)
    }

    /// Open (creating if needed) a store read-write with the given bundles.
    pub fn open_read_write_with<I, S>(
        path: impl AsRef<Path>,
        db_options: impl Into<OptionBundle<rocksdb::Options>>,
        read_options: impl Into<OptionBundle<ReadOptions>>,
        write_options: impl Into<OptionBundle<WriteOptions>>,
        families: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let session = Self::read_write(path);
        session
            .set_db_options(db_options)
            .set_read_options(read_options)
            .set_write_options(write_options)
            .set_column_families(families);
        session.init()?;
        Ok(session)
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    /// Install the database option bundle, releasing an owned predecessor.
    ///
    /// Pass an `Arc` to keep ownership; pass the value to hand it over.
    pub fn set_db_options(&self, bundle: impl Into<OptionBundle<rocksdb::Options>>) -> &Self {
        let mut state = self.state.write();
        replace_bundle(&mut state.db_options, bundle.into(), BundleKind::Database);
        self
    }

    /// Install the default read option bundle, releasing an owned predecessor.
    pub fn set_read_options(&self, bundle: impl Into<OptionBundle<ReadOptions>>) -> &Self {
        let mut state = self.state.write();
        replace_bundle(&mut state.read_options, bundle.into(), BundleKind::Read);
        state.caller_read_options = true;
        self
    }

    /// Install the default write option bundle, releasing an owned predecessor.
    pub fn set_write_options(&self, bundle: impl Into<OptionBundle<WriteOptions>>) -> &Self {
        let mut state = self.state.write();
        replace_bundle(&mut state.write_options, bundle.into(), BundleKind::Write);
        self
    }

    /// Replace the column family list with default-option descriptors.
    pub fn set_column_families<I, S>(&self, names: I) -> &Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_column_family_descriptors(names.into_iter().map(FamilyDescriptor::new))
    }

    /// Replace the descriptor set.
    ///
    /// Handles opened for the previous set are released, along with any
    /// iterators over them.
    pub fn set_column_family_descriptors<I>(&self, descriptors: I) -> &Self
    where
        I: IntoIterator<Item = FamilyDescriptor>,
    {
        let mut state = self.state.write();
        let released = self.iterators.release_all();
        let previous = std::mem::take(&mut state.open_families);
        state.descriptors = descriptor_set(descriptors);
        debug!(
            families = ?state.descriptors.keys().collect::<Vec<_>>(),
            released_handles = previous.len(),
            released_iterators = released,
            "Replaced column family descriptors"
        );
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn is_read_only(&self) -> bool {
        self.mode.is_read_only()
    }

    pub fn is_initialized(&self) -> bool {
        let state = self.state.read_recursive();
        state.initialized && !state.destroyed
    }

    /// `Some(true)` if the session owns its database options, `None` if unset
    pub fn db_options_owned(&self) -> Option<bool> {
        self.state.read_recursive().db_options.as_ref().map(OptionBundle::is_owned)
    }

    pub fn read_options_owned(&self) -> Option<bool> {
        self.state.read_recursive().read_options.as_ref().map(OptionBundle::is_owned)
    }

    pub fn write_options_owned(&self) -> Option<bool> {
        self.state.read_recursive().write_options.as_ref().map(OptionBundle::is_owned)
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Open the store.
    ///
    /// A second call logs a warning and does nothing. The session is only
    /// marked initialized once every step succeeded; a session whose `init`
    /// failed should be discarded.
    #[tracing::instrument(skip(self), fields(path = %self.path.display(), mode = %self.mode))]
    pub fn init(&self) -> Result<()> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.destroyed {
            return Err(StorageError::invalid_configuration("store session was destroyed")
                .with_operation(StorageOperation::Open));
        }
        if state.initialized {
            warn!("Store session already initialized");
            return Ok(());
        }

        let engine = engine::global(&self.config);

        if self.mode == AccessMode::ReadWrite && !self.path.exists() {
            std::fs::create_dir_all(&self.path).with_operation(StorageOperation::Open)?;
            info!("Created store directory");
        }
        if !self.path.is_dir() {
            return Err(StorageError::invalid_configuration(format!(
                "{} does not exist, or is not a directory",
                self.path.display()
            ))
            .with_operation(StorageOperation::Open));
        }

        match state.db_options.as_deref() {
            Some(opts) => resolve_descriptors(&mut state.descriptors, &self.path, opts)?,
            None => resolve_descriptors(
                &mut state.descriptors,
                &self.path,
                &rocksdb::Options::default(),
            )?,
        }

        if state.db_options.is_none() {
            state.db_options = Some(OptionBundle::owned(
                self.config.to_db_options(self.mode, engine.block_cache()),
            ));
        }
        if state.read_options.is_none() {
            state.read_options = Some(OptionBundle::owned(self.config.read.to_read_options()));
        }
        if self.mode == AccessMode::ReadWrite && state.write_options.is_none() {
            state.write_options = Some(OptionBundle::owned(self.config.write.to_write_options()));
        }

        let db_opts = state.db_options.as_deref().ok_or_else(|| {
            StorageError::invalid_configuration("no database options available")
                .with_operation(StorageOperation::Open)
        })?;
        let cfs: Vec<_> = state.descriptors.values().map(FamilyDescriptor::to_rocksdb).collect();

        let db = match self.mode {
            AccessMode::ReadOnly => DB::open_cf_descriptors_read_only(
                db_opts,
                &self.path,
                cfs,
                self.config.error_if_log_file_exist,
            ),
            AccessMode::ReadWrite => DB::open_cf_descriptors(db_opts, &self.path, cfs),
        }
        .with_operation(StorageOperation::Open)?;

        state.open_families = state
            .descriptors
            .keys()
            .filter(|name| db.cf_handle(name).is_some())
            .cloned()
            .collect();
        state.db = Some(Arc::new(db));
        state.initialized = true;

        info!(
            families = ?state.open_families,
            db_options_owned = ?state.db_options.as_ref().map(OptionBundle::is_owned),
            "Store session opened"
        );
        Ok(())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Value stored under `key`, or `None`. A `None` family is the default one.
    pub fn get_opt(
        &self,
        family: Option<&str>,
        read_options: Option<&ReadOptions>,
        key: impl AsRef<[u8]>,
    ) -> Result<Option<Vec<u8>>> {
        let key = key.as_ref();
        let cf_name = family.unwrap_or(DEFAULT_COLUMN_FAMILY);
        let op = StorageOperation::Get;

        let state = self.state.read_recursive();
        let db = state.db(op)?;
        let cf = state.cf_handle(db, cf_name).with_operation(op)?;
        let opts = state.read_options(read_options, op)?;

        db.get_cf_opt(cf, key, opts).with_context(op, cf_name, key)
    }

    pub fn get(&self, family: Option<&str>, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        self.get_opt(family, None, key)
    }

    /// UTF-8 convenience over [`get`](Self::get)
    pub fn get_str(&self, family: Option<&str>, key: &str) -> Result<Option<String>> {
        self.get(family, key.as_bytes())?
            .map(|bytes| {
                String::from_utf8(bytes).map_err(|e| {
                    StorageError::invalid_data(e.to_string())
                        .with_operation(StorageOperation::Get)
                        .with_key(key)
                })
            })
            .transpose()
    }

    pub fn exists(&self, family: Option<&str>, key: impl AsRef<[u8]>) -> Result<bool> {
        Ok(self.get(family, key)?.is_some())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn ensure_writable(&self, op: StorageOperation) -> Result<()> {
        if self.mode.is_read_only() {
            return Err(StorageError::read_only(op));
        }
        Ok(())
    }

    /// Store `value` under `key`. A `None` value deletes the key.
    pub fn put_opt(
        &self,
        family: Option<&str>,
        write_options: Option<&WriteOptions>,
        key: impl AsRef<[u8]>,
        value: Option<&[u8]>,
    ) -> Result<()> {
        let op = StorageOperation::Put;
        self.ensure_writable(op)?;

        let Some(value) = value else {
            return self.delete_opt(family, write_options, key);
        };

        let key = key.as_ref();
        let cf_name = family.unwrap_or(DEFAULT_COLUMN_FAMILY);

        let state = self.state.read_recursive();
        let db = state.db(op)?;
        let cf = state.cf_handle(db, cf_name).with_operation(op)?;
        let opts = state.write_options(write_options, op)?;

        db.put_cf_opt(cf, key, value, opts).with_context(op, cf_name, key)
    }

    pub fn put(
        &self,
        family: Option<&str>,
        key: impl AsRef<[u8]>,
        value: impl AsRef<[u8]>,
    ) -> Result<()> {
        self.put_opt(family, None, key, Some(value.as_ref()))
    }

    /// UTF-8 convenience over [`put_opt`](Self::put_opt); `None` deletes.
    pub fn put_str(&self, family: Option<&str>, key: &str, value: Option<&str>) -> Result<()> {
        self.put_opt(family, None, key.as_bytes(), value.map(str::as_bytes))
    }

    pub fn delete_opt(
        &self,
        family: Option<&str>,
        write_options: Option<&WriteOptions>,
        key: impl AsRef<[u8]>,
    ) -> Result<()> {
        let op = StorageOperation::Delete;
        self.ensure_writable(op)?;

        let key = key.as_ref();
        let cf_name = family.unwrap_or(DEFAULT_COLUMN_FAMILY);

        let state = self.state.read_recursive();
        let db = state.db(op)?;
        let cf = state.cf_handle(db, cf_name).with_operation(op)?;
        let opts = state.write_options(write_options, op)?;

        db.delete_cf_opt(cf, key, opts).with_context(op, cf_name, key)
    }

    pub fn delete(&self, family: Option<&str>, key: impl AsRef<[u8]>) -> Result<()> {
        self.delete_opt(family, None, key)
    }

    /// Apply a batch atomically.
    pub fn write_opt(&self, write_options: Option<&WriteOptions>, batch: WriteBatch) -> Result<()> {
        let op = StorageOperation::BatchWrite;
        self.ensure_writable(op)?;

        let state = self.state.read_recursive();
        let db = state.db(op)?;
        let opts = state.write_options(write_options, op)?;

        db.write_opt(batch, opts).with_operation(op)
    }

    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.write_opt(None, batch)
    }

    /// Run `f` with the handle of `family`, e.g. to fill a [`WriteBatch`].
    pub fn with_cf<R>(
        &self,
        family: Option<&str>,
        f: impl FnOnce(&rocksdb::ColumnFamily) -> R,
    ) -> Result<R> {
        let cf_name = family.unwrap_or(DEFAULT_COLUMN_FAMILY);
        let state = self.state.read_recursive();
        let db = state.db(StorageOperation::ColumnFamily)?;
        let cf = state.cf_handle(db, cf_name)?;
        Ok(f(cf))
    }

    // =========================================================================
    // Column families & maintenance
    // =========================================================================

    /// Copy of the configured descriptor set
    pub fn column_families(&self) -> Vec<FamilyDescriptor> {
        self.state.read_recursive().descriptors.values().cloned().collect()
    }

    pub fn column_family_names(&self) -> BTreeSet<String> {
        self.state.read_recursive().descriptors.keys().cloned().collect()
    }

    /// Families with an open handle
    pub fn opened_column_families(&self) -> BTreeSet<String> {
        self.state.read_recursive().open_families.clone()
    }

    pub fn has_column_family(&self, name: &str) -> bool {
        self.state.read_recursive().open_families.contains(name)
    }

    /// Engine property of a family, passed through verbatim.
    ///
    /// Properties the engine does not know yield `None`.
    pub fn property(&self, family: Option<&str>, name: &str) -> Result<Option<String>> {
        let op = StorageOperation::Property;
        let cf_name = family.unwrap_or(DEFAULT_COLUMN_FAMILY);

        let state = self.state.read_recursive();
        let db = state.db(op)?;
        let cf = state.cf_handle(db, cf_name).with_operation(op)?;

        db.property_value_cf(cf, name)
            .with_operation(op)
            .with_cf(cf_name)
    }

    /// Estimated number of keys in a family, 0 when the engine has no estimate.
    pub fn estimate_num_keys(&self, family: Option<&str>) -> Result<u64> {
        match self.property(family, ESTIMATE_NUM_KEYS)? {
            Some(value) => value.trim().parse().map_err(|_| {
                StorageError::invalid_data(format!("{ESTIMATE_NUM_KEYS} is not a number: {value}"))
                    .with_operation(StorageOperation::Property)
            }),
            None => Ok(0),
        }
    }

    /// Compact the full key range of every open family.
    pub fn compact_range(&self) -> Result<()> {
        let op = StorageOperation::Compact;
        self.ensure_writable(op)?;

        let state = self.state.read_recursive();
        let db = state.db(op)?;
        for name in &state.open_families {
            let cf = state.cf_handle(db, name).with_operation(op)?;
            db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
            debug!(cf = %name, "Compacted column family");
        }
        Ok(())
    }

    /// Compact the full key range of one family.
    pub fn compact_family(&self, family: Option<&str>) -> Result<()> {
        let op = StorageOperation::Compact;
        self.ensure_writable(op)?;

        let cf_name = family.unwrap_or(DEFAULT_COLUMN_FAMILY);
        let state = self.state.read_recursive();
        let db = state.db(op)?;
        let cf = state.cf_handle(db, cf_name).with_operation(op)?;
        db.compact_range_cf(cf, None::<&[u8]>, None::<&[u8]>);
        Ok(())
    }

    /// Flush the memtables of every open family.
    pub fn flush(&self) -> Result<()> {
        let op = StorageOperation::Flush;
        self.ensure_writable(op)?;

        let state = self.state.read_recursive();
        let db = state.db(op)?;
        for name in &state.open_families {
            let cf = state.cf_handle(db, name).with_operation(op)?;
            db.flush_cf(cf).with_operation(op).with_cf(name.as_str())?;
        }
        Ok(())
    }

    // =========================================================================
    // Iterators
    // =========================================================================

    /// Run `f` with the cached iterator of `family`, creating it on first use.
    ///
    /// Returns `Ok(None)` when the family has no open handle. The iterator
    /// stays owned by the session and is built from [`SessionConfig::read`],
    /// not from a bundle installed with [`set_read_options`](Self::set_read_options).
    ///
    /// `f` runs with the session lock held for reading and the family's
    /// iterator locked. Calling any of these from inside `f` deadlocks:
    /// - `with_iterator` for the same family
    /// - `set_db_options`, `set_read_options`, `set_write_options`
    /// - `set_column_families`, `set_column_family_descriptors`
    /// - `init`, `destroy`
    ///
    /// Point reads and writes, introspection and iterators over other
    /// families are fine.
    pub fn with_iterator<R, F>(&self, family: Option<&str>, f: F) -> Result<Option<R>>
    where
        F: FnOnce(&mut StoreIterator) -> R,
    {
        let cf_name = family.unwrap_or(DEFAULT_COLUMN_FAMILY);

        let state = self.state.read_recursive();
        let db = state.db(StorageOperation::Iterate)?;

        let cached = self.iterators.get_or_open(cf_name, || {
            let cf = state.cf_handle(db, cf_name).ok()?;
            if state.iterators_ignore_read_options() {
                warn!(
                    cf = cf_name,
                    "Caller-installed read options do not apply to iterators; using configured read settings"
                );
            }
            Some(StoreIterator::open(db, cf, cf_name, self.config.read.to_read_options()))
        });

        let Some(it) = cached else {
            debug!(cf = cf_name, "No column family for iterator");
            return Ok(None);
        };
        let mut it = it.lock();
        Ok(Some(f(&mut it)))
    }

    pub fn cached_iterator_count(&self) -> usize {
        self.iterators.len()
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release every resource the session owns. Safe to call repeatedly,
    /// before `init`, or after a failed `init`; never fails.
    pub fn destroy(&self) {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.destroyed {
            debug!(path = %self.path.display(), "Store session already destroyed");
            return;
        }
        state.destroyed = true;

        let iterators = self.iterators.release_all();
        debug!(count = iterators, "Released cached iterators");

        release_slot(&mut state.read_options, BundleKind::Read);
        state.caller_read_options = false;
        release_slot(&mut state.write_options, BundleKind::Write);
        release_slot(&mut state.db_options, BundleKind::Database);

        let families = std::mem::take(&mut state.open_families);
        debug!(count = families.len(), "Released column family handles");

        if let Some(db) = state.db.take() {
            if Arc::strong_count(&db) > 1 {
                warn!(path = %self.path.display(), "Store handle still referenced at close");
            }
            drop(db);
            info!(path = %self.path.display(), "Store session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read_recursive();
        f.debug_struct("Session")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("initialized", &state.initialized)
            .field("destroyed", &state.destroyed)
            .field("families", &state.open_families)
            .finish()
    }
}
