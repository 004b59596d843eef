//! Managed access to an embedded RocksDB store.
//!
//! A [`Session`] opens a store read-only or read-write, discovers its column
//! families, and releases every native resource it created exactly once.

pub mod rocks;

pub use rocks::{
    AccessMode, AsyncSession, FamilyDescriptor, OptionBundle, ReadSettings, Session,
    SessionConfig, StorageError, StorageErrorKind, StorageOperation, StoreIterator,
    WriteSettings, DEFAULT_COLUMN_FAMILY,
};

/// Re-export of the engine crate, for building option bundles and write batches
pub use rocksdb;
