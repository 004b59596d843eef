//! RocksDB store session infrastructure
//!
//! - `Session`: one open store with column families, option bundles and cached iterators
//! - `OptionBundle`: native options tagged as owned by the session or borrowed from the caller
//! - `FamilyDescriptor`: column family name and options
//! - `SessionConfig`: defaults for the bundles a session builds itself
//! - `StorageError`: error kinds with operation/key/family context
//! - `AsyncSession`: session calls on Tokio's blocking pool

pub mod async_wrapper;
pub mod column_family;
pub mod config;
pub mod engine;
pub mod error;
pub mod iterator;
pub mod options;
pub mod session;

pub use async_wrapper::{spawn_db_op, spawn_db_op_result, AsyncSession};
pub use column_family::{list_persisted, FamilyDescriptor, DEFAULT_COLUMN_FAMILY};
pub use config::{ReadSettings, SessionConfig, WriteSettings};
pub use error::{Result, StorageError, StorageErrorKind, StorageOperation, StorageResultExt};
pub use iterator::StoreIterator;
pub use options::{BundleKind, OptionBundle};
pub use session::{AccessMode, Session, ESTIMATE_NUM_KEYS};
