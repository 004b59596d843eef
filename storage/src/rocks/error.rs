//! Storage error types with context for debugging and error handling.
//!
//! Every failure surfaced by a [`Session`](super::Session) is a [`StorageError`]
//! whose [`StorageErrorKind`] tells callers what went wrong:
//! - `ColumnFamilyNotExists`: the requested family has no open handle
//! - `ReadOnly`: a mutation was attempted on a read-only session
//! - `InvalidConfiguration`: bad directory, missing options, unusable session
//! - `RocksDB` / `Io`: wrapped engine or filesystem failures (source preserved)
//!
//! ## Usage
//!
//! ```ignore
//! use rain_storage::rocks::{StorageError, StorageOperation};
//!
//! let err = StorageError::rocksdb(rocks_err)
//!     .with_operation(StorageOperation::Get)
//!     .with_key("user:123")
//!     .with_cf("users");
//! ```

use std::fmt;
use thiserror::Error;

/// The type of storage operation that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    Get,
    Put,
    Delete,
    BatchWrite,
    Iterate,
    Open,
    /// Listing column families from on-disk metadata
    ListColumnFamilies,
    /// Column family handle lookup
    ColumnFamily,
    Property,
    Flush,
    Compact,
    Other,
}

impl fmt::Display for StorageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageOperation::Get => write!(f, "get"),
            StorageOperation::Put => write!(f, "put"),
            StorageOperation::Delete => write!(f, "delete"),
            StorageOperation::BatchWrite => write!(f, "write"),
            StorageOperation::Iterate => write!(f, "iterate"),
            StorageOperation::Open => write!(f, "open"),
            StorageOperation::ListColumnFamilies => write!(f, "list_cf"),
            StorageOperation::ColumnFamily => write!(f, "column_family"),
            StorageOperation::Property => write!(f, "property"),
            StorageOperation::Flush => write!(f, "flush"),
            StorageOperation::Compact => write!(f, "compact"),
            StorageOperation::Other => write!(f, "other"),
        }
    }
}

/// The underlying cause of a storage error
#[derive(Error, Debug)]
pub enum StorageErrorKind {
    #[error("Column family does not exist: {}", .0.as_deref().unwrap_or("<unknown>"))]
    ColumnFamilyNotExists(Option<String>),

    #[error("Operation '{0}' is not allowed on a read-only store")]
    ReadOnly(StorageOperation),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("RocksDB error: {0}")]
    RocksDB(#[from] rocksdb::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("{0}")]
    Other(String),
}

/// Storage error with context information
#[derive(Debug)]
pub struct StorageError {
    pub kind: StorageErrorKind,
    /// The operation that failed (optional)
    pub operation: Option<StorageOperation>,
    /// The key involved (optional, truncated for display)
    pub key: Option<String>,
    /// The column family involved (optional)
    pub column_family: Option<String>,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind) -> Self {
        Self {
            kind,
            operation: None,
            key: None,
            column_family: None,
        }
    }

    // =========================================================================
    // Convenience constructors
    // =========================================================================

    /// Wrap a RocksDB error
    pub fn rocksdb(err: rocksdb::Error) -> Self {
        Self::new(StorageErrorKind::RocksDB(err))
    }

    /// Column family not found, carrying the offending name
    pub fn cf_not_exists(cf_name: impl Into<String>) -> Self {
        let name = cf_name.into();
        Self::new(StorageErrorKind::ColumnFamilyNotExists(Some(name.clone()))).with_cf(name)
    }

    /// Mutation attempted on a read-only session
    pub fn read_only(op: StorageOperation) -> Self {
        Self::new(StorageErrorKind::ReadOnly(op)).with_operation(op)
    }

    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::InvalidConfiguration(msg.into()))
    }

    /// The session has not been initialized (or was already destroyed)
    pub fn not_ready(op: StorageOperation) -> Self {
        Self::invalid_configuration("store session is not initialized").with_operation(op)
    }

    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::InvalidData(msg.into()))
    }

    pub fn io(err: std::io::Error) -> Self {
        Self::new(StorageErrorKind::Io(err))
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::new(StorageErrorKind::Other(msg.into()))
    }

    // =========================================================================
    // Context builders (fluent API)
    // =========================================================================

    pub fn with_operation(mut self, op: StorageOperation) -> Self {
        self.operation = Some(op);
        self
    }

    /// Add key context (long keys are truncated)
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(truncate_key(key.into()));
        self
    }

    /// Add key context from bytes, hex-encoded when not valid UTF-8
    pub fn with_key_bytes(mut self, key: &[u8]) -> Self {
        let k = match std::str::from_utf8(key) {
            Ok(s) => s.to_string(),
            Err(_) if key.len() <= 32 => hex::encode(key),
            Err(_) => format!("{}...", hex::encode(&key[..29])),
        };
        self.key = Some(truncate_key(k));
        self
    }

    pub fn with_cf(mut self, cf: impl Into<String>) -> Self {
        self.column_family = Some(cf.into());
        self
    }

    // =========================================================================
    // Query methods
    // =========================================================================

    pub fn is_column_family_not_exists(&self) -> bool {
        matches!(self.kind, StorageErrorKind::ColumnFamilyNotExists(_))
    }

    /// Name of the missing column family, when known
    pub fn missing_column_family(&self) -> Option<&str> {
        match &self.kind {
            StorageErrorKind::ColumnFamilyNotExists(name) => name.as_deref(),
            _ => None,
        }
    }

    pub fn is_read_only_violation(&self) -> bool {
        matches!(self.kind, StorageErrorKind::ReadOnly(_))
    }

    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self.kind, StorageErrorKind::InvalidConfiguration(_))
    }

    pub fn is_rocksdb_error(&self) -> bool {
        matches!(self.kind, StorageErrorKind::RocksDB(_))
    }

    pub fn is_io_error(&self) -> bool {
        matches!(self.kind, StorageErrorKind::Io(_))
    }

    /// Brief error code for logging
    pub fn error_code(&self) -> &'static str {
        match &self.kind {
            StorageErrorKind::ColumnFamilyNotExists(_) => "CF_NOT_EXISTS",
            StorageErrorKind::ReadOnly(_) => "READ_ONLY",
            StorageErrorKind::InvalidConfiguration(_) => "INVALID_CONFIG",
            StorageErrorKind::RocksDB(_) => "ROCKS_DB",
            StorageErrorKind::Io(_) => "IO_ERROR",
            StorageErrorKind::InvalidData(_) => "INVALID_DATA",
            StorageErrorKind::Other(_) => "OTHER",
        }
    }
}

fn truncate_key(k: String) -> String {
    if k.len() > 64 {
        let mut end = 61;
        while !k.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &k[..end])
    } else {
        k
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut context_parts = Vec::new();

        if let Some(op) = &self.operation {
            context_parts.push(format!("op={}", op));
        }
        if let Some(cf) = &self.column_family {
            context_parts.push(format!("cf={}", cf));
        }
        if let Some(key) = &self.key {
            context_parts.push(format!("key={}", key));
        }

        if context_parts.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{} [{}]", self.kind, context_parts.join(", "))
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            StorageErrorKind::RocksDB(e) => Some(e),
            StorageErrorKind::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rocksdb::Error> for StorageError {
    fn from(e: rocksdb::Error) -> Self {
        Self::rocksdb(e)
    }
}

impl From<std::io::Error> for StorageError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e)
    }
}

impl From<StorageErrorKind> for StorageError {
    fn from(kind: StorageErrorKind) -> Self {
        Self::new(kind)
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Extension trait for adding context to storage results
pub trait StorageResultExt<T> {
    fn with_operation(self, op: StorageOperation) -> Result<T>;

    fn with_key_bytes(self, key: &[u8]) -> Result<T>;

    fn with_cf(self, cf: impl Into<String>) -> Result<T>;

    /// Operation, column family and key in one call
    fn with_context(self, op: StorageOperation, cf: impl Into<String>, key: &[u8]) -> Result<T>;
}

impl<T, E> StorageResultExt<T> for std::result::Result<T, E>
where
    E: Into<StorageError>,
{
    fn with_operation(self, op: StorageOperation) -> Result<T> {
        self.map_err(|e| e.into().with_operation(op))
    }

    fn with_key_bytes(self, key: &[u8]) -> Result<T> {
        self.map_err(|e| e.into().with_key_bytes(key))
    }

    fn with_cf(self, cf: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_cf(cf))
    }

    fn with_context(self, op: StorageOperation, cf: impl Into<String>, key: &[u8]) -> Result<T> {
        self.map_err(|e| e.into().with_operation(op).with_cf(cf).with_key_bytes(key))
    }
}
