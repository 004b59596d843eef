use serde::{Deserialize, Serialize};

use super::session::AccessMode;

/// Configuration for a store session.
///
/// Only consulted for the option bundles the session builds itself; bundles
/// installed by the caller are used as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of open files (-1 keeps every file open)
    pub max_open_files: i32,

    /// Size of write buffer in bytes (default: 64MB)
    pub write_buffer_size: usize,

    /// Maximum number of write buffers (default: 3)
    pub max_write_buffer_number: i32,

    /// Target file size for level-1 (default: 64MB)
    pub target_file_size_base: u64,

    /// Process-wide block cache size (default: 128MB). Only the first
    /// session opened in the process sizes the cache.
    pub block_cache_size: usize,

    pub enable_statistics: bool,

    /// Fail a read-only open when a WAL file is present
    pub error_if_log_file_exist: bool,

    pub read: ReadSettings,

    pub write: WriteSettings,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_open_files: 1000,
            write_buffer_size: 64 * 1024 * 1024,  // 64MB
            max_write_buffer_number: 3,
            target_file_size_base: 64 * 1024 * 1024,  // 64MB
            block_cache_size: 128 * 1024 * 1024,  // 128MB
            enable_statistics: false,
            error_if_log_file_exist: false,
            read: ReadSettings::default(),
            write: WriteSettings::default(),
        }
    }
}

impl SessionConfig {
    /// Load configuration from `RAIN_ROCKS_*` environment variables,
    /// falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &dyn Fn(&str) -> Option<String>,
            name: &str,
            default: T,
        ) -> T {
            lookup(name)
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(default)
        }

        let d = Self::default();
        Self {
            max_open_files: parsed(&lookup, "RAIN_ROCKS_MAX_OPEN_FILES", d.max_open_files),
            write_buffer_size: parsed(&lookup, "RAIN_ROCKS_WRITE_BUFFER_SIZE", d.write_buffer_size),
            max_write_buffer_number: parsed(
                &lookup,
                "RAIN_ROCKS_MAX_WRITE_BUFFER_NUMBER",
                d.max_write_buffer_number,
            ),
            target_file_size_base: parsed(
                &lookup,
                "RAIN_ROCKS_TARGET_FILE_SIZE_BASE",
                d.target_file_size_base,
            ),
            block_cache_size: parsed(&lookup, "RAIN_ROCKS_BLOCK_CACHE_SIZE", d.block_cache_size),
            enable_statistics: parsed(&lookup, "RAIN_ROCKS_ENABLE_STATISTICS", d.enable_statistics),
            error_if_log_file_exist: parsed(
                &lookup,
                "RAIN_ROCKS_ERROR_IF_LOG_FILE_EXIST",
                d.error_if_log_file_exist,
            ),
            read: ReadSettings {
                fill_cache: parsed(&lookup, "RAIN_ROCKS_READ_FILL_CACHE", d.read.fill_cache),
                verify_checksums: parsed(
                    &lookup,
                    "RAIN_ROCKS_READ_VERIFY_CHECKSUMS",
                    d.read.verify_checksums,
                ),
                total_order_seek: parsed(
                    &lookup,
                    "RAIN_ROCKS_READ_TOTAL_ORDER_SEEK",
                    d.read.total_order_seek,
                ),
                readahead_size: lookup("RAIN_ROCKS_READ_READAHEAD_SIZE")
                    .and_then(|s| s.trim().parse().ok()),
            },
            write: WriteSettings {
                sync: parsed(&lookup, "RAIN_ROCKS_WRITE_SYNC", d.write.sync),
                disable_wal: parsed(&lookup, "RAIN_ROCKS_WRITE_DISABLE_WAL", d.write.disable_wal),
            },
        }
    }

    /// Database-level options for the given access mode.
    ///
    /// Missing stores and column families are only created in read-write mode.
    pub fn to_db_options(&self, mode: AccessMode, block_cache: &rocksdb::Cache) -> rocksdb::Options {
        let mut opts = rocksdb::Options::default();

        let writable = mode == AccessMode::ReadWrite;
        opts.create_if_missing(writable);
        opts.create_missing_column_families(writable);
        opts.set_max_open_files(self.max_open_files);

        opts.set_write_buffer_size(self.write_buffer_size);
        opts.set_max_write_buffer_number(self.max_write_buffer_number);
        opts.set_target_file_size_base(self.target_file_size_base);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_block_cache(block_cache);
        block_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&block_opts);

        if self.enable_statistics {
            opts.enable_statistics();
        }

        opts
    }
}

/// Read-path settings.
///
/// Every native iterator owns its read options, so cached iterators are
/// always opened with options built from these settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadSettings {
    pub fill_cache: bool,
    pub verify_checksums: bool,
    pub total_order_seek: bool,
    pub readahead_size: Option<usize>,
}

impl Default for ReadSettings {
    fn default() -> Self {
        Self {
            fill_cache: true,
            verify_checksums: true,
            total_order_seek: false,
            readahead_size: None,
        }
    }
}

impl ReadSettings {
    pub fn to_read_options(&self) -> rocksdb::ReadOptions {
        let mut opts = rocksdb::ReadOptions::default();
        opts.fill_cache(self.fill_cache);
        opts.set_verify_checksums(self.verify_checksums);
        opts.set_total_order_seek(self.total_order_seek);
        if let Some(size) = self.readahead_size {
            opts.set_readahead_size(size);
        }
        opts
    }
}

/// Write-path settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriteSettings {
    /// fsync the WAL before acknowledging a write
    pub sync: bool,
    pub disable_wal: bool,
}

impl WriteSettings {
    pub fn to_write_options(&self) -> rocksdb::WriteOptions {
        let mut opts = rocksdb::WriteOptions::default();
        opts.set_sync(self.sync);
        opts.disable_wal(self.disable_wal);
        opts
    }
}
