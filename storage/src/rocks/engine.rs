//! Process-wide engine state.
//!
//! The RocksDB library is process-lifetime: the state here is created once,
//! before the first session opens, and never torn down.

use std::sync::OnceLock;

use tracing::info;

use super::config::SessionConfig;

static ENGINE: OnceLock<Engine> = OnceLock::new();

/// State shared by every session in the process.
pub struct Engine {
    block_cache: rocksdb::Cache,
    block_cache_size: usize,
}

impl Engine {
    /// Block cache shared by every session's default database options
    pub fn block_cache(&self) -> &rocksdb::Cache {
        &self.block_cache
    }

    pub fn block_cache_size(&self) -> usize {
        self.block_cache_size
    }
}

/// Initialize the engine state if needed and return it.
///
/// Thread-safe and idempotent: the first caller's configuration sizes the
/// shared block cache, later calls get the existing state.
pub fn global(config: &SessionConfig) -> &'static Engine {
    ENGINE.get_or_init(|| {
        info!(
            cache_mb = config.block_cache_size / (1024 * 1024),
            "Initializing RocksDB engine state"
        );
        Engine {
            block_cache: rocksdb::Cache::new_lru_cache(config.block_cache_size),
            block_cache_size: config.block_cache_size,
        }
    })
}

/// The engine state, if some session already initialized it.
pub fn try_global() -> Option<&'static Engine> {
    ENGINE.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_is_initialized_once() {
        let first = global(&SessionConfig::default());
        let other = SessionConfig {
            block_cache_size: 1024,
            ..Default::default()
        };
        let second = global(&other);

        assert!(std::ptr::eq(first, second));
        assert_eq!(second.block_cache_size(), first.block_cache_size());
        assert!(try_global().is_some());
    }

    #[test]
    fn test_global_concurrent_init() {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                std::thread::spawn(|| global(&SessionConfig::default()) as *const Engine as usize)
            })
            .collect();

        let addrs: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(addrs.windows(2).all(|w| w[0] == w[1]));
    }
}
