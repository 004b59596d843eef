//! Store Session Lifecycle Integration Tests
//!
//! Exercises a session the way an embedding service does:
//! 1. Open a fresh store read-write, write through every entry point
//! 2. Close it (explicitly and via drop)
//! 3. Reopen read-only and verify the write path is closed
//! 4. Rediscover persisted column families
//!
//! ## Test Scenarios
//!
//! - Repeated init is a warning, not an error
//! - Read-only sessions reject every mutation and leave the store unchanged
//! - Unknown column families
//! - Put/get/delete round trips, absent value as delete
//! - Column family discovery on empty and existing stores
//! - Teardown before init and repeated teardown
//! - Concurrent readers sharing one cached iterator

use rain_storage::rocksdb::{WriteBatch, WriteOptions};
use rain_storage::{AccessMode, Session, StorageOperation, DEFAULT_COLUMN_FAMILY};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use tracing::info;

/// Initialize tracing for tests
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn names(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Create a store with the given families and one key in each
fn seed_store(path: &Path, families: &[&str]) {
    let session = Session::open_read_write(path, families.iter().copied()).unwrap();
    for family in families {
        session.put(Some(*family), b"seed", family.as_bytes()).unwrap();
    }
    session.put(None, b"seed", b"default").unwrap();
    session.destroy();
}

#[test]
fn test_init_twice_is_noop() {
    init_tracing();
    let temp = TempDir::new().unwrap();

    let session = Session::read_write(temp.path());
    session.set_column_families(["users"]);
    session.init().unwrap();
    session.put(Some("users"), b"u:1", b"alice").unwrap();

    session.init().unwrap();

    assert!(session.is_initialized());
    assert_eq!(session.opened_column_families(), names(&["default", "users"]));
    assert_eq!(
        session.get(Some("users"), b"u:1").unwrap(),
        Some(b"alice".to_vec())
    );
}

#[test]
fn test_read_only_rejects_mutations() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    seed_store(temp.path(), &["users"]);

    let session = Session::open_read_only(temp.path()).unwrap();
    assert_eq!(session.mode(), AccessMode::ReadOnly);

    let err = session.put(Some("users"), b"seed", b"changed").unwrap_err();
    assert!(err.is_read_only_violation());
    assert_eq!(err.operation, Some(StorageOperation::Put));

    let err = session.put_str(Some("users"), "seed", None).unwrap_err();
    assert!(err.is_read_only_violation());

    let err = session.delete(Some("users"), b"seed").unwrap_err();
    assert!(err.is_read_only_violation());
    assert_eq!(err.operation, Some(StorageOperation::Delete));

    let err = session.write(WriteBatch::default()).unwrap_err();
    assert!(err.is_read_only_violation());

    assert!(session.compact_range().unwrap_err().is_read_only_violation());
    assert!(session.flush().unwrap_err().is_read_only_violation());

    // Unknown families still fail on the read-only check first
    let err = session.put(Some("nope"), b"k", b"v").unwrap_err();
    assert!(err.is_read_only_violation());

    assert_eq!(
        session.get(Some("users"), b"seed").unwrap(),
        Some(b"users".to_vec())
    );
    assert_eq!(session.get_str(None, "seed").unwrap().as_deref(), Some("default"));
}

#[test]
fn test_read_only_before_init_still_rejects_writes() {
    let temp = TempDir::new().unwrap();
    let session = Session::read_only(temp.path());

    let err = session.put(None, b"k", b"v").unwrap_err();
    assert!(err.is_read_only_violation());
}

#[test]
fn test_unknown_column_family() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let session = Session::open_read_write(temp.path(), ["users"]).unwrap();

    let err = session.get(Some("orders"), b"k").unwrap_err();
    assert!(err.is_column_family_not_exists());
    assert_eq!(err.missing_column_family(), Some("orders"));
    assert_eq!(err.error_code(), "CF_NOT_EXISTS");

    let err = session.put(Some("orders"), b"k", b"v").unwrap_err();
    assert_eq!(err.missing_column_family(), Some("orders"));

    let err = session.delete(Some("orders"), b"k").unwrap_err();
    assert_eq!(err.missing_column_family(), Some("orders"));

    let visited = session.with_iterator(Some("orders"), |_| ()).unwrap();
    assert!(visited.is_none());
    assert_eq!(session.cached_iterator_count(), 0);
    assert!(!session.has_column_family("orders"));
}

#[test]
fn test_put_get_delete_round_trip() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let session = Session::open_read_write(temp.path(), ["users"]).unwrap();

    session.put(Some("users"), b"u:1", b"alice").unwrap();
    assert_eq!(
        session.get(Some("users"), b"u:1").unwrap(),
        Some(b"alice".to_vec())
    );
    // Families are separate keyspaces
    assert_eq!(session.get(None, b"u:1").unwrap(), None);

    session.delete(Some("users"), b"u:1").unwrap();
    assert_eq!(session.get(Some("users"), b"u:1").unwrap(), None);

    // Deleting a missing key is not an error
    session.delete(Some("users"), b"u:404").unwrap();
}

#[test]
fn test_absent_value_deletes() {
    let temp = TempDir::new().unwrap();
    let session = Session::open_read_write(temp.path(), ["users"]).unwrap();

    session.put_str(Some("users"), "u:1", Some("alice")).unwrap();
    assert_eq!(
        session.get_str(Some("users"), "u:1").unwrap().as_deref(),
        Some("alice")
    );
    session.put_str(Some("users"), "u:1", None).unwrap();
    assert_eq!(session.get_str(Some("users"), "u:1").unwrap(), None);

    let mut wo = WriteOptions::default();
    wo.disable_wal(true);
    session.put_opt(None, Some(&wo), b"k", Some(b"v")).unwrap();
    session.put_opt(None, Some(&wo), b"k", None).unwrap();
    assert!(!session.exists(None, b"k").unwrap());
}

#[test]
fn test_empty_directory_has_only_default_family() {
    init_tracing();
    let temp = TempDir::new().unwrap();

    let session = Session::open_read_write(temp.path(), Vec::<String>::new()).unwrap();

    assert_eq!(session.column_family_names(), names(&[DEFAULT_COLUMN_FAMILY]));
    assert_eq!(session.opened_column_families(), names(&[DEFAULT_COLUMN_FAMILY]));
    assert!(session
        .column_families()
        .iter()
        .all(|descriptor| descriptor.is_default()));
}

#[test]
fn test_existing_families_are_discovered() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    seed_store(temp.path(), &["a", "b", "c"]);

    let expected = names(&["a", "b", "c", "default"]);

    let ro = Session::open_read_only(temp.path()).unwrap();
    assert_eq!(ro.opened_column_families(), expected);
    assert_eq!(ro.get(Some("b"), b"seed").unwrap(), Some(b"b".to_vec()));
    drop(ro);

    let rw = Session::open_read_write(temp.path(), Vec::<String>::new()).unwrap();
    assert_eq!(rw.opened_column_families(), expected);
    info!(families = ?rw.column_family_names(), "Reopened read-write");
}

#[test]
fn test_destroy_before_init_and_twice() {
    init_tracing();
    let temp = TempDir::new().unwrap();

    let unopened = Session::read_write(temp.path().join("never"));
    unopened.destroy();
    unopened.destroy();
    assert!(!temp.path().join("never").exists());

    let session = Session::open_read_write(temp.path(), ["users"]).unwrap();
    session.with_iterator(Some("users"), |it| it.seek_to_first()).unwrap();
    session.destroy();
    session.destroy();

    assert!(!session.is_initialized());
    assert_eq!(session.cached_iterator_count(), 0);
    assert!(session.opened_column_families().is_empty());
    assert_eq!(session.read_options_owned(), None);

    // The store can be reopened once the handle is released
    let reopened = Session::open_read_only(temp.path()).unwrap();
    assert!(reopened.has_column_family("users"));
}

#[test]
fn test_failed_init_can_be_destroyed() {
    let temp = TempDir::new().unwrap();
    let session = Session::read_only(temp.path().join("missing"));

    assert!(session.init().unwrap_err().is_invalid_configuration());
    session.destroy();
    session.destroy();
}

#[test]
fn test_concurrent_readers_share_one_iterator() {
    init_tracing();
    let temp = TempDir::new().unwrap();
    let session = Arc::new(Session::open_read_write(temp.path(), ["data"]).unwrap());

    let mut batch = WriteBatch::default();
    session
        .with_cf(Some("data"), |cf| {
            for i in 0..100u32 {
                batch.put_cf(cf, i.to_be_bytes(), i.to_le_bytes());
            }
        })
        .unwrap();
    session.write(batch).unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let session = Arc::clone(&session);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..100u32 {
                    let key = ((i + t as u32) % 100).to_be_bytes();
                    let value = session.get(Some("data"), key).unwrap();
                    assert_eq!(value, Some(((i + t as u32) % 100).to_le_bytes().to_vec()));
                }
                session
                    .with_iterator(Some("data"), |it| it.entries().unwrap().len())
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), Some(100));
    }
    assert_eq!(session.cached_iterator_count(), 1);
}

#[test]
fn test_caller_options_outlive_session() {
    let temp = TempDir::new().unwrap();
    let write = Arc::new(WriteOptions::default());

    {
        let session = Session::open_read_write_with(
            temp.path(),
            rain_storage::rocksdb::Options::default(),
            rain_storage::rocksdb::ReadOptions::default(),
            Arc::clone(&write),
            Vec::<String>::new(),
        );
        // Caller-supplied database options do not create the store
        assert!(session.unwrap_err().is_rocksdb_error());
    }
    assert_eq!(Arc::strong_count(&write), 1);

    let mut db_opts = rain_storage::rocksdb::Options::default();
    db_opts.create_if_missing(true);
    let session = Session::open_read_write_with(
        temp.path(),
        db_opts,
        rain_storage::rocksdb::ReadOptions::default(),
        Arc::clone(&write),
        Vec::<String>::new(),
    )
    .unwrap();
    assert_eq!(session.db_options_owned(), Some(true));
    assert_eq!(session.write_options_owned(), Some(false));

    session.put(None, b"k", b"v").unwrap();
    drop(session);
    assert_eq!(Arc::strong_count(&write), 1);
}
