//! Option bundles with tracked ownership.
//!
//! A session either owns a native option object (it built the default itself,
//! or the caller handed it over by value) or borrows one the caller keeps
//! alive behind an `Arc`. Releasing an owned bundle frees the native object;
//! releasing a borrowed one only drops the session's reference.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use tracing::debug;

/// Which option bundle a value configures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleKind {
    Database,
    Read,
    Write,
}

impl fmt::Display for BundleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BundleKind::Database => write!(f, "db"),
            BundleKind::Read => write!(f, "read"),
            BundleKind::Write => write!(f, "write"),
        }
    }
}

/// A native option object together with its ownership state.
pub enum OptionBundle<T> {
    /// Created by, or transferred to, the session; released by it.
    Owned(T),
    /// Supplied by the caller, who stays responsible for it.
    Borrowed(Arc<T>),
}

impl<T> OptionBundle<T> {
    pub fn owned(value: T) -> Self {
        OptionBundle::Owned(value)
    }

    pub fn borrowed(value: Arc<T>) -> Self {
        OptionBundle::Borrowed(value)
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, OptionBundle::Owned(_))
    }

    /// Release the bundle. Only an owned bundle frees the native object.
    pub fn release(self, kind: BundleKind) {
        match self {
            OptionBundle::Owned(value) => {
                drop(value);
                debug!(bundle = %kind, owned = true, "Released option bundle");
            }
            OptionBundle::Borrowed(value) => {
                drop(value);
                debug!(bundle = %kind, owned = false, "Dropped reference to caller-owned option bundle");
            }
        }
    }
}

impl<T> Deref for OptionBundle<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match self {
            OptionBundle::Owned(value) => value,
            OptionBundle::Borrowed(value) => value,
        }
    }
}

impl<T> From<T> for OptionBundle<T> {
    fn from(value: T) -> Self {
        OptionBundle::Owned(value)
    }
}

impl<T> From<Arc<T>> for OptionBundle<T> {
    fn from(value: Arc<T>) -> Self {
        OptionBundle::Borrowed(value)
    }
}

impl<T> fmt::Debug for OptionBundle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionBundle::Owned(_) => f.write_str("OptionBundle::Owned"),
            OptionBundle::Borrowed(_) => f.write_str("OptionBundle::Borrowed"),
        }
    }
}

/// Replace the bundle in `slot`, releasing the previous one first.
pub(crate) fn replace_bundle<T>(
    slot: &mut Option<OptionBundle<T>>,
    bundle: OptionBundle<T>,
    kind: BundleKind,
) {
    if let Some(previous) = slot.take() {
        previous.release(kind);
    }
    debug!(bundle = %kind, owned = bundle.is_owned(), "Installed option bundle");
    *slot = Some(bundle);
}

/// Release whatever bundle `slot` holds. An empty slot is a no-op.
pub(crate) fn release_slot<T>(slot: &mut Option<OptionBundle<T>>, kind: BundleKind) {
    if let Some(bundle) = slot.take() {
        bundle.release(kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tracked(Arc<()>);

    #[test]
    fn test_from_value_is_owned() {
        let bundle: OptionBundle<u32> = 7u32.into();
        assert!(bundle.is_owned());
        assert_eq!(*bundle, 7);
    }

    #[test]
    fn test_from_arc_is_borrowed() {
        let shared = Arc::new(7u32);
        let bundle: OptionBundle<u32> = shared.clone().into();
        assert!(!bundle.is_owned());
        assert_eq!(*bundle, 7);
    }

    #[test]
    fn test_release_borrowed_leaves_caller_copy_alive() {
        let shared = Arc::new(rocksdb::ReadOptions::default());
        let bundle = OptionBundle::borrowed(shared.clone());
        assert_eq!(Arc::strong_count(&shared), 2);

        bundle.release(BundleKind::Read);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn test_release_owned_drops_value() {
        let marker = Arc::new(());
        let bundle = OptionBundle::owned(Tracked(marker.clone()));
        assert_eq!(Arc::strong_count(&marker), 2);

        bundle.release(BundleKind::Database);
        assert_eq!(Arc::strong_count(&marker), 1);
    }

    #[test]
    fn test_replace_releases_previous() {
        let first = Arc::new(());
        let mut slot = Some(OptionBundle::owned(Tracked(first.clone())));

        let second = Arc::new(());
        replace_bundle(
            &mut slot,
            OptionBundle::owned(Tracked(second.clone())),
            BundleKind::Write,
        );

        assert_eq!(Arc::strong_count(&first), 1);
        assert_eq!(Arc::strong_count(&second), 2);

        release_slot(&mut slot, BundleKind::Write);
        release_slot(&mut slot, BundleKind::Write);
        assert!(slot.is_none());
        assert_eq!(Arc::strong_count(&second), 1);
    }
}
