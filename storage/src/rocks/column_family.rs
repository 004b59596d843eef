use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use tracing::debug;

use super::error::{Result, StorageOperation, StorageResultExt};

/// Name of the column family every RocksDB store has
pub const DEFAULT_COLUMN_FAMILY: &str = rocksdb::DEFAULT_COLUMN_FAMILY_NAME;

/// A column family name plus its family-level options.
#[derive(Clone)]
pub struct FamilyDescriptor {
    name: String,
    options: rocksdb::Options,
}

impl FamilyDescriptor {
    /// Descriptor with default family options
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_options(name, rocksdb::Options::default())
    }

    pub fn with_options(name: impl Into<String>, options: rocksdb::Options) -> Self {
        Self {
            name: name.into(),
            options,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &rocksdb::Options {
        &self.options
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_COLUMN_FAMILY
    }

    pub(crate) fn to_rocksdb(&self) -> rocksdb::ColumnFamilyDescriptor {
        rocksdb::ColumnFamilyDescriptor::new(self.name.as_str(), self.options.clone())
    }
}

impl fmt::Debug for FamilyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FamilyDescriptor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl PartialEq for FamilyDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for FamilyDescriptor {}

/// Descriptor set keyed by name; a later descriptor with the same name
/// replaces the earlier one.
pub(crate) type DescriptorSet = BTreeMap<String, FamilyDescriptor>;

pub(crate) fn descriptor_set<I>(descriptors: I) -> DescriptorSet
where
    I: IntoIterator<Item = FamilyDescriptor>,
{
    descriptors
        .into_iter()
        .map(|d| (d.name.clone(), d))
        .collect()
}

/// Column families persisted in the store at `path`.
///
/// A directory without store metadata has no families yet.
pub fn list_persisted(path: &Path, opts: &rocksdb::Options) -> Result<Vec<String>> {
    if !path.join("CURRENT").is_file() {
        debug!(path = %path.display(), "No store metadata, nothing to list");
        return Ok(Vec::new());
    }
    rocksdb::DB::list_cf(opts, path).with_operation(StorageOperation::ListColumnFamilies)
}

/// Fill an empty descriptor set from on-disk metadata, then make sure the
/// default family is present.
pub(crate) fn resolve_descriptors(
    configured: &mut DescriptorSet,
    path: &Path,
    opts: &rocksdb::Options,
) -> Result<()> {
    if configured.is_empty() {
        let names = list_persisted(path, opts)?;
        debug!(path = %path.display(), families = ?names, "Discovered column families");
        configured.extend(names.into_iter().map(|n| (n.clone(), FamilyDescriptor::new(n))));
    }

    configured
        .entry(DEFAULT_COLUMN_FAMILY.to_string())
        .or_insert_with(|| FamilyDescriptor::new(DEFAULT_COLUMN_FAMILY));

    Ok(())
}
