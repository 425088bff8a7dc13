//! Removal masks, quota storage types and quota client types.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;

bitflags::bitflags! {
    /// Bitset selecting the data categories a clear request targets.
    ///
    /// Bit positions are stable and may be persisted.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RemoveDataMask: u32 {
        const COOKIES = 1 << 0;
        const FILE_SYSTEMS = 1 << 1;
        const INDEXEDDB = 1 << 2;
        const WEBSQL = 1 << 3;
        const SERVICE_WORKERS = 1 << 4;
        const CACHE_STORAGE = 1 << 5;
        const LOCAL_STORAGE = 1 << 6;
        const MEDIA_LICENSES = 1 << 7;
        const BACKGROUND_FETCH = 1 << 8;
        const SHADER_CACHE = 1 << 9;
        const ATTRIBUTION_REPORTING = 1 << 10;
        const AGGREGATION_SERVICE = 1 << 11;
        const SHARED_STORAGE = 1 << 12;
        const INTEREST_GROUPS = 1 << 13;
        const INTEREST_GROUP_PERMISSIONS_CACHE = 1 << 14;
        const PLUGIN_PRIVATE = 1 << 15;
        /// Rate-limit bookkeeping of the attribution manager. Only valid
        /// together with `ATTRIBUTION_REPORTING`.
        const ATTRIBUTION_REPORTING_INTERNAL = 1 << 16;

        /// Categories stored in buckets managed by the quota subsystem.
        const QUOTA_MANAGED = Self::FILE_SYSTEMS.bits()
            | Self::INDEXEDDB.bits()
            | Self::WEBSQL.bits()
            | Self::SERVICE_WORKERS.bits()
            | Self::CACHE_STORAGE.bits()
            | Self::MEDIA_LICENSES.bits()
            | Self::BACKGROUND_FETCH.bits();

        const ALL = (1 << 17) - 1;
    }
}

impl RemoveDataMask {
    /// CLI names of the single-category bits, in bit order.
    const NAMES: [(&'static str, Self); 17] = [
        ("cookies", Self::COOKIES),
        ("file-systems", Self::FILE_SYSTEMS),
        ("indexeddb", Self::INDEXEDDB),
        ("websql", Self::WEBSQL),
        ("service-workers", Self::SERVICE_WORKERS),
        ("cache-storage", Self::CACHE_STORAGE),
        ("local-storage", Self::LOCAL_STORAGE),
        ("media-licenses", Self::MEDIA_LICENSES),
        ("background-fetch", Self::BACKGROUND_FETCH),
        ("shader-cache", Self::SHADER_CACHE),
        ("attribution-reporting", Self::ATTRIBUTION_REPORTING),
        ("aggregation-service", Self::AGGREGATION_SERVICE),
        ("shared-storage", Self::SHARED_STORAGE),
        ("interest-groups", Self::INTEREST_GROUPS),
        (
            "interest-group-permissions-cache",
            Self::INTEREST_GROUP_PERMISSIONS_CACHE,
        ),
        ("plugin-private", Self::PLUGIN_PRIVATE),
        (
            "attribution-reporting-internal",
            Self::ATTRIBUTION_REPORTING_INTERNAL,
        ),
    ];

    pub fn names(self) -> impl Iterator<Item = &'static str> {
        Self::NAMES
            .into_iter()
            .filter(move |(_, bit)| self.contains(*bit))
            .map(|(name, _)| name)
    }
}

impl fmt::Display for RemoveDataMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.names().collect();
        if names.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown data category '{0}'")]
pub struct UnknownCategory(pub String);

impl FromStr for RemoveDataMask {
    type Err = UnknownCategory;

    /// Parse a comma separated list of category names, or `all`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mask = Self::empty();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            if part.eq_ignore_ascii_case("all") {
                mask |= Self::ALL;
                continue;
            }
            let (_, bit) = Self::NAMES
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(part))
                .ok_or_else(|| UnknownCategory(part.to_string()))?;
            mask |= *bit;
        }
        Ok(mask)
    }
}

/// Quota-managed storage type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageType {
    Temporary,
    Persistent,
    Syncable,
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StorageType::Temporary => "temporary",
            StorageType::Persistent => "persistent",
            StorageType::Syncable => "syncable",
        };
        f.write_str(name)
    }
}

bitflags::bitflags! {
    /// Bitset of quota storage types a clear request touches.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct QuotaStorageMask: u32 {
        const TEMPORARY = 1 << 0;
        const PERSISTENT = 1 << 1;
        const SYNCABLE = 1 << 2;
        const ALL = Self::TEMPORARY.bits() | Self::PERSISTENT.bits() | Self::SYNCABLE.bits();
    }
}

impl QuotaStorageMask {
    /// Requested storage types, persistent first, then temporary and syncable.
    pub fn storage_types(self) -> Vec<StorageType> {
        [
            (Self::PERSISTENT, StorageType::Persistent),
            (Self::TEMPORARY, StorageType::Temporary),
            (Self::SYNCABLE, StorageType::Syncable),
        ]
        .into_iter()
        .filter(|(bit, _)| self.contains(*bit))
        .map(|(_, storage_type)| storage_type)
        .collect()
    }
}

/// Storage backend ("client") registered with the quota subsystem.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum QuotaClientType {
    FileSystem,
    Database,
    IndexedDatabase,
    ServiceWorker,
    ServiceWorkerCache,
    BackgroundFetch,
    MediaLicense,
    NativeIo,
}

pub type QuotaClientTypes = BTreeSet<QuotaClientType>;

/// Map removal-mask bits to the quota client types they delete.
///
/// File systems always include NativeIO as well; NativeIO has no removal bit
/// of its own.
pub fn quota_client_types(mask: RemoveDataMask) -> QuotaClientTypes {
    let mut types = QuotaClientTypes::new();

    if mask.contains(RemoveDataMask::FILE_SYSTEMS) {
        types.insert(QuotaClientType::FileSystem);
        types.insert(QuotaClientType::NativeIo);
    }
    if mask.contains(RemoveDataMask::WEBSQL) {
        types.insert(QuotaClientType::Database);
    }
    if mask.contains(RemoveDataMask::INDEXEDDB) {
        types.insert(QuotaClientType::IndexedDatabase);
    }
    if mask.contains(RemoveDataMask::SERVICE_WORKERS) {
        types.insert(QuotaClientType::ServiceWorker);
    }
    if mask.contains(RemoveDataMask::CACHE_STORAGE) {
        types.insert(QuotaClientType::ServiceWorkerCache);
    }
    if mask.contains(RemoveDataMask::BACKGROUND_FETCH) {
        types.insert(QuotaClientType::BackgroundFetch);
    }
    if mask.contains(RemoveDataMask::MEDIA_LICENSES) {
        types.insert(QuotaClientType::MediaLicense);
    }
    types
}
