//! Materialized units and loader identity

use crate::archive::Located;
use enclave_sdk::{EntryFn, EntryRegistry, LinkedEntries};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a loader (the host loader or a boundary)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoaderId(u64);

impl LoaderId {
    /// Create a new unique loader ID
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        LoaderId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for LoaderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LoaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loader#{}", self.0)
    }
}

/// A unit materialized by one loader
///
/// Units are handed out as `Arc<LoadedUnit>`; the `Arc` is the unit's
/// identity. The same symbol materialized by two loaders yields two units
/// that compare equal with [`LoadedUnit::same_shape`] but are never the same
/// allocation and carry different loader ids.
pub struct LoadedUnit {
    name: String,
    loader: LoaderId,
    archive: String,
    path: String,
    bytes: Vec<u8>,
    digest: [u8; 32],
    entries: LinkedEntries,
}

impl LoadedUnit {
    /// Materialize located bytes on behalf of `loader`, linking the unit's
    /// entry points from `registry`.
    pub(crate) fn materialize(
        name: &str,
        loader: LoaderId,
        located: Located,
        registry: &EntryRegistry,
    ) -> Self {
        let digest: [u8; 32] = Sha256::digest(&located.bytes).into();
        Self {
            name: name.to_string(),
            loader,
            archive: located.archive,
            path: located.path,
            bytes: located.bytes,
            digest,
            entries: registry.link(name),
        }
    }

    /// Symbol name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Loader that materialized this unit
    pub fn loader(&self) -> LoaderId {
        self.loader
    }

    /// Label of the archive the bytes came from
    pub fn archive(&self) -> &str {
        &self.archive
    }

    /// Source location, `<archive>!/<path>`
    pub fn location(&self) -> String {
        format!("{}!/{}", self.archive, self.path)
    }

    /// Raw unit bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 of the unit bytes
    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Hex-encoded SHA-256 of the unit bytes
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest)
    }

    /// Look up a linked entry point
    pub fn entry(&self, member: &str) -> Option<&EntryFn> {
        self.entries.get(member)
    }

    /// Linked entry points
    pub fn entries(&self) -> &LinkedEntries {
        &self.entries
    }

    /// Same symbol materialized from the same bytes, regardless of loader
    pub fn same_shape(&self, other: &LoadedUnit) -> bool {
        self.name == other.name && self.digest == other.digest
    }
}

impl fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("name", &self.name)
            .field("loader", &self.loader)
            .field("location", &self.location())
            .field("digest", &self.digest_hex())
            .field("entries", &self.entries)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_sdk::{Value, RUN_ENTRY};

    fn located(bytes: &[u8]) -> Located {
        Located {
            archive: "lib.zip".to_string(),
            path: "pkg/Foo.unit".to_string(),
            bytes: bytes.to_vec(),
        }
    }

    #[test]
    fn test_loader_ids_are_unique() {
        let a = LoaderId::new();
        let b = LoaderId::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_materialize_links_entries() {
        let mut registry = EntryRegistry::new();
        registry.register_work("pkg.Foo", |_call| Ok(Value::Null));

        let unit = LoadedUnit::materialize("pkg.Foo", LoaderId::new(), located(b"x"), &registry);
        assert_eq!(unit.location(), "lib.zip!/pkg/Foo.unit");
        assert!(unit.entry(RUN_ENTRY).is_some());
        assert_eq!(unit.digest_hex().len(), 64);
    }

    #[test]
    fn test_same_shape_across_loaders() {
        let registry = EntryRegistry::new();
        let a = LoadedUnit::materialize("pkg.Foo", LoaderId::new(), located(b"x"), &registry);
        let b = LoadedUnit::materialize("pkg.Foo", LoaderId::new(), located(b"x"), &registry);
        let c = LoadedUnit::materialize("pkg.Foo", LoaderId::new(), located(b"y"), &registry);

        assert!(a.same_shape(&b));
        assert_ne!(a.loader(), b.loader());
        assert!(!a.same_shape(&c));
    }
}
