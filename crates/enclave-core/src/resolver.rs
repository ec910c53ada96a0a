//! Resolvers and the host loader
//!
//! A resolver turns a symbol name into a materialized unit. The host loader
//! is the root of every delegation chain: it resolves from its own archives
//! only and never delegates.

use crate::ambient::AmbientStore;
use crate::archive::{Archive, ArchiveError, ArchiveSet};
use crate::unit::{LoadedUnit, LoaderId};
use enclave_sdk::EntryRegistry;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Errors raised while resolving a symbol
#[derive(Debug, Error)]
pub enum ResolveError {
    /// No archive on any path has the symbol
    #[error("unit not found: {0}")]
    NotFound(String),

    /// The unit resolved but does not expose the requested member
    #[error("unit {unit} has no entry point '{member}'")]
    EntryPointNotFound {
        /// Unit symbol name
        unit: String,
        /// Missing member
        member: String,
    },

    /// An archive could not be read
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// The loader was closed and its archives released
    #[error("{0} is closed")]
    Closed(LoaderId),
}

/// Something that can resolve symbol names to units
pub trait Resolver: Send + Sync {
    /// Identity stamped on every unit this resolver materializes
    fn id(&self) -> LoaderId;

    /// Resolve a symbol, materializing it on first use
    fn resolve(&self, symbol: &str) -> Result<Arc<LoadedUnit>, ResolveError>;

    /// Archives visible to this resolver, in search order
    fn archives(&self) -> &[Archive];

    /// The ambient store units loaded by this resolver see
    fn ambient(&self) -> &Arc<AmbientStore>;
}

/// Root resolver over the host's own archives
pub struct HostLoader {
    id: LoaderId,
    archives: Vec<Archive>,
    open: Mutex<ArchiveSet>,
    registry: Arc<EntryRegistry>,
    cache: Mutex<FxHashMap<String, Arc<LoadedUnit>>>,
    ambient: Arc<AmbientStore>,
}

impl HostLoader {
    /// Open `archives` and serve them with entry points from `registry`
    pub fn new(archives: Vec<Archive>, registry: Arc<EntryRegistry>) -> Result<Self, ArchiveError> {
        let open = ArchiveSet::open(&archives)?;
        Ok(Self {
            id: LoaderId::new(),
            archives,
            open: Mutex::new(open),
            registry,
            cache: Mutex::new(FxHashMap::default()),
            ambient: AmbientStore::host(),
        })
    }

    /// A host loader that resolves nothing
    pub fn empty() -> Self {
        Self {
            id: LoaderId::new(),
            archives: Vec::new(),
            open: Mutex::new(ArchiveSet::default()),
            registry: Arc::new(EntryRegistry::new()),
            cache: Mutex::new(FxHashMap::default()),
            ambient: AmbientStore::host(),
        }
    }

    /// Use `store` instead of the process-wide host store
    pub fn with_ambient(mut self, store: Arc<AmbientStore>) -> Self {
        self.ambient = store;
        self
    }

    /// Entry points linked into units this loader materializes
    pub fn registry(&self) -> &Arc<EntryRegistry> {
        &self.registry
    }

    /// Number of units materialized so far
    pub fn loaded_count(&self) -> usize {
        self.cache.lock().len()
    }
}

impl Resolver for HostLoader {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn resolve(&self, symbol: &str) -> Result<Arc<LoadedUnit>, ResolveError> {
        let mut cache = self.cache.lock();
        if let Some(unit) = cache.get(symbol) {
            return Ok(unit.clone());
        }

        let located = self
            .open
            .lock()
            .find_unit(symbol)?
            .ok_or_else(|| ResolveError::NotFound(symbol.to_string()))?;
        trace!(loader = %self.id, symbol, archive = %located.archive, "host materialized unit");
        let unit = Arc::new(LoadedUnit::materialize(
            symbol,
            self.id,
            located,
            &self.registry,
        ));
        cache.insert(symbol.to_string(), unit.clone());
        Ok(unit)
    }

    fn archives(&self) -> &[Archive] {
        &self.archives
    }

    fn ambient(&self) -> &Arc<AmbientStore> {
        &self.ambient
    }
}

impl fmt::Debug for HostLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostLoader")
            .field("id", &self.id)
            .field("archives", &self.archives)
            .field("loaded", &self.cache.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use zip::write::SimpleFileOptions;

    fn host_archive() -> Archive {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        writer
            .start_file("lib/Util.unit", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"util").unwrap();
        Archive::memory("host.zip", writer.finish().unwrap().into_inner())
    }

    #[test]
    fn test_host_resolves_and_caches() {
        let host = HostLoader::new(vec![host_archive()], Arc::new(EntryRegistry::new())).unwrap();
        let a = host.resolve("lib.Util").unwrap();
        let b = host.resolve("lib.Util").unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.loader(), host.id());
        assert_eq!(host.loaded_count(), 1);
    }

    #[test]
    fn test_host_not_found() {
        let host = HostLoader::new(vec![host_archive()], Arc::new(EntryRegistry::new())).unwrap();
        assert!(matches!(
            host.resolve("lib.Missing"),
            Err(ResolveError::NotFound(name)) if name == "lib.Missing"
        ));
        assert!(matches!(
            HostLoader::empty().resolve("lib.Util"),
            Err(ResolveError::NotFound(_))
        ));
    }

    #[test]
    fn test_host_uses_global_store_by_default() {
        let host = HostLoader::empty();
        assert!(AmbientStore::same(host.ambient(), &AmbientStore::host()));

        let own = Arc::new(AmbientStore::new());
        let host = HostLoader::empty().with_ambient(own.clone());
        assert!(AmbientStore::same(host.ambient(), &own));
    }
}
