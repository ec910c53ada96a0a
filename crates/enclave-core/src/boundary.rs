//! Isolation boundary
//!
//! A boundary is a live loader built from an [`IsolationPolicy`]. It owns
//! its open archives, its resolution cache and (unless the policy says
//! otherwise) its own ambient store. Units it materializes carry the
//! boundary's loader id, so the same symbol resolved through two boundaries
//! yields two distinct units.
//!
//! The resolution cache lock is held across materialization: a symbol is
//! materialized at most once per boundary even when the boundary is shared
//! between threads.

use crate::ambient::AmbientStore;
use crate::archive::{Archive, ArchiveError, ArchiveSet};
use crate::policy::{IsolationPolicy, Route};
use crate::resolver::{ResolveError, Resolver};
use crate::scanner;
use crate::unit::{LoadedUnit, LoaderId};
use enclave_sdk::EntryRegistry;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors raised while constructing a boundary
#[derive(Debug, Error)]
pub enum BoundaryError {
    /// An isolated archive could not be opened
    #[error("cannot open isolated archives: {0}")]
    Open(#[source] ArchiveError),

    /// Package discovery over the isolated archives failed
    #[error("package discovery failed: {0}")]
    Discovery(#[source] ArchiveError),
}

struct OpenSets {
    isolated: ArchiveSet,
    // search path used when the parent cannot resolve a symbol; opened lazily
    fallback: Option<ArchiveSet>,
}

/// Where a resolved symbol came from
#[derive(Debug, Clone)]
pub struct Explanation {
    /// Requested symbol
    pub symbol: String,
    /// Route the policy picked
    pub route: Route,
    /// Loader that materialized the unit
    pub loader: LoaderId,
    /// `<archive>!/<path>` of the unit bytes
    pub location: String,
    /// Hex SHA-256 of the unit bytes
    pub digest: String,
}

impl fmt::Display for Explanation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} ({}) {}",
            self.symbol, self.route, self.loader, self.location
        )
    }
}

/// A policy-driven loading boundary
pub struct Boundary {
    id: LoaderId,
    policy: IsolationPolicy,
    parent: Arc<dyn Resolver>,
    search_path: Vec<Archive>,
    sets: Mutex<Option<OpenSets>>,
    cache: Mutex<FxHashMap<String, Arc<LoadedUnit>>>,
    registry: Arc<EntryRegistry>,
    ambient: Arc<AmbientStore>,
}

impl Boundary {
    /// Build a boundary under `parent`
    ///
    /// Opens the isolated archives and, when the policy asks for it, unions
    /// the packages discovered in them into the included prefixes.
    pub fn new(
        policy: IsolationPolicy,
        parent: Arc<dyn Resolver>,
        registry: Arc<EntryRegistry>,
    ) -> Result<Self, BoundaryError> {
        let id = LoaderId::new();
        let policy = if policy.discovers() {
            let discovered = scanner::scan_packages(policy.archives(), policy.discovery_ignores())
                .map_err(BoundaryError::Discovery)?;
            debug!(loader = %id, discovered = discovered.len(), "discovered isolated packages");
            policy.with_discovered(discovered)
        } else {
            policy
        };

        let isolated = ArchiveSet::open(policy.archives()).map_err(BoundaryError::Open)?;
        let search_path = policy
            .archives()
            .iter()
            .chain(parent.archives())
            .cloned()
            .collect();
        let ambient = if policy.shares_ambient() {
            parent.ambient().clone()
        } else {
            Arc::new(AmbientStore::new())
        };

        debug!(
            loader = %id,
            parent = %parent.id(),
            archives = isolated.len(),
            included = policy.included().len(),
            excluded = policy.excluded().len(),
            "created boundary"
        );

        Ok(Self {
            id,
            policy,
            parent,
            search_path,
            sets: Mutex::new(Some(OpenSets {
                isolated,
                fallback: None,
            })),
            cache: Mutex::new(FxHashMap::default()),
            registry,
            ambient,
        })
    }

    /// Effective policy (explicit plus discovered prefixes)
    pub fn policy(&self) -> &IsolationPolicy {
        &self.policy
    }

    /// Effective included prefixes
    pub fn included_prefixes(&self) -> &BTreeSet<String> {
        self.policy.included()
    }

    /// Parent resolver
    pub fn parent(&self) -> &Arc<dyn Resolver> {
        &self.parent
    }

    /// Whether this boundary has materialized `symbol`
    pub fn is_loaded(&self, symbol: &str) -> bool {
        self.cache.lock().contains_key(symbol)
    }

    /// Number of units this boundary has materialized
    pub fn loaded_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Whether [`close`](Self::close) has been called
    pub fn is_closed(&self) -> bool {
        self.sets.lock().is_none()
    }

    /// Resolve `symbol` and report which route and archive served it
    pub fn explain(&self, symbol: &str) -> Result<Explanation, ResolveError> {
        let route = self.policy.route(symbol);
        let unit = self.resolve(symbol)?;
        Ok(Explanation {
            symbol: symbol.to_string(),
            route,
            loader: unit.loader(),
            location: unit.location(),
            digest: unit.digest_hex(),
        })
    }

    /// Release the open archives and drop every cached unit
    ///
    /// Later resolutions fail with [`ResolveError::Closed`]. Units already
    /// handed out stay valid.
    pub fn close(&self) {
        let mut cache = self.cache.lock();
        let released = cache.len();
        cache.clear();
        if self.sets.lock().take().is_some() {
            debug!(loader = %self.id, released, "closed boundary");
        }
    }

    fn cached(&self, symbol: &str) -> Option<Arc<LoadedUnit>> {
        self.cache.lock().get(symbol).cloned()
    }

    fn resolve_isolated(&self, symbol: &str) -> Result<Arc<LoadedUnit>, ResolveError> {
        let mut cache = self.cache.lock();
        if let Some(unit) = cache.get(symbol) {
            return Ok(unit.clone());
        }

        let mut sets = self.sets.lock();
        let sets = sets.as_mut().ok_or(ResolveError::Closed(self.id))?;
        let located = sets
            .isolated
            .find_unit(symbol)?
            .ok_or_else(|| ResolveError::NotFound(symbol.to_string()))?;

        let unit = Arc::new(LoadedUnit::materialize(
            symbol,
            self.id,
            located,
            &self.registry,
        ));
        trace!(loader = %self.id, symbol, location = %unit.location(), "materialized isolated unit");
        cache.insert(symbol.to_string(), unit.clone());
        Ok(unit)
    }

    fn resolve_fallback(&self, symbol: &str) -> Result<Arc<LoadedUnit>, ResolveError> {
        let mut cache = self.cache.lock();
        if let Some(unit) = cache.get(symbol) {
            return Ok(unit.clone());
        }

        let mut sets = self.sets.lock();
        let sets = sets.as_mut().ok_or(ResolveError::Closed(self.id))?;
        if sets.fallback.is_none() {
            let opened = ArchiveSet::open(&self.search_path)?;
            debug!(loader = %self.id, archives = opened.len(), "opened fallback search path");
            sets.fallback = Some(opened);
        }
        let located = match sets.fallback.as_mut() {
            Some(fallback) => fallback.find_unit(symbol)?,
            None => None,
        }
        .ok_or_else(|| ResolveError::NotFound(symbol.to_string()))?;

        let unit = Arc::new(LoadedUnit::materialize(
            symbol,
            self.id,
            located,
            &self.registry,
        ));
        trace!(loader = %self.id, symbol, location = %unit.location(), "materialized unit from search path");
        cache.insert(symbol.to_string(), unit.clone());
        Ok(unit)
    }
}

impl Resolver for Boundary {
    fn id(&self) -> LoaderId {
        self.id
    }

    fn resolve(&self, symbol: &str) -> Result<Arc<LoadedUnit>, ResolveError> {
        if self.is_closed() {
            return Err(ResolveError::Closed(self.id));
        }

        let route = self.policy.route(symbol);
        trace!(loader = %self.id, symbol, %route, "routing symbol");
        let unit = match route {
            Route::Excluded => self.parent.resolve(symbol)?,
            Route::Isolated => return self.resolve_isolated(symbol),
            Route::Delegated => {
                if let Some(unit) = self.cached(symbol) {
                    return Ok(unit);
                }
                match self.parent.resolve(symbol) {
                    Err(ResolveError::NotFound(_)) => return self.resolve_fallback(symbol),
                    other => other?,
                }
            }
        };
        // the parent call ran without our locks; close() may have won the race
        if self.is_closed() {
            return Err(ResolveError::Closed(self.id));
        }
        Ok(unit)
    }

    fn archives(&self) -> &[Archive] {
        &self.search_path
    }

    fn ambient(&self) -> &Arc<AmbientStore> {
        &self.ambient
    }
}

impl fmt::Debug for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Boundary")
            .field("id", &self.id)
            .field("parent", &self.parent.id())
            .field("included", self.policy.included())
            .field("excluded", self.policy.excluded())
            .field("loaded", &self.loaded_count())
            .finish()
    }
}
