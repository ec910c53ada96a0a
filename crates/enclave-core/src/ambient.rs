//! Ambient context stores and cross-boundary propagation
//!
//! Every loader owns an `AmbientStore`, the loader's own copy of the
//! thread-scoped input/output/environment state. A store holds at most one
//! context per thread. Before a unit runs, the host's active context is
//! copied into the boundary's store; afterwards the boundary's outputs are
//! copied back and merged into the host context. Only encoded bytes make
//! the trip, never references.

use crate::marshal::{self, MarshalError};
use crate::resolver::Resolver;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use enclave_sdk::{AmbientAccess, ContextMap, ContextSnapshot, ProtocolError};
use once_cell::sync::Lazy;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use thiserror::Error;
use tracing::{debug, warn};

static HOST_STORE: Lazy<Arc<AmbientStore>> = Lazy::new(|| Arc::new(AmbientStore::new()));

/// Input, output and environment state of one thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AmbientContext {
    input: ContextMap,
    output: ContextMap,
    env: ContextMap,
}

impl AmbientContext {
    fn from_snapshot(snapshot: ContextSnapshot) -> Self {
        Self {
            input: snapshot.input,
            output: ContextMap::new(),
            env: snapshot.env,
        }
    }

    /// Input parameters
    pub fn input(&self) -> &ContextMap {
        &self.input
    }

    /// Outputs produced so far
    pub fn output(&self) -> &ContextMap {
        &self.output
    }

    /// Environment
    pub fn env(&self) -> &ContextMap {
        &self.env
    }
}

/// Per-thread ambient contexts owned by one loader
pub struct AmbientStore {
    id: u64,
    contexts: DashMap<ThreadId, AmbientContext>,
}

impl AmbientStore {
    /// Create an empty store
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            contexts: DashMap::new(),
        }
    }

    /// The process-wide store used by the host side
    pub fn host() -> Arc<AmbientStore> {
        HOST_STORE.clone()
    }

    /// Store id, for diagnostics
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Start a context on the calling thread
    pub fn init(&self, snapshot: ContextSnapshot) -> Result<(), ProtocolError> {
        match self.contexts.entry(thread::current().id()) {
            Entry::Occupied(_) => Err(ProtocolError::AlreadyActive),
            Entry::Vacant(slot) => {
                slot.insert(AmbientContext::from_snapshot(snapshot));
                Ok(())
            }
        }
    }

    /// End the calling thread's context and return its outputs
    pub fn destroy(&self) -> Result<ContextMap, ProtocolError> {
        self.contexts
            .remove(&thread::current().id())
            .map(|(_, context)| context.output)
            .ok_or(ProtocolError::NotActive)
    }

    /// Copy of the calling thread's input and environment
    pub fn snapshot(&self) -> Option<ContextSnapshot> {
        self.contexts
            .get(&thread::current().id())
            .map(|context| ContextSnapshot::new(context.input.clone(), context.env.clone()))
    }

    /// Copy of the calling thread's whole context
    pub fn current(&self) -> Option<AmbientContext> {
        self.contexts
            .get(&thread::current().id())
            .map(|context| context.clone())
    }

    /// Merge outputs into the calling thread's context (last write wins)
    pub fn merge_output(&self, outputs: ContextMap) -> Result<(), ProtocolError> {
        let mut context = self
            .contexts
            .get_mut(&thread::current().id())
            .ok_or(ProtocolError::NotActive)?;
        context.output.extend(outputs);
        Ok(())
    }

    /// Number of threads with an active context
    pub fn active_threads(&self) -> usize {
        self.contexts.len()
    }

    /// Whether two handles refer to the same store
    pub fn same(a: &Arc<AmbientStore>, b: &Arc<AmbientStore>) -> bool {
        Arc::ptr_eq(a, b)
    }
}

impl Default for AmbientStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AmbientStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AmbientStore")
            .field("id", &self.id)
            .field("active_threads", &self.contexts.len())
            .finish()
    }
}

impl AmbientAccess for AmbientStore {
    fn is_active(&self) -> bool {
        self.contexts.contains_key(&thread::current().id())
    }

    fn input(&self, key: &str) -> Option<String> {
        self.contexts
            .get(&thread::current().id())
            .and_then(|context| context.input.get(key).cloned())
    }

    fn env(&self, key: &str) -> Option<String> {
        self.contexts
            .get(&thread::current().id())
            .and_then(|context| context.env.get(key).cloned())
    }

    fn output(&self, key: &str) -> Option<String> {
        self.contexts
            .get(&thread::current().id())
            .and_then(|context| context.output.get(key).cloned())
    }

    fn put_output(&self, key: &str, value: &str) -> Result<(), ProtocolError> {
        let mut context = self
            .contexts
            .get_mut(&thread::current().id())
            .ok_or(ProtocolError::NotActive)?;
        context.output.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Scoped ambient context on the calling thread
///
/// The context is destroyed when the scope is finished or dropped, so it
/// cannot outlive the code that started it. Scopes are tied to the thread
/// that created them.
pub struct AmbientScope {
    store: Arc<AmbientStore>,
    finished: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl AmbientScope {
    /// Start a context in `store` on the calling thread
    pub fn enter(
        store: Arc<AmbientStore>,
        input: ContextMap,
        env: ContextMap,
    ) -> Result<Self, ProtocolError> {
        store.init(ContextSnapshot::new(input, env))?;
        Ok(Self {
            store,
            finished: false,
            _thread_bound: PhantomData,
        })
    }

    /// Store the scope lives in
    pub fn store(&self) -> &Arc<AmbientStore> {
        &self.store
    }

    /// End the scope and return the collected outputs
    pub fn finish(mut self) -> Result<ContextMap, ProtocolError> {
        self.finished = true;
        self.store.destroy()
    }
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(e) = self.store.destroy() {
                warn!(store = self.store.id(), error = %e, "ambient scope already torn down");
            }
        }
    }
}

/// Errors raised while moving a context across a boundary
#[derive(Debug, Error)]
pub enum PropagateError {
    /// The snapshot or outputs could not be marshaled
    #[error("context marshaling failed: {0}")]
    Marshal(#[from] MarshalError),

    /// Init/destroy protocol was violated on one side
    #[error("ambient protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Copy the host's active context into `boundary`'s store
///
/// Returns `Ok(false)` without touching anything when the host has no
/// active context or when the boundary shares the host's store.
pub fn propagate_in(
    host: &Arc<AmbientStore>,
    boundary: &dyn Resolver,
) -> Result<bool, PropagateError> {
    if AmbientStore::same(host, boundary.ambient()) {
        return Ok(false);
    }
    let Some(snapshot) = host.snapshot() else {
        return Ok(false);
    };

    let bytes = marshal::encode_snapshot(&snapshot)?;
    boundary.ambient().init(marshal::decode_snapshot(&bytes)?)?;
    debug!(
        loader = %boundary.id(),
        inputs = snapshot.input.len(),
        env = snapshot.env.len(),
        "propagated ambient context into boundary"
    );
    Ok(true)
}

/// Tear down `boundary`'s context and merge its outputs into the host's
///
/// Keys produced inside the boundary overwrite existing host outputs.
pub fn propagate_out(
    host: &Arc<AmbientStore>,
    boundary: &dyn Resolver,
) -> Result<ContextMap, PropagateError> {
    if AmbientStore::same(host, boundary.ambient()) {
        return Ok(ContextMap::new());
    }

    let outputs = boundary.ambient().destroy()?;
    let bytes = marshal::encode_outputs(&outputs)?;
    let outputs = marshal::decode_outputs(&bytes)?;
    host.merge_output(outputs.clone())?;
    debug!(
        loader = %boundary.id(),
        outputs = outputs.len(),
        "collected ambient outputs from boundary"
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> ContextMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_init_and_destroy() {
        let store = AmbientStore::new();
        store
            .init(ContextSnapshot::new(map(&[("a", "1")]), map(&[("HOME", "/h")])))
            .unwrap();

        assert!(store.is_active());
        assert_eq!(store.input("a").as_deref(), Some("1"));
        assert_eq!(store.env("HOME").as_deref(), Some("/h"));

        store.put_output("result", "ok").unwrap();
        let outputs = store.destroy().unwrap();
        assert_eq!(outputs, map(&[("result", "ok")]));
        assert!(!store.is_active());
    }

    #[test]
    fn test_double_init_fails() {
        let store = AmbientStore::new();
        store.init(ContextSnapshot::default()).unwrap();
        assert_eq!(
            store.init(ContextSnapshot::default()),
            Err(ProtocolError::AlreadyActive)
        );

        store.destroy().unwrap();
        assert!(store.init(ContextSnapshot::default()).is_ok());
        store.destroy().unwrap();
    }

    #[test]
    fn test_destroy_without_init_fails() {
        let store = AmbientStore::new();
        assert_eq!(store.destroy(), Err(ProtocolError::NotActive));
        assert_eq!(store.put_output("k", "v"), Err(ProtocolError::NotActive));
    }

    #[test]
    fn test_contexts_are_per_thread() {
        let store = Arc::new(AmbientStore::new());
        store.init(ContextSnapshot::new(map(&[("who", "main")]), map(&[]))).unwrap();

        let other = store.clone();
        std::thread::spawn(move || {
            assert!(!other.is_active());
            other.init(ContextSnapshot::new(map(&[("who", "worker")]), map(&[]))).unwrap();
            assert_eq!(other.input("who").as_deref(), Some("worker"));
            other.destroy().unwrap();
        })
        .join()
        .unwrap();

        assert_eq!(store.input("who").as_deref(), Some("main"));
        store.destroy().unwrap();
    }

    #[test]
    fn test_merge_output_last_write_wins() {
        let store = AmbientStore::new();
        store.init(ContextSnapshot::default()).unwrap();
        store.put_output("k", "old").unwrap();
        store.merge_output(map(&[("k", "new"), ("other", "x")])).unwrap();

        let current = store.current().unwrap();
        assert_eq!(current.output(), &map(&[("k", "new"), ("other", "x")]));
        store.destroy().unwrap();
    }

    #[test]
    fn test_scope_destroys_on_drop() {
        let store = Arc::new(AmbientStore::new());
        {
            let _scope = AmbientScope::enter(store.clone(), map(&[]), map(&[])).unwrap();
            assert!(store.is_active());
        }
        assert!(!store.is_active());

        let scope = AmbientScope::enter(store.clone(), map(&[]), map(&[])).unwrap();
        store.put_output("done", "yes").unwrap();
        assert_eq!(scope.finish().unwrap(), map(&[("done", "yes")]));
        assert!(!store.is_active());
    }
}
