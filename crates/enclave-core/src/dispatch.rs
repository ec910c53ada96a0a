//! Execution dispatcher
//!
//! Runs one work unit inside a boundary and hands back a host-side
//! [`WorkResult`]. The call is synchronous: the boundary is installed as
//! the thread's ambient loader, the host context is copied in, the unit's
//! `run` entry is called by name, and the raw outcome is marshaled through
//! bytes. The loader is restored and the context torn down whatever
//! happens in between.
//!
//! A unit returning `Err` or panicking is a normal outcome and comes back
//! as [`WorkResult::Failure`]. Construction, resolution, marshaling and
//! context protocol errors are returned as [`DispatchError`].

use crate::ambient::{self, AmbientStore, PropagateError};
use crate::boundary::{Boundary, BoundaryError};
use crate::loader::LoaderGuard;
use crate::marshal::{self, MarshalError};
use crate::resolver::{ResolveError, Resolver};
use enclave_sdk::{Frame, Invocation, UnitError, Value, WorkResult, RUN_ENTRY};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors the dispatcher does not turn into a failure result
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The boundary supplier failed
    #[error("cannot build boundary: {0}")]
    Boundary(#[from] BoundaryError),

    /// The work unit or its entry point could not be resolved
    #[error("cannot resolve work unit: {0}")]
    Resolve(#[from] ResolveError),

    /// The outcome could not cross the boundary
    #[error("cannot marshal work result: {0}")]
    Marshal(#[from] MarshalError),

    /// The ambient context could not be moved across the boundary
    #[error("cannot propagate ambient context: {0}")]
    Propagate(#[from] PropagateError),
}

/// Runs work units inside boundaries on the calling thread
#[derive(Debug, Clone)]
pub struct Dispatcher {
    host: Arc<AmbientStore>,
}

impl Dispatcher {
    /// Dispatcher propagating the process-wide host context
    pub fn new() -> Self {
        Self {
            host: AmbientStore::host(),
        }
    }

    /// Dispatcher propagating `store` instead of the process-wide context
    pub fn with_host_store(store: Arc<AmbientStore>) -> Self {
        Self { host: store }
    }

    /// Host-side ambient store
    pub fn host_store(&self) -> &Arc<AmbientStore> {
        &self.host
    }

    /// Build a boundary with `supplier` and run `work_name`'s `run` entry
    /// on `item` inside it
    ///
    /// Blocks until the unit returns. The dispatcher never caches the
    /// boundary; callers that want to reuse one hand out the same `Arc`.
    pub fn run_in_boundary<S>(
        &self,
        work_name: &str,
        item: &str,
        supplier: S,
    ) -> Result<WorkResult, DispatchError>
    where
        S: FnOnce() -> Result<Arc<Boundary>, BoundaryError>,
    {
        let boundary = supplier()?;
        let loader: Arc<dyn Resolver> = boundary.clone();
        let _loader = LoaderGuard::install(loader);

        debug!(work = work_name, item, loader = %boundary.id(), "dispatching work unit");
        let propagated = ambient::propagate_in(&self.host, &*boundary)?;
        let teardown = Teardown {
            host: &self.host,
            boundary: &boundary,
            armed: propagated,
        };

        let outcome = invoke(&boundary, work_name, item);
        let collected = teardown.finish();
        let result = outcome?;
        collected?;

        debug!(work = work_name, success = result.is_success(), "work unit finished");
        Ok(result)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Tears the boundary-side context down even if dispatch unwinds
struct Teardown<'a> {
    host: &'a Arc<AmbientStore>,
    boundary: &'a Boundary,
    armed: bool,
}

impl Teardown<'_> {
    fn finish(mut self) -> Result<(), PropagateError> {
        if !self.armed {
            return Ok(());
        }
        self.armed = false;
        ambient::propagate_out(self.host, self.boundary).map(|_| ())
    }
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(e) = ambient::propagate_out(self.host, self.boundary) {
                warn!(loader = %self.boundary.id(), error = %e, "context teardown failed while unwinding");
            }
        }
    }
}

fn invoke(boundary: &Boundary, work_name: &str, item: &str) -> Result<WorkResult, DispatchError> {
    let unit = boundary.resolve(work_name)?;
    let entry = unit
        .entry(RUN_ENTRY)
        .cloned()
        .ok_or_else(|| ResolveError::EntryPointNotFound {
            unit: unit.name().to_string(),
            member: RUN_ENTRY.to_string(),
        })?;

    let context = boundary.ambient();
    let invocation = Invocation::new(unit.name(), RUN_ENTRY, item, unit.bytes(), &**context);
    let outcome: Result<Value, UnitError> =
        match panic::catch_unwind(AssertUnwindSafe(|| entry(&invocation))) {
            Ok(outcome) => outcome,
            Err(payload) => Err(UnitError::new(panic_message(payload.as_ref()))),
        };
    let outcome = outcome
        .map_err(|e| e.with_frame(Frame::new(unit.name(), RUN_ENTRY).at(unit.location())));

    let bytes = marshal::encode(&outcome)?;
    Ok(marshal::decode(&bytes)?)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("work unit panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("work unit panicked: {}", message)
    } else {
        "work unit panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("bad index");
        assert_eq!(panic_message(payload.as_ref()), "work unit panicked: bad index");

        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "work unit panicked: owned");

        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "work unit panicked");
    }
}
