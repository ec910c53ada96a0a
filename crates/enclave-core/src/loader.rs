//! The calling thread's ambient loader
//!
//! Each thread has one slot naming the resolver code running on it should
//! load through. The slot is only ever changed through [`LoaderGuard`], so
//! the previous loader is back in place as soon as the guard goes out of
//! scope, including while unwinding.

use crate::resolver::Resolver;
use crate::unit::LoaderId;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static CURRENT_LOADER: RefCell<Option<Arc<dyn Resolver>>> = const { RefCell::new(None) };
}

/// The loader installed on the calling thread, if any
pub fn current_loader() -> Option<Arc<dyn Resolver>> {
    CURRENT_LOADER.with(|slot| slot.borrow().clone())
}

/// Id of the loader installed on the calling thread
pub fn current_loader_id() -> Option<LoaderId> {
    CURRENT_LOADER.with(|slot| slot.borrow().as_ref().map(|loader| loader.id()))
}

/// Installs a loader on the calling thread until dropped
#[must_use = "the previous loader is restored as soon as the guard is dropped"]
pub struct LoaderGuard {
    previous: Option<Arc<dyn Resolver>>,
    _thread_bound: PhantomData<*const ()>,
}

impl LoaderGuard {
    /// Make `loader` the calling thread's ambient loader
    pub fn install(loader: Arc<dyn Resolver>) -> Self {
        let previous = CURRENT_LOADER.with(|slot| slot.borrow_mut().replace(loader));
        Self {
            previous,
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for LoaderGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // the slot is gone during thread teardown; nothing left to restore
        let _ = CURRENT_LOADER.try_with(|slot| *slot.borrow_mut() = previous);
    }
}
