//! Enclave SDK - the contract shared by both sides of an isolation boundary
//!
//! Work units compile against this crate only. Nothing here refers to a
//! particular boundary: the types are either boundary-local data (`Value`,
//! `UnitError`) that a unit hands back to the dispatcher, or plain records
//! (`Scalar`, `WorkResult`, `Diagnostic`, `ContextSnapshot`) that are safe to
//! serialize and rebuild on the host.
//!
//! # Example
//!
//! ```ignore
//! use enclave_sdk::{EntryRegistry, Value, UnitError};
//!
//! let mut registry = EntryRegistry::new();
//! registry.register_work("pkg.isolated.Counter", |call| {
//!     if call.item() == "explode" {
//!         return Err(UnitError::new("boom"));
//!     }
//!     Ok(Value::record("Counter").with_field("count", 42i64).into())
//! });
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod context;
mod error;
mod handler;
mod result;
mod value;

pub use context::{AmbientAccess, ContextMap, ContextSnapshot};
pub use error::{ProtocolError, UnitError};
pub use handler::{EntryFn, EntryRegistry, Invocation, LinkedEntries, RUN_ENTRY};
pub use result::{Diagnostic, Frame, Scalar, WorkResult};
pub use value::{Record, Value};
