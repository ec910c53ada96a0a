//! Enclave Core
//!
//! Policy-driven isolation boundaries for named units of work:
//! - Module scanner over directory and zip archives
//! - Isolation policy and boundary loader with a per-boundary unit cache
//! - Thread-local ambient loader and ambient context stores
//! - Execution dispatcher with guaranteed cleanup
//! - Result marshaling through a versioned byte envelope
//! - TOML policy files

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod ambient;
pub mod archive;
pub mod boundary;
pub mod config;
pub mod dispatch;
pub mod loader;
pub mod marshal;
pub mod policy;
pub mod resolver;
pub mod scanner;
pub mod symbol;
pub mod unit;

pub use ambient::{propagate_in, propagate_out, AmbientContext, AmbientScope, AmbientStore, PropagateError};
pub use archive::{Archive, ArchiveError, ArchiveSet};
pub use boundary::{Boundary, BoundaryError, Explanation};
pub use config::{ConfigError, PolicyConfig};
pub use dispatch::{DispatchError, Dispatcher};
pub use loader::{current_loader, current_loader_id, LoaderGuard};
pub use marshal::MarshalError;
pub use policy::{IsolationPolicy, PolicyBuilder, Route};
pub use resolver::{HostLoader, ResolveError, Resolver};
pub use scanner::{scan_packages, scan_units, ScanKind};
pub use unit::{LoadedUnit, LoaderId};
