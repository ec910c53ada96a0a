//! AmbientAccess trait and the context snapshot record
//!
//! Work units read inputs and environment and write outputs through
//! `AmbientAccess`. The engine implements it for each boundary's own
//! ambient store, so a unit only ever sees the copy that lives on its side.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key/value map used for inputs, environment and outputs
pub type ContextMap = BTreeMap<String, String>;

/// Data copied into a boundary before a unit runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    /// Input parameters
    #[serde(default)]
    pub input: ContextMap,
    /// Environment
    #[serde(default)]
    pub env: ContextMap,
}

impl ContextSnapshot {
    /// Create a snapshot from input and environment maps
    pub fn new(input: ContextMap, env: ContextMap) -> Self {
        Self { input, env }
    }
}

/// Thread-scoped view of the ambient context active on the calling thread
pub trait AmbientAccess {
    /// Whether a context is active on the calling thread
    fn is_active(&self) -> bool;

    /// Read an input parameter
    fn input(&self, key: &str) -> Option<String>;

    /// Read an environment entry
    fn env(&self, key: &str) -> Option<String>;

    /// Read a previously produced output
    fn output(&self, key: &str) -> Option<String>;

    /// Record an output value (last write wins)
    fn put_output(&self, key: &str, value: &str) -> Result<(), ProtocolError>;
}
