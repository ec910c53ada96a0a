//! Entry point registry and linked entry tables
//!
//! A boundary never calls a unit through a static type. The host registers
//! handlers under `(unit, member)` names; when a boundary materializes a
//! unit it links that unit's members into a `LinkedEntries` table owned by
//! the materialized copy, and the dispatcher calls through it by name.

use crate::context::AmbientAccess;
use crate::error::UnitError;
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Member name of the fixed work entry point
pub const RUN_ENTRY: &str = "run";

/// Arguments handed to an entry point
pub struct Invocation<'a> {
    unit: &'a str,
    member: &'a str,
    item: &'a str,
    bytes: &'a [u8],
    context: &'a dyn AmbientAccess,
}

impl<'a> Invocation<'a> {
    /// Create an invocation (called by the dispatcher)
    pub fn new(
        unit: &'a str,
        member: &'a str,
        item: &'a str,
        bytes: &'a [u8],
        context: &'a dyn AmbientAccess,
    ) -> Self {
        Self {
            unit,
            member,
            item,
            bytes,
            context,
        }
    }

    /// Symbol name of the invoked unit
    pub fn unit(&self) -> &str {
        self.unit
    }

    /// Invoked member name
    pub fn member(&self) -> &str {
        self.member
    }

    /// The designated work item (the entry point's single argument)
    pub fn item(&self) -> &str {
        self.item
    }

    /// Raw bytes the unit was materialized from
    pub fn bytes(&self) -> &[u8] {
        self.bytes
    }

    /// Ambient context of the boundary the unit was loaded by
    pub fn context(&self) -> &dyn AmbientAccess {
        self.context
    }
}

/// Entry point handler
pub type EntryFn = Arc<dyn Fn(&Invocation<'_>) -> Result<Value, UnitError> + Send + Sync>;

/// Registry of entry points keyed by unit and member name
#[derive(Default)]
pub struct EntryRegistry {
    units: HashMap<String, HashMap<String, EntryFn>>,
}

impl EntryRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            units: HashMap::new(),
        }
    }

    /// Register a handler for `unit`'s `member`
    pub fn register(
        &mut self,
        unit: &str,
        member: &str,
        handler: impl Fn(&Invocation<'_>) -> Result<Value, UnitError> + Send + Sync + 'static,
    ) {
        self.units
            .entry(unit.to_string())
            .or_default()
            .insert(member.to_string(), Arc::new(handler));
    }

    /// Register the work entry point (`run`) of a unit
    pub fn register_work(
        &mut self,
        unit: &str,
        handler: impl Fn(&Invocation<'_>) -> Result<Value, UnitError> + Send + Sync + 'static,
    ) {
        self.register(unit, RUN_ENTRY, handler);
    }

    /// Get a handler by unit and member name
    pub fn get(&self, unit: &str, member: &str) -> Option<EntryFn> {
        self.units.get(unit).and_then(|m| m.get(member)).cloned()
    }

    /// Check if a handler is registered
    pub fn contains(&self, unit: &str, member: &str) -> bool {
        self.units
            .get(unit)
            .is_some_and(|members| members.contains_key(member))
    }

    /// Build the entry table for one unit
    ///
    /// Units without registered handlers link to an empty table; they can
    /// still be resolved, but invoking any member fails.
    pub fn link(&self, unit: &str) -> LinkedEntries {
        LinkedEntries {
            handlers: self.units.get(unit).cloned().unwrap_or_default(),
        }
    }

    /// Get the number of units with at least one handler
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl fmt::Debug for EntryRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRegistry")
            .field("units", &self.units.len())
            .finish()
    }
}

/// Entry points linked into one materialized unit
#[derive(Clone, Default)]
pub struct LinkedEntries {
    handlers: HashMap<String, EntryFn>,
}

impl LinkedEntries {
    /// Look up a member by name
    pub fn get(&self, member: &str) -> Option<&EntryFn> {
        self.handlers.get(member)
    }

    /// Sorted member names
    pub fn members(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Get the number of linked members
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if nothing was linked
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for LinkedEntries {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedEntries")
            .field("members", &self.members())
            .finish()
    }
}
