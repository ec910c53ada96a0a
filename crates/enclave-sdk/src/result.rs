//! Host-side result records
//!
//! These are the only shapes that cross a boundary on the way out. They hold
//! no references to anything boundary-local, so the host can rebuild them
//! from bytes without knowing which unit produced them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Plain data copied out of a boundary-local `Value`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum Scalar {
    /// Null value
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// Finite 64-bit float
    Float(f64),
    /// String value
    Str(String),
    /// Array of scalars
    Array(Vec<Scalar>),
    /// Public fields of a record, keyed by field name
    Record(BTreeMap<String, Scalar>),
}

impl Scalar {
    /// Look up a record field
    pub fn get(&self, field: &str) -> Option<&Scalar> {
        match self {
            Scalar::Record(fields) => fields.get(field),
            _ => None,
        }
    }

    /// Get the integer value, if this is an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the float value, if this is a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Scalar::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get the boolean value, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the string value, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the elements, if this is an array
    pub fn as_array(&self) -> Option<&[Scalar]> {
        match self {
            Scalar::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// One frame of a failure trace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    /// Symbol name of the unit the frame belongs to
    pub unit: String,
    /// Member (entry point or function) name
    pub member: String,
    /// Source location, if known (e.g. `lib.zip!/pkg/Foo.unit`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Frame {
    /// Create a frame
    pub fn new(unit: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            unit: unit.into(),
            member: member.into(),
            location: None,
        }
    }

    /// Attach a source location
    pub fn at(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "at {}.{} ({})", self.unit, self.member, location),
            None => write!(f, "at {}.{}", self.unit, self.member),
        }
    }
}

/// Minimal stand-in for a failure raised inside a boundary
///
/// The original error type is gone by the time this exists; only its
/// message, its frames and the diagnostics of whatever caused it remain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Failure message
    pub message: String,
    /// Frames, innermost first
    #[serde(default)]
    pub frames: Vec<Frame>,
    /// Nested failures that caused this one
    #[serde(default)]
    pub causes: Vec<Diagnostic>,
}

impl Diagnostic {
    /// Create a diagnostic with no frames or causes
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frames: Vec::new(),
            causes: Vec::new(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for frame in &self.frames {
            write!(f, "\n    {}", frame)?;
        }
        for cause in &self.causes {
            write!(f, "\ncaused by: {}", cause)?;
        }
        Ok(())
    }
}

/// Outcome of running a unit of work inside a boundary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "data", rename_all = "lowercase")]
pub enum WorkResult {
    /// The work completed and produced a value
    Success(Scalar),
    /// The work failed
    Failure(Diagnostic),
}

impl WorkResult {
    /// Check if this is the success variant
    pub fn is_success(&self) -> bool {
        matches!(self, WorkResult::Success(_))
    }

    /// The success value, if any
    pub fn value(&self) -> Option<&Scalar> {
        match self {
            WorkResult::Success(value) => Some(value),
            WorkResult::Failure(_) => None,
        }
    }

    /// The failure diagnostic, if any
    pub fn failure(&self) -> Option<&Diagnostic> {
        match self {
            WorkResult::Success(_) => None,
            WorkResult::Failure(diagnostic) => Some(diagnostic),
        }
    }
}
