//! Result marshaling across a boundary
//!
//! Nothing boundary-local leaves a boundary. A unit's `Value` is deep-copied
//! into a host-side `Scalar`, a `UnitError` is flattened into a
//! `Diagnostic`, and both travel as bytes in a versioned, self-describing
//! JSON envelope. Context snapshots and collected outputs use the same
//! envelope on their way in and out.

use enclave_sdk::{
    ContextMap, ContextSnapshot, Diagnostic, Record, Scalar, UnitError, Value, WorkResult,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use thiserror::Error;

/// Version written into every envelope
pub const FORMAT_VERSION: u32 = 1;

/// Maximum nesting depth of a captured value or cause chain
///
/// Every nested array, record or cause costs two JSON levels in the
/// envelope; the bound keeps encoded bytes under serde_json's recursion
/// limit of 128.
const MAX_DEPTH: usize = 60;

/// Errors that can occur during marshaling
#[derive(Debug, Error)]
pub enum MarshalError {
    /// Value cannot be copied (e.g. a handle to a boundary-local object)
    #[error("value cannot be marshaled at {path}: {reason}")]
    Unmarshallable {
        /// Field path of the offending value
        path: String,
        /// Why it could not be copied
        reason: String,
    },

    /// Maximum marshaling depth exceeded
    #[error("maximum marshaling depth exceeded")]
    MaxDepthExceeded,

    /// Serializing an envelope failed
    #[error("cannot encode envelope: {0}")]
    Encode(#[source] serde_json::Error),

    /// Bytes are not a well-formed envelope
    #[error("malformed marshaled bytes: {0}")]
    Malformed(#[source] serde_json::Error),

    /// Envelope written by an incompatible version
    #[error("unsupported marshaling format version {0}")]
    UnsupportedVersion(u32),
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    version: u32,
    body: &'a T,
}

#[derive(Deserialize)]
struct Header {
    version: u32,
}

#[derive(Deserialize)]
struct Envelope<T> {
    body: T,
}

fn seal<T: Serialize>(body: &T) -> Result<Vec<u8>, MarshalError> {
    serde_json::to_vec(&EnvelopeRef {
        version: FORMAT_VERSION,
        body,
    })
    .map_err(MarshalError::Encode)
}

fn open<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, MarshalError> {
    let header: Header = serde_json::from_slice(bytes).map_err(MarshalError::Malformed)?;
    if header.version != FORMAT_VERSION {
        return Err(MarshalError::UnsupportedVersion(header.version));
    }
    let envelope: Envelope<T> = serde_json::from_slice(bytes).map_err(MarshalError::Malformed)?;
    Ok(envelope.body)
}

/// Deep-copy a boundary-local value into plain data
///
/// Private record fields (leading `_`) are skipped; the record's own type
/// name is dropped. Foreign handles and non-finite floats are refused.
pub fn capture(value: &Value) -> Result<Scalar, MarshalError> {
    capture_recursive(value, "$", 0)
}

fn capture_recursive(value: &Value, path: &str, depth: usize) -> Result<Scalar, MarshalError> {
    if depth >= MAX_DEPTH {
        return Err(MarshalError::MaxDepthExceeded);
    }

    match value {
        Value::Null => Ok(Scalar::Null),
        Value::Bool(b) => Ok(Scalar::Bool(*b)),
        Value::Int(i) => Ok(Scalar::Int(*i)),
        Value::Float(f) if f.is_finite() => Ok(Scalar::Float(*f)),
        Value::Float(f) => Err(MarshalError::Unmarshallable {
            path: path.to_string(),
            reason: format!("non-finite float {}", f),
        }),
        Value::Str(s) => Ok(Scalar::Str(s.clone())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| capture_recursive(item, &format!("{}[{}]", path, i), depth + 1))
            .collect::<Result<Vec<_>, _>>()
            .map(Scalar::Array),
        Value::Record(record) => capture_record(record, path, depth),
        Value::Foreign(handle) => Err(MarshalError::Unmarshallable {
            path: path.to_string(),
            reason: format!("foreign handle {} is not decomposable", handle),
        }),
    }
}

fn capture_record(record: &Record, path: &str, depth: usize) -> Result<Scalar, MarshalError> {
    let mut fields = BTreeMap::new();
    for (name, value) in record.fields() {
        if Record::is_private(name) {
            continue;
        }
        let field_path = format!("{}.{}", path, name);
        fields.insert(
            name.to_string(),
            capture_recursive(value, &field_path, depth + 1)?,
        );
    }
    Ok(Scalar::Record(fields))
}

/// Flatten a unit failure into a diagnostic
///
/// The message and frames of `error` are kept; every error on its
/// `source()` chain becomes a nested cause. Causes nested deeper than the
/// marshaling depth are dropped.
pub fn capture_failure(error: &UnitError) -> Diagnostic {
    failure_at(error, 0)
}

/// Flatten an arbitrary error (and its source chain) into a diagnostic
pub fn capture_error(error: &(dyn StdError + 'static)) -> Diagnostic {
    error_at(error, 0)
}

fn failure_at(error: &UnitError, depth: usize) -> Diagnostic {
    let mut diagnostic = Diagnostic::new(error.message());
    diagnostic.frames = error.frames().to_vec();
    push_cause(&mut diagnostic, error.source(), depth);
    diagnostic
}

fn error_at(error: &(dyn StdError + 'static), depth: usize) -> Diagnostic {
    if let Some(unit_error) = error.downcast_ref::<UnitError>() {
        return failure_at(unit_error, depth);
    }
    let mut diagnostic = Diagnostic::new(error.to_string());
    push_cause(&mut diagnostic, error.source(), depth);
    diagnostic
}

fn push_cause(
    diagnostic: &mut Diagnostic,
    source: Option<&(dyn StdError + 'static)>,
    depth: usize,
) {
    if let Some(source) = source {
        if depth + 1 < MAX_DEPTH {
            diagnostic.causes.push(error_at(source, depth + 1));
        }
    }
}

/// Convert a raw unit outcome into a host-constructible result
pub fn capture_outcome(outcome: &Result<Value, UnitError>) -> Result<WorkResult, MarshalError> {
    match outcome {
        Ok(value) => capture(value).map(WorkResult::Success),
        Err(error) => Ok(WorkResult::Failure(capture_failure(error))),
    }
}

/// Capture a raw unit outcome and encode it to bytes
pub fn encode(outcome: &Result<Value, UnitError>) -> Result<Vec<u8>, MarshalError> {
    encode_result(&capture_outcome(outcome)?)
}

/// Encode an already-captured result
pub fn encode_result(result: &WorkResult) -> Result<Vec<u8>, MarshalError> {
    seal(result)
}

/// Rebuild a result from bytes produced by [`encode`] or [`encode_result`]
pub fn decode(bytes: &[u8]) -> Result<WorkResult, MarshalError> {
    open(bytes)
}

/// Encode a context snapshot for transfer into a boundary
pub fn encode_snapshot(snapshot: &ContextSnapshot) -> Result<Vec<u8>, MarshalError> {
    seal(snapshot)
}

/// Decode a context snapshot
pub fn decode_snapshot(bytes: &[u8]) -> Result<ContextSnapshot, MarshalError> {
    open(bytes)
}

/// Encode collected outputs for transfer out of a boundary
pub fn encode_outputs(outputs: &ContextMap) -> Result<Vec<u8>, MarshalError> {
    seal(outputs)
}

/// Decode collected outputs
pub fn decode_outputs(bytes: &[u8]) -> Result<ContextMap, MarshalError> {
    open(bytes)
}
