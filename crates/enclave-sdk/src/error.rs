//! Error types raised by work units and by ambient context misuse

use crate::result::Frame;
use std::error::Error;
use std::fmt;

/// Ambient context protocol violations
///
/// These are programming errors and are never swallowed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// A context is already active on this thread
    #[error("an ambient context is already active on this thread")]
    AlreadyActive,

    /// No context has been initialized on this thread
    #[error("no ambient context is active on this thread")]
    NotActive,
}

/// Failure raised by a work unit
///
/// Carries a message, the frames the unit chose to record and an optional
/// underlying error. The dispatcher appends its own frame before the
/// failure leaves the boundary.
pub struct UnitError {
    message: String,
    frames: Vec<Frame>,
    source: Option<Box<dyn Error + Send + Sync + 'static>>,
}

impl UnitError {
    /// Create a failure with the given message
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            frames: Vec::new(),
            source: None,
        }
    }

    /// Wrap an arbitrary error, keeping it as the cause
    pub fn wrap<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self {
            message: error.to_string(),
            frames: Vec::new(),
            source: Some(Box::new(error)),
        }
    }

    /// Append a frame (frames are ordered innermost first)
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Attach the error that caused this failure
    pub fn caused_by<E>(mut self, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(cause));
        self
    }

    /// The failure message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Recorded frames, innermost first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

impl fmt::Debug for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnitError")
            .field("message", &self.message)
            .field("frames", &self.frames)
            .field("source", &self.source.as_ref().map(|s| s.to_string()))
            .finish()
    }
}

impl fmt::Display for UnitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for UnitError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.source
            .as_ref()
            .map(|s| s.as_ref() as &(dyn Error + 'static))
    }
}

impl From<String> for UnitError {
    fn from(s: String) -> Self {
        UnitError::new(s)
    }
}

impl From<&str> for UnitError {
    fn from(s: &str) -> Self {
        UnitError::new(s)
    }
}

impl From<ProtocolError> for UnitError {
    fn from(e: ProtocolError) -> Self {
        UnitError::wrap(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_unit_error_frames_in_order() {
        let err = UnitError::new("boom")
            .with_frame(Frame::new("pkg.Inner", "helper"))
            .with_frame(Frame::new("pkg.Outer", "run"));

        assert_eq!(err.message(), "boom");
        assert_eq!(err.frames()[0].unit, "pkg.Inner");
        assert_eq!(err.frames()[1].member, "run");
    }

    #[test]
    fn test_unit_error_source_chain() {
        let err = UnitError::new("could not load fixture")
            .caused_by(io::Error::new(io::ErrorKind::NotFound, "fixture.json"));

        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("fixture.json"));
    }

    #[test]
    fn test_wrap_keeps_message_and_source() {
        let err = UnitError::wrap(ProtocolError::NotActive);
        assert_eq!(err.message(), ProtocolError::NotActive.to_string());
        assert!(err.source().is_some());
    }
}
