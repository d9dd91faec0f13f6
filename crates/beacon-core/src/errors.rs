//! Error types raised by pluggable verifiers and processors.
//!
//! Neither error ever reaches an event emitter: the broadcaster logs them and
//! skips the affected subscriber.

use thiserror::Error;

use crate::events::SystemEventType;
use crate::visibility::VisibilityKind;

/// A payload verifier could not reach a decision.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind:?} verifier failed: {reason}")]
pub struct VerifyError {
    /// Kind of the descriptor being evaluated.
    pub kind: VisibilityKind,
    /// Human-readable cause.
    pub reason: String,
}

impl VerifyError {
    /// Create a verifier error.
    pub fn new(kind: VisibilityKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// An event processor could not produce a subscriber-specific event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("processor for {event_type} failed: {reason}")]
pub struct ProcessError {
    /// Type of the event being processed.
    pub event_type: SystemEventType,
    /// Human-readable cause.
    pub reason: String,
}

impl ProcessError {
    /// Create a processor error.
    pub fn new(event_type: SystemEventType, reason: impl Into<String>) -> Self {
        Self {
            event_type,
            reason: reason.into(),
        }
    }
}
