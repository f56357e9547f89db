//! Error types for the range engine.

use thiserror::Error;

use crate::types::NodeId;

/// Result type alias for index operations
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur in the index
#[derive(Error, Debug)]
pub enum IndexError {
    /// Malformed call parameters (e.g. a negative capacity)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A cursor was pulled past exhaustion
    #[error("No such element: the cursor is exhausted")]
    NoSuchElement,

    /// Reserved flag bits, or a flag combination this access mode cannot honor
    #[error("Unsupported flags {bits:#04x}: {reason}")]
    UnsupportedFlags { bits: u8, reason: &'static str },

    /// Subtree counts or node links disagree with the stored entries.
    ///
    /// Never corrected in place: the call that detects it is aborted.
    #[error("Structural invariant violated: {0}")]
    StructuralInvariantViolation(String),

    /// A node handle does not refer to a live node
    #[error("Node {0} not found")]
    NodeNotFound(NodeId),

    /// Invalid operation for the current state
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

impl IndexError {
    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a structural invariant error, logging it before it propagates
    pub fn invariant(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        tracing::error!(%msg, "structural invariant violated");
        Self::StructuralInvariantViolation(msg)
    }

    /// Create an invalid operation error
    pub fn invalid_operation(msg: impl Into<String>) -> Self {
        Self::InvalidOperation(msg.into())
    }

    /// Whether this error reports a corrupted tree rather than caller misuse
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StructuralInvariantViolation(_) | Self::NodeNotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::UnsupportedFlags { bits: 0x08, reason: "reserved bits set" };
        assert_eq!(err.to_string(), "Unsupported flags 0x08: reserved bits set");
        assert_eq!(IndexError::NodeNotFound(NodeId::new(7)).to_string(), "Node 7 not found");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(IndexError::invariant("count mismatch").is_fatal());
        assert!(!IndexError::NoSuchElement.is_fatal());
        assert!(!IndexError::invalid_argument("capacity").is_fatal());
    }
}
