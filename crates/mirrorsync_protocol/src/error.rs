//! Error types for the sync protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding, or interpreting
/// protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// CBOR encoding or decoding failed.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// A response did not match the request it answers.
    #[error("unexpected message: expected {expected}, got {actual}")]
    UnexpectedMessage {
        /// The operation whose response was expected.
        expected: &'static str,
        /// The operation that actually arrived.
        actual: &'static str,
    },

    /// A sync object was decoded as the wrong entity type.
    #[error("type mismatch: object is {actual}, expected {expected}")]
    TypeMismatch {
        /// The type the caller asked for.
        expected: String,
        /// The type the object carries.
        actual: String,
    },

    /// The remote peer reported a failure.
    #[error("remote error: {message}")]
    Remote {
        /// Message reported by the remote side.
        message: String,
    },

    /// A peer response broke the protocol contract.
    #[error("protocol violation: {message}")]
    Violation {
        /// What was violated.
        message: String,
    },
}

impl ProtocolError {
    /// Creates a codec error.
    pub fn codec(message: impl ToString) -> Self {
        Self::Codec {
            message: message.to_string(),
        }
    }

    /// Creates a protocol violation error.
    pub fn violation(message: impl Into<String>) -> Self {
        Self::Violation {
            message: message.into(),
        }
    }
}
