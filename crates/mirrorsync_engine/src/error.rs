//! Error types for the sync engine.

use mirrorsync_core::CoreError;
use mirrorsync_protocol::ProtocolError;
use thiserror::Error;
use uuid::Uuid;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that abort a sync pass.
///
/// Data-shape problems (unresolved relationships, filtered objects, unknown
/// types) are never errors; they come back as `SyncIssue` values.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed or mismatched protocol message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Store failure or configuration error.
    #[error("store error: {0}")]
    Core(#[from] CoreError),

    /// A call named a session the peer does not know.
    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    /// Invalid state transition.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// Not connected.
    #[error("not connected to peer")]
    NotConnected,

    /// The pass was cancelled.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::NotConnected => true,
            _ => false,
        }
    }

    /// Returns true if the error points at a contract violation or a
    /// misconfiguration that retrying cannot fix.
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}
