//! Protocol requests, results, and the message envelope.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{ProtocolError, ProtocolResult};
use crate::issue::SyncIssue;
use crate::object::SyncObject;
use crate::session::{SyncClientOptions, SyncOptions, SyncSession};
use chrono::{DateTime, Utc};
use mirrorsync_core::ReplicaId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Window and page position for `get_changes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Exclusive lower bound, usually the last watermark.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound. `None` means the session start.
    pub until: Option<DateTime<Utc>>,
    /// Number of matches to skip.
    pub skip: usize,
    /// Replica the changes are for. Rows it delivered are left out.
    #[serde(default)]
    pub requester: Option<ReplicaId>,
}

impl SyncRequest {
    /// Creates a request for the first page of a window.
    pub fn new(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        Self {
            since,
            until,
            skip: 0,
            requester: None,
        }
    }

    /// Names the replica the changes are for.
    #[must_use]
    pub fn for_replica(mut self, replica: ReplicaId) -> Self {
        self.requester = Some(replica);
        self
    }

    /// Returns the request for the page starting at `skip`.
    #[must_use]
    pub fn at(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
}

/// A batch sent to a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest<T> {
    /// The batch.
    pub collection: Vec<T>,
    /// Replica the batch comes from, recorded on every row it writes.
    #[serde(default)]
    pub sender: Option<ReplicaId>,
}

impl<T> ServiceRequest<T> {
    /// Wraps a batch.
    pub fn new(collection: Vec<T>) -> Self {
        Self {
            collection,
            sender: None,
        }
    }

    /// Names the replica the batch comes from.
    #[must_use]
    pub fn from_replica(mut self, replica: ReplicaId) -> Self {
        self.sender = Some(replica);
        self
    }
}

/// A batch returned by a peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceResult<T> {
    /// The batch.
    pub collection: Vec<T>,
    /// Items that were read or received but not returned or not applied.
    pub skipped: usize,
    /// Total items the request covers, across all pages.
    pub total_count: usize,
}

impl<T> ServiceResult<T> {
    /// Wraps a complete, unpaged batch.
    pub fn complete(collection: Vec<T>) -> Self {
        let total_count = collection.len();
        Self {
            collection,
            skipped: 0,
            total_count,
        }
    }
}

impl<T> Default for ServiceResult<T> {
    fn default() -> Self {
        Self {
            collection: Vec::new(),
            skipped: 0,
            total_count: 0,
        }
    }
}

/// A sync protocol message.
///
/// Requests map one-to-one onto the peer operations; each has a
/// matching response variant. Any request may be answered with
/// [`SyncMessage::Error`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncMessage {
    /// Opens a session.
    BeginSync {
        /// Session id chosen by the engine.
        session_id: Uuid,
        /// Pass options.
        options: SyncOptions,
    },
    /// Session opened.
    Session(SyncSession),
    /// Requests a page of changes.
    GetChanges {
        /// Session id.
        session_id: Uuid,
        /// Window and page.
        request: SyncRequest,
    },
    /// A page of changes, or a set of corrections.
    Objects(ServiceResult<SyncObject>),
    /// Applies a batch of changes.
    ApplyChanges {
        /// Session id.
        session_id: Uuid,
        /// The batch.
        request: ServiceRequest<SyncObject>,
    },
    /// Requests corrections for issues the other side reported.
    GetCorrections {
        /// Session id.
        session_id: Uuid,
        /// Issues to correct.
        request: ServiceRequest<SyncIssue>,
    },
    /// Applies a batch of corrections.
    ApplyCorrections {
        /// Session id.
        session_id: Uuid,
        /// The batch.
        request: ServiceRequest<SyncObject>,
    },
    /// Issues produced by an apply call.
    Issues(ServiceResult<SyncIssue>),
    /// Closes a session.
    EndSync(SyncSession),
    /// Adjusts session options.
    UpdateOptions {
        /// Session id.
        session_id: Uuid,
        /// New options.
        options: SyncClientOptions,
    },
    /// Success with no payload.
    Ack,
    /// Failure reported by the remote side.
    Error {
        /// Description of the failure.
        message: String,
    },
}

impl SyncMessage {
    /// Returns the message type code.
    pub fn type_code(&self) -> u8 {
        match self {
            SyncMessage::BeginSync { .. } => 1,
            SyncMessage::Session(_) => 2,
            SyncMessage::GetChanges { .. } => 3,
            SyncMessage::Objects(_) => 4,
            SyncMessage::ApplyChanges { .. } => 5,
            SyncMessage::GetCorrections { .. } => 6,
            SyncMessage::ApplyCorrections { .. } => 7,
            SyncMessage::Issues(_) => 8,
            SyncMessage::EndSync(_) => 9,
            SyncMessage::UpdateOptions { .. } => 10,
            SyncMessage::Ack => 11,
            SyncMessage::Error { .. } => 12,
        }
    }

    /// Returns the operation name, used as the transport path segment.
    pub fn operation(&self) -> &'static str {
        match self {
            SyncMessage::BeginSync { .. } => "begin_sync",
            SyncMessage::Session(_) => "session",
            SyncMessage::GetChanges { .. } => "get_changes",
            SyncMessage::Objects(_) => "objects",
            SyncMessage::ApplyChanges { .. } => "apply_changes",
            SyncMessage::GetCorrections { .. } => "get_corrections",
            SyncMessage::ApplyCorrections { .. } => "apply_corrections",
            SyncMessage::Issues(_) => "issues",
            SyncMessage::EndSync(_) => "end_sync",
            SyncMessage::UpdateOptions { .. } => "update_options",
            SyncMessage::Ack => "ack",
            SyncMessage::Error { .. } => "error",
        }
    }

    /// Returns true for request variants.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            SyncMessage::BeginSync { .. }
                | SyncMessage::GetChanges { .. }
                | SyncMessage::ApplyChanges { .. }
                | SyncMessage::GetCorrections { .. }
                | SyncMessage::ApplyCorrections { .. }
                | SyncMessage::EndSync(_)
                | SyncMessage::UpdateOptions { .. }
        )
    }

    /// Creates an error response.
    pub fn error(message: impl Into<String>) -> Self {
        SyncMessage::Error {
            message: message.into(),
        }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        to_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        from_cbor(bytes)
    }

    /// Fails if this is an error response.
    pub fn into_ok(self) -> ProtocolResult<Self> {
        match self {
            SyncMessage::Error { message } => Err(ProtocolError::Remote { message }),
            other => Ok(other),
        }
    }

    /// Builds the mismatch error for a response that answers the wrong request.
    pub fn unexpected(&self, expected: &'static str) -> ProtocolError {
        ProtocolError::UnexpectedMessage {
            expected,
            actual: self.operation(),
        }
    }
}
