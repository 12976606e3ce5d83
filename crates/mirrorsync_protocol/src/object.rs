//! Sync objects: the wire snapshot of one entity.

use crate::codec::{from_cbor, to_cbor};
use crate::error::{ProtocolError, ProtocolResult};
use mirrorsync_core::{StableId, SyncableEntity, Tombstone};
use serde::{Deserialize, Serialize};

/// What happened to the entity a [`SyncObject`] describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStatus {
    /// Created inside the window and not modified since.
    Added,
    /// Modified after creation.
    Modified,
    /// Hard-deleted; the payload is a tombstone.
    Deleted,
}

impl SyncStatus {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            SyncStatus::Added => 1,
            SyncStatus::Modified => 2,
            SyncStatus::Deleted => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(SyncStatus::Added),
            2 => Some(SyncStatus::Modified),
            3 => Some(SyncStatus::Deleted),
            _ => None,
        }
    }
}

/// Wire snapshot of one entity plus routing metadata.
///
/// `data` is the CBOR encoding of the entity with every local key stripped,
/// or of a [`Tombstone`] when `status` is [`SyncStatus::Deleted`]. The
/// receiver needs nothing beyond its type registry to route and decode it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncObject {
    /// Stable id of the entity.
    pub stable_id: StableId,
    /// Routing tag.
    pub type_name: String,
    /// Encoded payload.
    pub data: Vec<u8>,
    /// Change status.
    pub status: SyncStatus,
}

impl SyncObject {
    /// Snapshots an entity. Local keys are removed before encoding.
    pub fn from_entity<T: SyncableEntity>(entity: &T) -> ProtocolResult<Self> {
        let header = entity.header();
        let status = if header.created_on == header.modified_on {
            SyncStatus::Added
        } else {
            SyncStatus::Modified
        };
        Ok(Self {
            stable_id: entity.stable_id(),
            type_name: T::TYPE_NAME.to_string(),
            data: to_cbor(&entity.without_local_keys())?,
            status,
        })
    }

    /// Snapshots a deletion.
    pub fn from_tombstone(tombstone: &Tombstone) -> ProtocolResult<Self> {
        Ok(Self {
            stable_id: tombstone.stable_id,
            type_name: tombstone.type_name.clone(),
            data: to_cbor(&tombstone.without_local_fields())?,
            status: SyncStatus::Deleted,
        })
    }

    /// Decodes the payload as an entity of type `T`.
    pub fn to_entity<T: SyncableEntity>(&self) -> ProtocolResult<T> {
        if self.type_name != T::TYPE_NAME {
            return Err(ProtocolError::TypeMismatch {
                expected: T::TYPE_NAME.to_string(),
                actual: self.type_name.clone(),
            });
        }
        if self.status == SyncStatus::Deleted {
            return Err(ProtocolError::codec("deleted object carries no entity"));
        }
        from_cbor(&self.data)
    }

    /// Decodes the payload of a deleted object.
    pub fn to_tombstone(&self) -> ProtocolResult<Tombstone> {
        if self.status != SyncStatus::Deleted {
            return Err(ProtocolError::codec("object is not a deletion"));
        }
        from_cbor(&self.data)
    }

    /// Returns true if this object describes a deletion.
    pub fn is_deletion(&self) -> bool {
        self.status == SyncStatus::Deleted
    }
}
