//! The syncable entity contract.
//!
//! A syncable entity carries two independent keys: a store-assigned
//! [`LocalId`] and a [`StableId`] that is equal across stores. Every
//! relationship is likewise a pair, see [`ForeignKey`]. Only the stable half
//! of each pair ever crosses a store boundary.

use crate::clock::Timestamp;
use crate::id::{LocalId, ReplicaId, StableId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// How deletions of an entity type are handled during sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletePolicy {
    /// Deleting removes the local copy only; the other store keeps its copy.
    LocalOnly,
    /// Deleting records a tombstone that removes the entity from other stores.
    Propagate,
}

impl DeletePolicy {
    /// Returns true if deletions of this type are written as tombstones.
    pub fn propagates(&self) -> bool {
        matches!(self, DeletePolicy::Propagate)
    }
}

/// Bookkeeping fields shared by every syncable entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityHeader {
    /// Globally unique id, immutable once assigned.
    pub stable_id: StableId,
    /// Store-assigned key, `None` until the entity is first saved.
    #[serde(default)]
    pub local_id: Option<LocalId>,
    /// When the entity was created, on the clock of the store that created it.
    pub created_on: Timestamp,
    /// When the entity was last modified.
    pub modified_on: Timestamp,
    /// Soft-delete flag.
    #[serde(default)]
    pub is_deleted: bool,
    /// When this copy was last written into the store holding it, on that
    /// store's clock. Store-local; change windows select on it.
    #[serde(default)]
    pub stored_on: Option<Timestamp>,
    /// Replica that delivered this copy, `None` for local writes. Store-local.
    #[serde(default)]
    pub received_from: Option<ReplicaId>,
}

impl EntityHeader {
    /// Creates a header for a new entity with a fresh stable id.
    pub fn new(now: Timestamp) -> Self {
        Self::with_stable_id(StableId::new(), now)
    }

    /// Creates a header for a new entity with the given stable id.
    pub fn with_stable_id(stable_id: StableId, now: Timestamp) -> Self {
        Self {
            stable_id,
            local_id: None,
            created_on: now,
            modified_on: now,
            is_deleted: false,
            stored_on: None,
            received_from: None,
        }
    }

    /// The timestamp change windows select on: `stored_on` once the copy
    /// has been stored, `modified_on` before that.
    pub fn change_stamp(&self) -> Timestamp {
        self.stored_on.unwrap_or(self.modified_on)
    }
}

/// One relationship field pair: the local foreign key and the stable id of
/// the related entity.
///
/// A nil stable id means the relationship is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ForeignKey {
    /// Local key of the related entity in the store holding this copy.
    #[serde(default)]
    pub local_id: Option<LocalId>,
    /// Stable id of the related entity.
    #[serde(default)]
    pub stable_id: StableId,
}

impl ForeignKey {
    /// An absent relationship.
    pub const NONE: ForeignKey = ForeignKey {
        local_id: None,
        stable_id: StableId::NIL,
    };

    /// A relationship known only by its stable id.
    pub fn to_stable(stable_id: StableId) -> Self {
        Self {
            local_id: None,
            stable_id,
        }
    }

    /// A relationship known only by its local key.
    pub fn to_local(local_id: LocalId) -> Self {
        Self {
            local_id: Some(local_id),
            stable_id: StableId::NIL,
        }
    }

    /// Returns true if neither half of the pair is set.
    pub fn is_absent(&self) -> bool {
        self.stable_id.is_nil() && self.local_id.is_none()
    }

    /// Clears both halves of the pair.
    pub fn clear(&mut self) {
        *self = Self::NONE;
    }
}

/// Mutable view of one relationship field pair on an entity.
#[derive(Debug)]
pub struct RelationshipMut<'a> {
    /// Field name, used in issue messages.
    pub name: &'static str,
    /// Type name of the related entity's repository.
    pub target: &'static str,
    /// The field pair itself.
    pub key: &'a mut ForeignKey,
}

/// Read-only view of one relationship field pair on an entity.
#[derive(Debug, Clone, Copy)]
pub struct Relationship {
    /// Field name.
    pub name: &'static str,
    /// Type name of the related entity's repository.
    pub target: &'static str,
    /// The field pair.
    pub key: ForeignKey,
}

/// An entity that can be synchronized between stores.
///
/// # Example
///
/// ```
/// use mirrorsync_core::{
///     DeletePolicy, EntityHeader, ForeignKey, Relationship, RelationshipMut, SyncableEntity,
/// };
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Account {
///     header: EntityHeader,
///     name: String,
///     address: ForeignKey,
/// }
///
/// impl SyncableEntity for Account {
///     const TYPE_NAME: &'static str = "account";
///     const DELETE_POLICY: DeletePolicy = DeletePolicy::Propagate;
///
///     fn header(&self) -> &EntityHeader { &self.header }
///     fn header_mut(&mut self) -> &mut EntityHeader { &mut self.header }
///
///     fn relationships(&self) -> Vec<Relationship> {
///         vec![Relationship { name: "address", target: "address", key: self.address }]
///     }
///
///     fn relationships_mut(&mut self) -> Vec<RelationshipMut<'_>> {
///         vec![RelationshipMut { name: "address", target: "address", key: &mut self.address }]
///     }
/// }
/// ```
pub trait SyncableEntity: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    /// Routing tag used on the wire. Must be unique within a store.
    const TYPE_NAME: &'static str;

    /// Whether hard deletions of this type are propagated.
    const DELETE_POLICY: DeletePolicy = DeletePolicy::LocalOnly;

    /// Returns the bookkeeping header.
    fn header(&self) -> &EntityHeader;

    /// Returns the bookkeeping header mutably.
    fn header_mut(&mut self) -> &mut EntityHeader;

    /// Returns the relationship field pairs.
    fn relationships(&self) -> Vec<Relationship> {
        Vec::new()
    }

    /// Returns mutable views of the relationship field pairs.
    fn relationships_mut(&mut self) -> Vec<RelationshipMut<'_>> {
        Vec::new()
    }

    /// Shorthand for the stable id.
    fn stable_id(&self) -> StableId {
        self.header().stable_id
    }

    /// Shorthand for the local id.
    fn local_id(&self) -> Option<LocalId> {
        self.header().local_id
    }

    /// Returns a copy with every local key removed, the shape that is sent
    /// to another store.
    fn without_local_keys(&self) -> Self {
        let mut copy = self.clone();
        let header = copy.header_mut();
        header.local_id = None;
        header.stored_on = None;
        header.received_from = None;
        for link in copy.relationships_mut() {
            link.key.local_id = None;
        }
        copy
    }
}

/// Reference to an entity by routing type and stable id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityRef {
    /// Type name of the entity's repository.
    pub type_name: String,
    /// Stable id of the entity.
    pub stable_id: StableId,
}

impl EntityRef {
    /// Creates an entity reference.
    pub fn new(type_name: impl Into<String>, stable_id: StableId) -> Self {
        Self {
            type_name: type_name.into(),
            stable_id,
        }
    }

    /// Creates a reference to the given entity.
    pub fn of<T: SyncableEntity>(entity: &T) -> Self {
        Self::new(T::TYPE_NAME, entity.stable_id())
    }
}

/// Persisted marker of a hard deletion, kept for types whose
/// [`DeletePolicy`] is [`DeletePolicy::Propagate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tombstone {
    /// Stable id of the deleted entity.
    pub stable_id: StableId,
    /// Type name of the deleted entity.
    pub type_name: String,
    /// String form of the deleted entity's local key.
    pub reference_id: String,
    /// When the deletion happened.
    pub created_on: Timestamp,
    /// When this tombstone was stored locally. Store-local.
    #[serde(default)]
    pub stored_on: Option<Timestamp>,
    /// Replica that delivered this tombstone, `None` for local deletions.
    /// Store-local.
    #[serde(default)]
    pub received_from: Option<ReplicaId>,
}

impl Tombstone {
    /// Creates a tombstone for an entity that was just removed.
    pub fn for_entity<T: SyncableEntity>(entity: &T, now: Timestamp) -> Self {
        Self {
            stable_id: entity.stable_id(),
            type_name: T::TYPE_NAME.to_string(),
            reference_id: entity
                .local_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            created_on: now,
            stored_on: Some(now),
            received_from: None,
        }
    }

    /// The timestamp change windows select on.
    pub fn change_stamp(&self) -> Timestamp {
        self.stored_on.unwrap_or(self.created_on)
    }

    /// Returns a copy without store-local fields, the shape that is sent to
    /// another store.
    pub fn without_local_fields(&self) -> Self {
        Self {
            reference_id: String::new(),
            stored_on: None,
            received_from: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Child {
        header: EntityHeader,
        parent: ForeignKey,
    }

    impl SyncableEntity for Child {
        const TYPE_NAME: &'static str = "child";

        fn header(&self) -> &EntityHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut EntityHeader {
            &mut self.header
        }

        fn relationships(&self) -> Vec<Relationship> {
            vec![Relationship {
                name: "parent",
                target: "parent",
                key: self.parent,
            }]
        }

        fn relationships_mut(&mut self) -> Vec<RelationshipMut<'_>> {
            vec![RelationshipMut {
                name: "parent",
                target: "parent",
                key: &mut self.parent,
            }]
        }
    }

    #[test]
    fn default_delete_policy_is_local_only() {
        assert_eq!(Child::DELETE_POLICY, DeletePolicy::LocalOnly);
        assert!(!Child::DELETE_POLICY.propagates());
        assert!(DeletePolicy::Propagate.propagates());
    }

    #[test]
    fn without_local_keys_strips_both_levels() {
        let mut header = EntityHeader::new(Utc::now());
        header.local_id = Some(LocalId::new(3));
        header.stored_on = Some(Utc::now());
        header.received_from = Some(ReplicaId::new());
        let child = Child {
            header,
            parent: ForeignKey {
                local_id: Some(LocalId::new(9)),
                stable_id: StableId::new(),
            },
        };

        let wire = child.without_local_keys();
        assert_eq!(wire.local_id(), None);
        assert_eq!(wire.parent.local_id, None);
        assert_eq!(wire.parent.stable_id, child.parent.stable_id);
        assert_eq!(wire.stable_id(), child.stable_id());
        assert_eq!(wire.header.stored_on, None);
        assert_eq!(wire.header.received_from, None);
        assert_eq!(wire.header.change_stamp(), wire.header.modified_on);
    }

    #[test]
    fn foreign_key_states() {
        assert!(ForeignKey::NONE.is_absent());
        assert!(!ForeignKey::to_local(LocalId::new(1)).is_absent());

        let mut key = ForeignKey::to_stable(StableId::new());
        assert!(!key.is_absent());
        key.clear();
        assert!(key.is_absent());
    }

    #[test]
    fn tombstone_records_local_key() {
        let mut header = EntityHeader::new(Utc::now());
        header.local_id = Some(LocalId::new(12));
        let child = Child {
            header,
            parent: ForeignKey::NONE,
        };

        let now = Utc::now();
        let tombstone = Tombstone::for_entity(&child, now);
        assert_eq!(tombstone.type_name, "child");
        assert_eq!(tombstone.reference_id, "12");
        assert_eq!(tombstone.stable_id, child.stable_id());
        assert_eq!(tombstone.created_on, now);
        assert_eq!(tombstone.change_stamp(), now);

        let wire = tombstone.without_local_fields();
        assert!(wire.reference_id.is_empty());
        assert_eq!(wire.stored_on, None);
        assert_eq!(wire.created_on, now);
    }
}
