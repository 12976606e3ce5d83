//! Repository adapter contract.
//!
//! A repository gives per-type access to a physical store. The sync core
//! never touches storage directly; everything it needs goes through the
//! methods below.

use crate::clock::Timestamp;
use crate::entity::{SyncableEntity, Tombstone};
use crate::error::CoreResult;
use crate::id::{LocalId, ReplicaId, StableId};

/// Half-open time window `(since, until]` over the store-local change
/// stamp (see [`crate::EntityHeader::change_stamp`]).
///
/// `since == None` means "from the beginning". Rows received from the
/// `excluding` replica are left out: that replica already holds them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeWindow {
    /// Exclusive lower bound.
    pub since: Option<Timestamp>,
    /// Inclusive upper bound.
    pub until: Timestamp,
    /// Replica whose deliveries are left out.
    pub excluding: Option<ReplicaId>,
}

impl ChangeWindow {
    /// Creates a window.
    pub fn new(since: Option<Timestamp>, until: Timestamp) -> Self {
        Self {
            since,
            until,
            excluding: None,
        }
    }

    /// Leaves out rows received from `replica`.
    #[must_use]
    pub fn excluding(mut self, replica: Option<ReplicaId>) -> Self {
        self.excluding = replica;
        self
    }

    /// Returns true if `at` falls inside the window.
    pub fn contains(&self, at: Timestamp) -> bool {
        at <= self.until && self.since.map_or(true, |since| at > since)
    }

    /// Returns true if a row with the given change stamp and sender belongs
    /// to the window.
    pub fn admits(&self, stamp: Timestamp, received_from: Option<ReplicaId>) -> bool {
        self.contains(stamp) && (self.excluding.is_none() || received_from != self.excluding)
    }

    /// Returns true if the window cannot contain anything.
    pub fn is_empty(&self) -> bool {
        self.since.is_some_and(|since| since >= self.until)
    }
}

/// Page position inside a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    /// Number of matches to skip.
    pub skip: usize,
    /// Maximum number of matches to return.
    pub take: usize,
}

impl Page {
    /// Every match, no paging.
    pub const ALL: Page = Page {
        skip: 0,
        take: usize::MAX,
    };

    /// Creates a page.
    pub fn new(skip: usize, take: usize) -> Self {
        Self { skip, take }
    }
}

/// Per-type access to a physical store.
///
/// # Invariants
///
/// - `change_count` and `changes` select with [`ChangeWindow::admits`] on
///   each row's `change_stamp()` and `received_from`.
/// - `changes` returns entities ordered by `(change_stamp, stable_id)`
///   ascending, so paging with `skip` is stable for a fixed window.
/// - `add` is an upsert keyed by stable id. A new entity gets a fresh local
///   id; an existing one keeps its local id. Header fields, timestamps
///   included, are stored as given.
/// - `add` returns the entity as stored, with its local id set.
pub trait Repository<T: SyncableEntity>: Send + Sync {
    /// Counts entities modified inside the window.
    fn change_count(&self, window: ChangeWindow) -> CoreResult<usize>;

    /// Returns entities modified inside the window.
    fn changes(&self, window: ChangeWindow, page: Page) -> CoreResult<Vec<T>>;

    /// Reads an entity by stable id.
    fn read(&self, stable_id: StableId) -> CoreResult<Option<T>>;

    /// Reads an entity by local id.
    fn read_local(&self, local_id: LocalId) -> CoreResult<Option<T>>;

    /// Adds or updates an entity.
    fn add(&self, entity: T) -> CoreResult<T>;

    /// Removes an entity by stable id, returning the removed copy.
    fn remove(&self, stable_id: StableId) -> CoreResult<Option<T>>;

    /// Enumerates every `(stable id, local id)` pair in the store.
    fn read_all_keys(&self) -> CoreResult<Vec<(StableId, LocalId)>>;

    /// Authoritative stable-to-local lookup. Defaults to a full read.
    fn local_id_of(&self, stable_id: StableId) -> CoreResult<Option<LocalId>> {
        Ok(self.read(stable_id)?.and_then(|entity| entity.local_id()))
    }
}

/// Storage for tombstones of [`crate::DeletePolicy::Propagate`] types.
pub trait TombstoneRepository: Send + Sync {
    /// Records a tombstone, replacing any earlier one for the same entity.
    fn add(&self, tombstone: Tombstone) -> CoreResult<()>;

    /// Returns tombstones the window admits for the given types, ordered by
    /// `(change_stamp, stable_id)`.
    fn changes(&self, window: ChangeWindow, type_names: &[&str]) -> CoreResult<Vec<Tombstone>>;

    /// Drops the tombstone for an entity that was re-created.
    fn remove(&self, type_name: &str, stable_id: StableId) -> CoreResult<bool>;

    /// Drops tombstones created at or before `cutoff`. Returns how many were removed.
    fn purge(&self, cutoff: Timestamp) -> CoreResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn window_bounds() {
        let t0 = Utc::now();
        let t1 = t0 + Duration::seconds(1);
        let t2 = t0 + Duration::seconds(2);

        let window = ChangeWindow::new(Some(t0), t1);
        assert!(!window.contains(t0), "lower bound is exclusive");
        assert!(window.contains(t1), "upper bound is inclusive");
        assert!(!window.contains(t2));

        let open = ChangeWindow::new(None, t1);
        assert!(open.contains(t0));
        assert!(open.contains(t1));
    }

    #[test]
    fn excluded_replica_is_left_out() {
        let t0 = Utc::now();
        let peer = ReplicaId::new();
        let window = ChangeWindow::new(None, t0).excluding(Some(peer));

        assert!(window.admits(t0, None));
        assert!(window.admits(t0, Some(ReplicaId::new())));
        assert!(!window.admits(t0, Some(peer)));
        assert!(!window.admits(t0 + Duration::seconds(1), None));
        assert!(ChangeWindow::new(None, t0).admits(t0, Some(peer)));
    }

    #[test]
    fn empty_window() {
        let t0 = Utc::now();
        assert!(ChangeWindow::new(Some(t0), t0).is_empty());
        assert!(!ChangeWindow::new(None, t0).is_empty());
        assert!(!ChangeWindow::new(Some(t0 - Duration::seconds(1)), t0).is_empty());
    }
}
