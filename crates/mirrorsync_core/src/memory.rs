//! In-memory repository adapters.
//!
//! These adapters are the reference implementation of [`Repository`] and
//! [`TombstoneRepository`]. They are suitable for:
//! - Unit and integration tests
//! - Ephemeral stores that don't need persistence
//!
//! # Thread Safety
//!
//! Both adapters are thread-safe and can be shared across threads.

use crate::clock::Timestamp;
use crate::entity::{SyncableEntity, Tombstone};
use crate::error::{CoreError, CoreResult};
use crate::id::{LocalId, StableId};
use crate::repository::{ChangeWindow, Page, Repository, TombstoneRepository};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// An in-memory repository for one entity type.
///
/// Local ids are assigned from a per-repository counter, so two repositories
/// for the same type assign unrelated local ids, just like two real stores.
///
/// # Example
///
/// ```rust,ignore
/// use mirrorsync_core::{MemoryRepository, Repository};
///
/// let addresses = MemoryRepository::<Address>::new();
/// let stored = addresses.add(address)?;
/// assert!(stored.local_id().is_some());
/// ```
pub struct MemoryRepository<T: SyncableEntity> {
    rows: RwLock<BTreeMap<LocalId, T>>,
    by_stable_id: RwLock<HashMap<StableId, LocalId>>,
    next_local_id: AtomicI64,
    reads: AtomicU64,
}

impl<T: SyncableEntity> MemoryRepository<T> {
    /// Creates an empty repository whose first local id is 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Creates an empty repository whose first local id is `first`.
    ///
    /// Starting two stores at different offsets makes local-id mix-ups
    /// visible in tests.
    pub fn starting_at(first: i64) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            by_stable_id: RwLock::new(HashMap::new()),
            next_local_id: AtomicI64::new(first),
            reads: AtomicU64::new(0),
        }
    }

    /// Returns the number of stored entities.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if the repository is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns a snapshot of every stored entity in local-id order.
    pub fn all(&self) -> Vec<T> {
        self.rows.read().values().cloned().collect()
    }

    /// Returns how many point reads (`read`, `read_local`, `local_id_of`)
    /// were served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn window_matches(&self, window: ChangeWindow) -> Vec<T> {
        if window.is_empty() {
            return Vec::new();
        }
        let mut matches: Vec<T> = self
            .rows
            .read()
            .values()
            .filter(|entity| admits(window, *entity))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            a.header()
                .change_stamp()
                .cmp(&b.header().change_stamp())
                .then_with(|| a.stable_id().cmp(&b.stable_id()))
        });
        matches
    }
}

fn admits<T: SyncableEntity>(window: ChangeWindow, entity: &T) -> bool {
    let header = entity.header();
    window.admits(header.change_stamp(), header.received_from)
}

impl<T: SyncableEntity> Default for MemoryRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: SyncableEntity> Repository<T> for MemoryRepository<T> {
    fn change_count(&self, window: ChangeWindow) -> CoreResult<usize> {
        if window.is_empty() {
            return Ok(0);
        }
        Ok(self
            .rows
            .read()
            .values()
            .filter(|entity| admits(window, *entity))
            .count())
    }

    fn changes(&self, window: ChangeWindow, page: Page) -> CoreResult<Vec<T>> {
        Ok(self
            .window_matches(window)
            .into_iter()
            .skip(page.skip)
            .take(page.take)
            .collect())
    }

    fn read(&self, stable_id: StableId) -> CoreResult<Option<T>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let local_id = match self.by_stable_id.read().get(&stable_id) {
            Some(local_id) => *local_id,
            None => return Ok(None),
        };
        Ok(self.rows.read().get(&local_id).cloned())
    }

    fn read_local(&self, local_id: LocalId) -> CoreResult<Option<T>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.rows.read().get(&local_id).cloned())
    }

    fn add(&self, mut entity: T) -> CoreResult<T> {
        let stable_id = entity.stable_id();
        if stable_id.is_nil() {
            return Err(CoreError::MissingStableId {
                type_name: T::TYPE_NAME.to_string(),
            });
        }

        let mut index = self.by_stable_id.write();
        let local_id = match index.get(&stable_id) {
            Some(existing) => *existing,
            None => {
                let assigned = LocalId::new(self.next_local_id.fetch_add(1, Ordering::SeqCst));
                index.insert(stable_id, assigned);
                assigned
            }
        };

        entity.header_mut().local_id = Some(local_id);
        self.rows.write().insert(local_id, entity.clone());
        Ok(entity)
    }

    fn remove(&self, stable_id: StableId) -> CoreResult<Option<T>> {
        let local_id = match self.by_stable_id.write().remove(&stable_id) {
            Some(local_id) => local_id,
            None => return Ok(None),
        };
        Ok(self.rows.write().remove(&local_id))
    }

    fn read_all_keys(&self) -> CoreResult<Vec<(StableId, LocalId)>> {
        Ok(self
            .by_stable_id
            .read()
            .iter()
            .map(|(stable_id, local_id)| (*stable_id, *local_id))
            .collect())
    }

    fn local_id_of(&self, stable_id: StableId) -> CoreResult<Option<LocalId>> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Ok(self.by_stable_id.read().get(&stable_id).copied())
    }
}

/// An in-memory tombstone store.
#[derive(Debug, Default)]
pub struct MemoryTombstones {
    tombstones: RwLock<HashMap<(String, StableId), Tombstone>>,
}

impl MemoryTombstones {
    /// Creates an empty tombstone store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tombstones held.
    pub fn len(&self) -> usize {
        self.tombstones.read().len()
    }

    /// Returns true if no tombstones are held.
    pub fn is_empty(&self) -> bool {
        self.tombstones.read().is_empty()
    }
}

impl TombstoneRepository for MemoryTombstones {
    fn add(&self, tombstone: Tombstone) -> CoreResult<()> {
        let key = (tombstone.type_name.clone(), tombstone.stable_id);
        self.tombstones.write().insert(key, tombstone);
        Ok(())
    }

    fn changes(&self, window: ChangeWindow, type_names: &[&str]) -> CoreResult<Vec<Tombstone>> {
        if window.is_empty() {
            return Ok(Vec::new());
        }
        let mut matches: Vec<Tombstone> = self
            .tombstones
            .read()
            .values()
            .filter(|t| window.admits(t.change_stamp(), t.received_from))
            .filter(|t| type_names.contains(&t.type_name.as_str()))
            .cloned()
            .collect();
        matches.sort_by(|a, b| {
            a.change_stamp()
                .cmp(&b.change_stamp())
                .then_with(|| a.stable_id.cmp(&b.stable_id))
        });
        Ok(matches)
    }

    fn remove(&self, type_name: &str, stable_id: StableId) -> CoreResult<bool> {
        Ok(self
            .tombstones
            .write()
            .remove(&(type_name.to_string(), stable_id))
            .is_some())
    }

    fn purge(&self, cutoff: Timestamp) -> CoreResult<usize> {
        let mut tombstones = self.tombstones.write();
        let before = tombstones.len();
        tombstones.retain(|_, t| t.created_on > cutoff);
        Ok(before - tombstones.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::EntityHeader;
    use crate::id::ReplicaId;
    use chrono::{Duration, Utc};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        header: EntityHeader,
        text: String,
    }

    impl SyncableEntity for Note {
        const TYPE_NAME: &'static str = "note";

        fn header(&self) -> &EntityHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut EntityHeader {
            &mut self.header
        }
    }

    fn note_at(text: &str, at: Timestamp) -> Note {
        Note {
            header: EntityHeader::new(at),
            text: text.into(),
        }
    }

    #[test]
    fn add_assigns_local_ids() {
        let repo = MemoryRepository::<Note>::starting_at(100);
        let a = repo.add(note_at("a", Utc::now())).unwrap();
        let b = repo.add(note_at("b", Utc::now())).unwrap();

        assert_eq!(a.local_id(), Some(LocalId::new(100)));
        assert_eq!(b.local_id(), Some(LocalId::new(101)));
        assert_eq!(repo.len(), 2);
    }

    #[test]
    fn add_is_upsert_by_stable_id() {
        let repo = MemoryRepository::<Note>::new();
        let mut stored = repo.add(note_at("first", Utc::now())).unwrap();
        let local_id = stored.local_id();

        stored.text = "second".into();
        stored.header.local_id = None;
        let updated = repo.add(stored.clone()).unwrap();

        assert_eq!(updated.local_id(), local_id);
        assert_eq!(repo.len(), 1);
        assert_eq!(repo.read(stored.stable_id()).unwrap().unwrap().text, "second");
    }

    #[test]
    fn add_rejects_nil_stable_id() {
        let repo = MemoryRepository::<Note>::new();
        let mut note = note_at("x", Utc::now());
        note.header.stable_id = StableId::NIL;
        assert!(matches!(
            repo.add(note),
            Err(CoreError::MissingStableId { .. })
        ));
    }

    #[test]
    fn changes_are_windowed_and_ordered() {
        let repo = MemoryRepository::<Note>::new();
        let t0 = Utc::now();
        for i in 0..5 {
            repo.add(note_at(&format!("n{i}"), t0 + Duration::seconds(i)))
                .unwrap();
        }

        let window = ChangeWindow::new(Some(t0), t0 + Duration::seconds(3));
        assert_eq!(repo.change_count(window).unwrap(), 3);

        let texts: Vec<String> = repo
            .changes(window, Page::ALL)
            .unwrap()
            .into_iter()
            .map(|n| n.text)
            .collect();
        assert_eq!(texts, vec!["n1", "n2", "n3"]);

        let page: Vec<String> = repo
            .changes(window, Page::new(1, 1))
            .unwrap()
            .into_iter()
            .map(|n| n.text)
            .collect();
        assert_eq!(page, vec!["n2"]);
    }

    #[test]
    fn changes_select_on_stored_on_and_sender() {
        let repo = MemoryRepository::<Note>::new();
        let t0 = Utc::now();
        let peer = ReplicaId::new();

        let mut relayed = note_at("relayed", t0 - Duration::days(1));
        relayed.header.stored_on = Some(t0 + Duration::seconds(2));
        repo.add(relayed).unwrap();
        let mut echoed = note_at("echoed", t0 - Duration::days(1));
        echoed.header.stored_on = Some(t0 + Duration::seconds(3));
        echoed.header.received_from = Some(peer);
        repo.add(echoed).unwrap();

        let window = ChangeWindow::new(Some(t0), t0 + Duration::seconds(5));
        assert_eq!(repo.change_count(window).unwrap(), 2);

        let window = window.excluding(Some(peer));
        assert_eq!(repo.change_count(window).unwrap(), 1);
        let texts: Vec<String> = repo
            .changes(window, Page::ALL)
            .unwrap()
            .into_iter()
            .map(|n| n.text)
            .collect();
        assert_eq!(texts, vec!["relayed"]);
    }

    #[test]
    fn remove_and_keys() {
        let repo = MemoryRepository::<Note>::new();
        let a = repo.add(note_at("a", Utc::now())).unwrap();
        let b = repo.add(note_at("b", Utc::now())).unwrap();

        let mut keys = repo.read_all_keys().unwrap();
        keys.sort();
        assert_eq!(keys.len(), 2);

        let removed = repo.remove(a.stable_id()).unwrap();
        assert_eq!(removed.map(|n| n.text), Some("a".to_string()));
        assert!(repo.read(a.stable_id()).unwrap().is_none());
        assert_eq!(repo.local_id_of(b.stable_id()).unwrap(), b.local_id());
        assert!(repo.remove(a.stable_id()).unwrap().is_none());
    }

    #[test]
    fn tombstones_window_and_purge() {
        let store = MemoryTombstones::new();
        let t0 = Utc::now();
        for i in 0..3 {
            store
                .add(Tombstone {
                    stable_id: StableId::new(),
                    type_name: (if i == 2 { "other" } else { "note" }).to_string(),
                    reference_id: i.to_string(),
                    created_on: t0 + Duration::seconds(i),
                    stored_on: None,
                    received_from: None,
                })
                .unwrap();
        }

        let window = ChangeWindow::new(None, t0 + Duration::seconds(10));
        assert_eq!(store.changes(window, &["note"]).unwrap().len(), 2);
        assert_eq!(store.changes(window, &["note", "other"]).unwrap().len(), 3);

        assert_eq!(store.purge(t0).unwrap(), 1);
        assert_eq!(store.len(), 2);
    }
}
