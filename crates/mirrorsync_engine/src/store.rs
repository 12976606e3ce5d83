//! Sync stores.
//!
//! A [`SyncStore`] bundles everything one side of a sync needs: the
//! repository registry, the identifier cache, the store clock, tombstone
//! storage, and save hooks. Local writes go through [`SyncStore::save`] and
//! [`SyncStore::remove`]; incoming objects go through the peer, which routes
//! them back here.

use crate::error::SyncResult;
use crate::registry::{ErasedRepository, RepositoryRegistry};
use crate::resolver;
use crate::stats::StoreStats;
use mirrorsync_core::{
    save_until_stable, CacheConfig, ChangeWindow, Clock, CoreError, CoreResult, EntityRef,
    FilterSet, IdentifierCache, KeySource, LocalId, MemoryTombstones, Page, ReplicaId, Repository,
    StableId,
    SyncableEntity, SystemClock, Timestamp, Tombstone, TombstoneRepository, MAX_SAVE_PASSES,
};
use mirrorsync_protocol::{SyncClientOptions, SyncIssue, SyncIssueType, SyncObject, SyncOptions};
use std::collections::BTreeSet;
use std::sync::Arc;

/// What happened to one incoming object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The object was written.
    Applied,
    /// The object was not written; the local copy is as new or newer, or
    /// there was nothing to delete.
    Skipped,
    /// The object could not be applied.
    Issue(SyncIssue),
}

/// Runs after every save and names entities that must be re-saved.
///
/// Returned entities are touched (re-saved with a fresh `modified_on`) and
/// fed back into the hooks, up to [`MAX_SAVE_PASSES`] passes in total.
pub trait SaveHook: Send + Sync {
    /// Called after `saved` was written.
    fn after_save(&self, store: &SyncStore, saved: &EntityRef) -> CoreResult<Vec<EntityRef>>;
}

/// One side of a sync.
pub struct SyncStore {
    name: String,
    replica_id: ReplicaId,
    registry: RepositoryRegistry,
    cache: Arc<IdentifierCache>,
    clock: Arc<dyn Clock>,
    tombstones: Arc<dyn TombstoneRepository>,
    hooks: Vec<Arc<dyn SaveHook>>,
    stats: StoreStats,
}

/// Builder for [`SyncStore`].
pub struct SyncStoreBuilder {
    name: String,
    replica_id: ReplicaId,
    registry: RepositoryRegistry,
    cache: Option<Arc<IdentifierCache>>,
    cache_config: CacheConfig,
    clock: Arc<dyn Clock>,
    tombstones: Option<Arc<dyn TombstoneRepository>>,
    hooks: Vec<Arc<dyn SaveHook>>,
}

impl SyncStoreBuilder {
    /// Sets the replica id. Defaults to a fresh one; a persistent store
    /// must reuse the id it was first given.
    #[must_use]
    pub fn with_replica_id(mut self, replica_id: ReplicaId) -> Self {
        self.replica_id = replica_id;
        self
    }

    /// Sets the store clock. Defaults to the system clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Uses an existing identifier cache instead of creating one.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<IdentifierCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the configuration of the cache the builder creates.
    #[must_use]
    pub fn with_cache_config(mut self, config: CacheConfig) -> Self {
        self.cache_config = config;
        self
    }

    /// Sets tombstone storage. Defaults to an in-memory store.
    #[must_use]
    pub fn with_tombstones(mut self, tombstones: Arc<dyn TombstoneRepository>) -> Self {
        self.tombstones = Some(tombstones);
        self
    }

    /// Adds a save hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Arc<dyn SaveHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Registers the repository for `T`.
    pub fn with_repository<T: SyncableEntity>(
        mut self,
        repository: Arc<dyn Repository<T>>,
    ) -> CoreResult<Self> {
        self.registry.register::<T>(repository)?;
        Ok(self)
    }

    /// Builds the store.
    pub fn build(self) -> SyncStore {
        let cache = self.cache.unwrap_or_else(|| {
            Arc::new(IdentifierCache::with_clock(
                self.cache_config,
                Arc::clone(&self.clock),
            ))
        });
        SyncStore {
            name: self.name,
            replica_id: self.replica_id,
            registry: self.registry,
            cache,
            clock: self.clock,
            tombstones: self
                .tombstones
                .unwrap_or_else(|| Arc::new(MemoryTombstones::new())),
            hooks: self.hooks,
            stats: StoreStats::new(),
        }
    }
}

impl SyncStore {
    /// Starts building a store.
    pub fn builder(name: impl Into<String>) -> SyncStoreBuilder {
        SyncStoreBuilder {
            name: name.into(),
            replica_id: ReplicaId::new(),
            registry: RepositoryRegistry::new(),
            cache: None,
            cache_config: CacheConfig::default(),
            clock: Arc::new(SystemClock),
            tombstones: None,
            hooks: Vec::new(),
        }
    }

    /// Store name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replica id, shared with peers in every session.
    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// The store clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Reads the store clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The identifier cache.
    pub fn cache(&self) -> &Arc<IdentifierCache> {
        &self.cache
    }

    /// The repository registry.
    pub fn registry(&self) -> &RepositoryRegistry {
        &self.registry
    }

    /// Store counters.
    pub fn stats(&self) -> &StoreStats {
        &self.stats
    }

    /// Tombstone storage.
    pub fn tombstones(&self) -> &Arc<dyn TombstoneRepository> {
        &self.tombstones
    }

    /// Returns the typed repository for `T`.
    pub fn repository<T: SyncableEntity>(&self) -> CoreResult<Arc<dyn Repository<T>>> {
        self.registry.typed::<T>()
    }

    /// Reads an entity by stable id.
    pub fn read<T: SyncableEntity>(&self, stable_id: StableId) -> CoreResult<Option<T>> {
        self.repository::<T>()?.read(stable_id)
    }

    /// Reads every entity of `T`, oldest modification first.
    pub fn read_all<T: SyncableEntity>(&self) -> CoreResult<Vec<T>> {
        self.repository::<T>()?
            .changes(ChangeWindow::new(None, Timestamp::MAX_UTC), Page::ALL)
    }

    /// Saves a local write.
    ///
    /// Assigns a stable id if the entity has none, completes every
    /// relationship pair, stamps `created_on`/`modified_on` from the store
    /// clock, persists, and runs the save hooks. Returns the entity as stored.
    pub fn save<T: SyncableEntity>(&self, mut entity: T) -> CoreResult<T> {
        let repository = self.repository::<T>()?;
        if entity.stable_id().is_nil() {
            entity.header_mut().stable_id = StableId::new();
        }
        resolver::link_local(self, &mut entity)?;

        let existing = repository.read(entity.stable_id())?;
        let now = self.clock.now();
        {
            let header = entity.header_mut();
            header.local_id = existing.as_ref().and_then(|current| current.local_id());
            header.created_on = existing
                .as_ref()
                .map_or(now, |current| current.header().created_on);
            header.modified_on = now;
        }

        let saved = self.persist(repository.as_ref(), entity, None)?;
        tracing::debug!(store = %self.name, type_name = T::TYPE_NAME, stable_id = %saved.stable_id(), "saved");
        self.run_hooks(EntityRef::of(&saved))?;
        Ok(repository.read(saved.stable_id())?.unwrap_or(saved))
    }

    /// Hard-deletes a local entity.
    ///
    /// Writes a tombstone when the type's delete policy propagates.
    pub fn remove<T: SyncableEntity>(&self, stable_id: StableId) -> CoreResult<Option<T>> {
        let removed = self.repository::<T>()?.remove(stable_id)?;
        if let Some(entity) = &removed {
            self.cache.invalidate(T::TYPE_NAME, stable_id);
            if T::DELETE_POLICY.propagates() {
                self.tombstones
                    .add(Tombstone::for_entity(entity, self.clock.now()))?;
            }
            self.stats.record_delete();
        }
        Ok(removed)
    }

    /// Returns tombstones created inside the window for the given types.
    pub fn sync_tombstones(
        &self,
        window: ChangeWindow,
        type_names: &[&str],
    ) -> CoreResult<Vec<Tombstone>> {
        self.tombstones.changes(window, type_names)
    }

    /// Returns the repositories taking part in a pass, in enumeration order.
    pub fn syncable_repositories(
        &self,
        order: &[String],
        filters: &FilterSet,
    ) -> CoreResult<Vec<Arc<dyn ErasedRepository>>> {
        self.registry.syncable(order, filters)
    }

    /// Clears the identifier cache and reloads every persisted key pair.
    pub fn warm_cache(&self) -> CoreResult<usize> {
        self.cache.initialize_and_load(self, None)
    }

    /// Writes an entity, stamping `stored_on` from the store clock and
    /// recording which replica, if any, delivered it.
    fn persist<T: SyncableEntity>(
        &self,
        repository: &dyn Repository<T>,
        mut entity: T,
        received_from: Option<ReplicaId>,
    ) -> CoreResult<T> {
        {
            let header = entity.header_mut();
            header.stored_on = Some(self.clock.now());
            header.received_from = received_from;
        }
        let saved = repository.add(entity)?;
        self.cache
            .add_entity_id(T::TYPE_NAME, saved.stable_id(), saved.local_id());
        if T::DELETE_POLICY.propagates() {
            self.tombstones.remove(T::TYPE_NAME, saved.stable_id())?;
        }
        self.stats.record_save();
        Ok(saved)
    }

    fn run_hooks(&self, saved: EntityRef) -> CoreResult<()> {
        if self.hooks.is_empty() {
            return Ok(());
        }
        let mut first = true;
        save_until_stable(vec![saved], MAX_SAVE_PASSES, |work| {
            if !first {
                for item in &work {
                    let repository = self
                        .registry
                        .get(&item.type_name)
                        .ok_or_else(|| CoreError::repository_not_registered(item.type_name.as_str()))?;
                    repository.touch(self, item.stable_id)?;
                }
            }
            first = false;

            let mut next = BTreeSet::new();
            for item in &work {
                for hook in &self.hooks {
                    next.extend(hook.after_save(self, item)?);
                }
            }
            Ok(next.into_iter().collect())
        })?;
        Ok(())
    }

    /// Re-saves an entity with a fresh `modified_on`, without running hooks.
    pub(crate) fn touch_entity<T: SyncableEntity>(
        &self,
        repository: &dyn Repository<T>,
        stable_id: StableId,
    ) -> CoreResult<bool> {
        let Some(mut entity) = repository.read(stable_id)? else {
            return Ok(false);
        };
        entity.header_mut().modified_on = self.clock.now();
        self.persist(repository, entity, None)?;
        Ok(true)
    }

    /// Applies one incoming object of type `T` delivered by `sender`.
    ///
    /// Newer-wins compares the source `modified_on`. The written row is
    /// stamped with this store's clock, so it enters this store's change
    /// windows when it arrives, not when the source last edited it.
    pub(crate) fn apply_entity<T: SyncableEntity>(
        &self,
        repository: &dyn Repository<T>,
        object: &SyncObject,
        options: &SyncClientOptions,
        sender: Option<ReplicaId>,
    ) -> SyncResult<ApplyOutcome> {
        if object.is_deletion() {
            return self.apply_deletion(repository, object, sender);
        }

        let mut incoming: T = match object.to_entity() {
            Ok(entity) => entity,
            Err(err) => return Ok(self.issue(object, SyncIssueType::InvalidData, err.to_string())),
        };
        if incoming.stable_id() != object.stable_id {
            return Ok(self.issue(
                object,
                SyncIssueType::InvalidData,
                format!("payload carries stable id {}", incoming.stable_id()),
            ));
        }

        let existing = repository.read(object.stable_id)?;
        if let Some(current) = &existing {
            if current.header().modified_on >= incoming.header().modified_on {
                self.stats.record_skipped();
                return Ok(ApplyOutcome::Skipped);
            }
        }

        if let Err(message) = resolver::link_incoming(self, &mut incoming)? {
            tracing::warn!(store = %self.name, type_name = T::TYPE_NAME, stable_id = %object.stable_id, %message, "unresolved relationship");
            return Ok(self.issue(object, SyncIssueType::RelationshipConstraint, message));
        }

        let now = self.clock.now();
        {
            let header = incoming.header_mut();
            header.local_id = existing.as_ref().and_then(|current| current.local_id());
            if options.maintain_created_on {
                header.created_on = existing
                    .as_ref()
                    .map_or(now, |current| current.header().created_on);
            }
            if options.maintain_modified_on {
                header.modified_on = now;
            }
        }

        let saved = self.persist(repository, incoming, sender)?;
        self.stats.record_applied();
        self.run_hooks(EntityRef::of(&saved))?;
        Ok(ApplyOutcome::Applied)
    }

    fn apply_deletion<T: SyncableEntity>(
        &self,
        repository: &dyn Repository<T>,
        object: &SyncObject,
        sender: Option<ReplicaId>,
    ) -> SyncResult<ApplyOutcome> {
        let tombstone = match object.to_tombstone() {
            Ok(tombstone) => tombstone,
            Err(err) => return Ok(self.issue(object, SyncIssueType::InvalidData, err.to_string())),
        };
        if !T::DELETE_POLICY.propagates() {
            self.stats.record_skipped();
            return Ok(ApplyOutcome::Skipped);
        }
        let current = match repository.read(object.stable_id)? {
            Some(current) if current.header().modified_on <= tombstone.created_on => current,
            _ => {
                self.stats.record_skipped();
                return Ok(ApplyOutcome::Skipped);
            }
        };

        repository.remove(object.stable_id)?;
        self.cache.invalidate(T::TYPE_NAME, object.stable_id);
        self.tombstones.add(Tombstone {
            stable_id: object.stable_id,
            type_name: T::TYPE_NAME.to_string(),
            reference_id: current
                .local_id()
                .map(|id| id.to_string())
                .unwrap_or_default(),
            created_on: tombstone.created_on,
            stored_on: Some(self.clock.now()),
            received_from: sender,
        })?;
        self.stats.record_delete();
        self.stats.record_applied();
        Ok(ApplyOutcome::Applied)
    }

    fn issue(
        &self,
        object: &SyncObject,
        issue_type: SyncIssueType,
        message: impl Into<String>,
    ) -> ApplyOutcome {
        self.stats.record_issue();
        ApplyOutcome::Issue(SyncIssue::new(
            object.stable_id,
            object.type_name.clone(),
            issue_type,
            message,
        ))
    }
}

impl KeySource for SyncStore {
    fn type_names(&self) -> Vec<String> {
        self.registry.type_names()
    }

    fn read_all_keys(&self, type_name: &str) -> CoreResult<Vec<(StableId, LocalId)>> {
        self.registry
            .get(type_name)
            .ok_or_else(|| CoreError::repository_not_registered(type_name))?
            .read_all_keys()
    }
}

impl std::fmt::Debug for SyncStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncStore")
            .field("name", &self.name)
            .field("registry", &self.registry)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Hands out the store a session works against.
pub trait SyncStoreProvider: Send + Sync {
    /// Returns the store for a pass with the given options.
    fn store(&self, options: &SyncOptions) -> SyncResult<Arc<SyncStore>>;
}

impl SyncStoreProvider for Arc<SyncStore> {
    fn store(&self, _options: &SyncOptions) -> SyncResult<Arc<SyncStore>> {
        Ok(Arc::clone(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{child_of, parent, test_store, Child, Parent};
    use mirrorsync_core::ForeignKey;
    use parking_lot::Mutex;

    #[test]
    fn save_stamps_and_assigns() {
        let store = test_store(10);
        let saved = store.save(parent("home")).unwrap();
        assert!(saved.local_id().is_some());
        assert!(!saved.stable_id().is_nil());
        assert_eq!(saved.header.created_on, saved.header.modified_on);

        let mut edited = saved.clone();
        edited.name = "work".into();
        let updated = store.save(edited).unwrap();
        assert_eq!(updated.local_id(), saved.local_id());
        assert_eq!(updated.header.created_on, saved.header.created_on);
        assert!(updated.header.modified_on > saved.header.modified_on);
    }

    #[test]
    fn save_completes_relationship_pairs() {
        let store = test_store(10);
        let p = store.save(parent("p")).unwrap();
        let child = store
            .save(Child::new("c", ForeignKey::to_stable(p.stable_id())))
            .unwrap();
        assert_eq!(child.parent.local_id, p.local_id());
    }

    #[test]
    fn remove_writes_tombstone_for_propagating_types() {
        let store = test_store(10);
        let p = store.save(parent("p")).unwrap();
        let removed = store.remove::<Parent>(p.stable_id()).unwrap();
        assert!(removed.is_some());

        let c = store.save(child_of(StableId::NIL)).unwrap();
        store.remove::<Child>(c.stable_id()).unwrap();
        let window = ChangeWindow::new(None, store.now());
        assert_eq!(
            store
                .sync_tombstones(window, &["parent", "child"])
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn apply_skips_when_not_newer() {
        let store = test_store(10);
        let p = store.save(parent("p")).unwrap();
        let object = SyncObject::from_entity(&p).unwrap();
        let repo = store.repository::<Parent>().unwrap();

        let outcome = store
            .apply_entity(repo.as_ref(), &object, &SyncClientOptions::default(), None)
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Skipped);
        assert_eq!(store.stats().snapshot().skipped, 1);
    }

    #[test]
    fn apply_keeps_source_timestamps_by_default() {
        let source = test_store(10);
        let target = test_store(500);
        let p = source.save(parent("p")).unwrap();
        let object = SyncObject::from_entity(&p).unwrap();
        let repo = target.repository::<Parent>().unwrap();

        let outcome = target
            .apply_entity(repo.as_ref(), &object, &SyncClientOptions::default(), None)
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);

        let copy = target.read::<Parent>(p.stable_id()).unwrap().unwrap();
        assert_eq!(copy.header.modified_on, p.header.modified_on);
        assert_ne!(copy.local_id(), p.local_id());
    }

    #[test]
    fn applied_rows_are_stamped_by_the_receiver() {
        let source = test_store(10);
        let target = test_store(500);
        let p = source.save(parent("p")).unwrap();
        let object = SyncObject::from_entity(&p).unwrap();
        let repo = target.repository::<Parent>().unwrap();

        let before = target.now();
        target
            .apply_entity(
                repo.as_ref(),
                &object,
                &SyncClientOptions::default(),
                Some(source.replica_id()),
            )
            .unwrap();

        let copy = target.read::<Parent>(p.stable_id()).unwrap().unwrap();
        assert_eq!(copy.header.modified_on, p.header.modified_on);
        assert!(copy.header.change_stamp() > before);
        assert_eq!(copy.header.received_from, Some(source.replica_id()));

        let window = ChangeWindow::new(Some(before), target.now());
        assert_eq!(repo.change_count(window).unwrap(), 1);
        let window = window.excluding(Some(source.replica_id()));
        assert_eq!(repo.change_count(window).unwrap(), 0);

        let local = target.save(copy).unwrap();
        assert_eq!(local.header.received_from, None);
    }

    #[test]
    fn apply_unresolved_writes_nothing() {
        let source = test_store(10);
        let target = test_store(500);
        let p = source.save(parent("p")).unwrap();
        let c = source
            .save(Child::new("c", ForeignKey::to_stable(p.stable_id())))
            .unwrap();
        let object = SyncObject::from_entity(&c).unwrap();
        let repo = target.repository::<Child>().unwrap();

        let outcome = target
            .apply_entity(repo.as_ref(), &object, &SyncClientOptions::default(), None)
            .unwrap();
        match outcome {
            ApplyOutcome::Issue(issue) => {
                assert_eq!(issue.issue_type, SyncIssueType::RelationshipConstraint);
                assert_eq!(issue.stable_id, c.stable_id());
                assert_eq!(issue.type_name, "child");
            }
            other => panic!("expected issue, got {other:?}"),
        }
        assert!(target.read::<Child>(c.stable_id()).unwrap().is_none());
    }

    #[test]
    fn apply_deletion_respects_policy() {
        let source = test_store(10);
        let target = test_store(500);
        let p = source.save(parent("p")).unwrap();
        let repo = target.repository::<Parent>().unwrap();
        target
            .apply_entity(
                repo.as_ref(),
                &SyncObject::from_entity(&p).unwrap(),
                &SyncClientOptions::default(),
                None,
            )
            .unwrap();

        source.remove::<Parent>(p.stable_id()).unwrap();
        let window = ChangeWindow::new(None, source.now());
        let tombstone = source.sync_tombstones(window, &["parent"]).unwrap().remove(0);
        let object = SyncObject::from_tombstone(&tombstone).unwrap();

        let outcome = target
            .apply_entity(repo.as_ref(), &object, &SyncClientOptions::default(), None)
            .unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert!(target.read::<Parent>(p.stable_id()).unwrap().is_none());

        let again = target
            .apply_entity(repo.as_ref(), &object, &SyncClientOptions::default(), None)
            .unwrap();
        assert_eq!(again, ApplyOutcome::Skipped);
    }

    struct TouchParent {
        calls: Mutex<usize>,
        cyclic: bool,
    }

    impl SaveHook for TouchParent {
        fn after_save(&self, store: &SyncStore, saved: &EntityRef) -> CoreResult<Vec<EntityRef>> {
            *self.calls.lock() += 1;
            if saved.type_name != "child" && !self.cyclic {
                return Ok(Vec::new());
            }
            if self.cyclic {
                return Ok(vec![saved.clone()]);
            }
            let child: Child = store
                .read(saved.stable_id)?
                .ok_or_else(|| CoreError::entity_not_found("child", saved.stable_id))?;
            Ok(vec![EntityRef::new("parent", child.parent.stable_id)])
        }
    }

    #[test]
    fn hooks_touch_related_entities() {
        let hook = Arc::new(TouchParent {
            calls: Mutex::new(0),
            cyclic: false,
        });
        let store = crate::test_support::test_store_with(10, |b| b.with_hook(hook.clone()));
        let p = store.save(parent("p")).unwrap();
        let before = p.header.modified_on;

        store
            .save(Child::new("c", ForeignKey::to_stable(p.stable_id())))
            .unwrap();
        let touched = store.read::<Parent>(p.stable_id()).unwrap().unwrap();
        assert!(touched.header.modified_on > before);
        assert_eq!(*hook.calls.lock(), 3);
    }

    #[test]
    fn cyclic_hooks_hit_the_cap() {
        let hook = Arc::new(TouchParent {
            calls: Mutex::new(0),
            cyclic: true,
        });
        let store = crate::test_support::test_store_with(10, |b| b.with_hook(hook.clone()));
        let err = store.save(parent("p")).unwrap_err();
        assert!(matches!(err, CoreError::SaveLoopExceeded { max_passes: 3 }));
    }

    #[test]
    fn warm_cache_loads_all_keys() {
        let store = test_store(10);
        store.save(parent("a")).unwrap();
        store.save(parent("b")).unwrap();
        store.cache().clear();
        assert_eq!(store.warm_cache().unwrap(), 2);
        assert_eq!(store.cache().len(), 2);
    }
}
