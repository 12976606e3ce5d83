//! Type-erased repository registry.
//!
//! Sync objects are routed by type name at runtime. Each typed
//! [`Repository`] is wrapped in an adapter implementing [`ErasedRepository`]
//! and stored under its entity's `TYPE_NAME`.

use crate::error::SyncResult;
use crate::store::{ApplyOutcome, SyncStore};
use mirrorsync_core::{
    ChangeWindow, CoreError, CoreResult, DeletePolicy, EntityRef, FilterSet, LocalId, Page,
    ReplicaId, Repository, StableId, SyncableEntity,
};
use mirrorsync_protocol::{SyncClientOptions, SyncObject};
use std::any::Any;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// One page of outgoing objects from a single repository.
#[derive(Debug, Default)]
pub struct OutgoingPage {
    /// Filter-admitted objects.
    pub objects: Vec<SyncObject>,
    /// Entities in the page that the filter rejected.
    pub filtered: usize,
}

/// An entity offered as a correction, with the parents it references.
#[derive(Debug)]
pub struct CorrectionCandidate {
    /// The entity snapshot.
    pub object: SyncObject,
    /// Entities referenced by the snapshot's relationships.
    pub parents: Vec<EntityRef>,
}

/// Repository operations the sync pipeline needs, without the entity type.
pub trait ErasedRepository: Send + Sync {
    /// Routing type name.
    fn type_name(&self) -> &'static str;

    /// Delete policy of the entity type.
    fn delete_policy(&self) -> DeletePolicy;

    /// Counts entities modified inside the window, filtered or not.
    fn change_count(&self, window: ChangeWindow) -> CoreResult<usize>;

    /// Reads one page of the window and snapshots the filter-admitted entities.
    fn outgoing(
        &self,
        window: ChangeWindow,
        page: Page,
        filters: &FilterSet,
    ) -> SyncResult<OutgoingPage>;

    /// Snapshots one entity if it exists and the filter admits it.
    fn candidate(
        &self,
        stable_id: StableId,
        filters: &FilterSet,
    ) -> SyncResult<Option<CorrectionCandidate>>;

    /// Applies an incoming object delivered by `sender`.
    fn apply(
        &self,
        store: &SyncStore,
        object: &SyncObject,
        options: &SyncClientOptions,
        sender: Option<ReplicaId>,
    ) -> SyncResult<ApplyOutcome>;

    /// Re-saves an entity with a fresh `modified_on`. Returns false if missing.
    fn touch(&self, store: &SyncStore, stable_id: StableId) -> CoreResult<bool>;

    /// Authoritative stable-to-local lookup.
    fn local_id_of(&self, stable_id: StableId) -> CoreResult<Option<LocalId>>;

    /// Authoritative local-to-stable lookup.
    fn stable_id_of(&self, local_id: LocalId) -> CoreResult<Option<StableId>>;

    /// Enumerates every key pair.
    fn read_all_keys(&self) -> CoreResult<Vec<(StableId, LocalId)>>;

    /// Upcast for typed access.
    fn as_any(&self) -> &dyn Any;
}

pub(crate) struct TypedRepository<T: SyncableEntity> {
    inner: Arc<dyn Repository<T>>,
}

impl<T: SyncableEntity> ErasedRepository for TypedRepository<T> {
    fn type_name(&self) -> &'static str {
        T::TYPE_NAME
    }

    fn delete_policy(&self) -> DeletePolicy {
        T::DELETE_POLICY
    }

    fn change_count(&self, window: ChangeWindow) -> CoreResult<usize> {
        self.inner.change_count(window)
    }

    fn outgoing(
        &self,
        window: ChangeWindow,
        page: Page,
        filters: &FilterSet,
    ) -> SyncResult<OutgoingPage> {
        let mut out = OutgoingPage::default();
        for entity in self.inner.changes(window, page)? {
            if filters.admits(&entity) {
                out.objects.push(SyncObject::from_entity(&entity)?);
            } else {
                out.filtered += 1;
            }
        }
        Ok(out)
    }

    fn candidate(
        &self,
        stable_id: StableId,
        filters: &FilterSet,
    ) -> SyncResult<Option<CorrectionCandidate>> {
        let Some(entity) = self.inner.read(stable_id)? else {
            return Ok(None);
        };
        if !filters.admits(&entity) {
            tracing::debug!(type_name = T::TYPE_NAME, %stable_id, "correction withheld by filter");
            return Ok(None);
        }
        let parents = entity
            .relationships()
            .into_iter()
            .filter(|link| !link.key.stable_id.is_nil())
            .map(|link| EntityRef::new(link.target, link.key.stable_id))
            .collect();
        Ok(Some(CorrectionCandidate {
            object: SyncObject::from_entity(&entity)?,
            parents,
        }))
    }

    fn apply(
        &self,
        store: &SyncStore,
        object: &SyncObject,
        options: &SyncClientOptions,
        sender: Option<ReplicaId>,
    ) -> SyncResult<ApplyOutcome> {
        store.apply_entity(self.inner.as_ref(), object, options, sender)
    }

    fn touch(&self, store: &SyncStore, stable_id: StableId) -> CoreResult<bool> {
        store.touch_entity(self.inner.as_ref(), stable_id)
    }

    fn local_id_of(&self, stable_id: StableId) -> CoreResult<Option<LocalId>> {
        self.inner.local_id_of(stable_id)
    }

    fn stable_id_of(&self, local_id: LocalId) -> CoreResult<Option<StableId>> {
        Ok(self
            .inner
            .read_local(local_id)?
            .map(|entity| entity.stable_id()))
    }

    fn read_all_keys(&self) -> CoreResult<Vec<(StableId, LocalId)>> {
        self.inner.read_all_keys()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Maps type names to repositories.
#[derive(Default)]
pub struct RepositoryRegistry {
    repositories: BTreeMap<String, Arc<dyn ErasedRepository>>,
}

impl RepositoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the repository for `T`.
    pub fn register<T: SyncableEntity>(&mut self, repository: Arc<dyn Repository<T>>) -> CoreResult<()> {
        if self.repositories.contains_key(T::TYPE_NAME) {
            return Err(CoreError::DuplicateRepository {
                type_name: T::TYPE_NAME.to_string(),
            });
        }
        self.repositories.insert(
            T::TYPE_NAME.to_string(),
            Arc::new(TypedRepository { inner: repository }),
        );
        Ok(())
    }

    /// Looks up a repository by type name.
    pub fn get(&self, type_name: &str) -> Option<Arc<dyn ErasedRepository>> {
        self.repositories.get(type_name).cloned()
    }

    /// Returns the typed repository for `T`.
    pub fn typed<T: SyncableEntity>(&self) -> CoreResult<Arc<dyn Repository<T>>> {
        self.repositories
            .get(T::TYPE_NAME)
            .and_then(|repo| repo.as_any().downcast_ref::<TypedRepository<T>>())
            .map(|typed| Arc::clone(&typed.inner))
            .ok_or_else(|| CoreError::repository_not_registered(T::TYPE_NAME))
    }

    /// Returns every registered type name, alphabetically.
    pub fn type_names(&self) -> Vec<String> {
        self.repositories.keys().cloned().collect()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }

    /// Returns true if an order list selects every registered repository.
    /// The empty list always does.
    pub fn covers(&self, order: &[String]) -> bool {
        order.is_empty()
            || self
                .repositories
                .keys()
                .all(|name| order.iter().any(|listed| listed == name))
    }

    /// Returns the repositories taking part in a pass, in enumeration order.
    ///
    /// A non-empty `order` selects exactly the listed types, in list order;
    /// an unregistered name is a configuration error. An empty `order`
    /// selects every repository alphabetically. Types the filter set
    /// excludes are dropped either way.
    pub fn syncable(
        &self,
        order: &[String],
        filters: &FilterSet,
    ) -> CoreResult<Vec<Arc<dyn ErasedRepository>>> {
        let selected: Vec<Arc<dyn ErasedRepository>> = if order.is_empty() {
            self.repositories.values().cloned().collect()
        } else {
            let mut seen = HashSet::new();
            let mut selected = Vec::with_capacity(order.len());
            for name in order {
                let repo = self
                    .get(name)
                    .ok_or_else(|| CoreError::repository_not_registered(name.as_str()))?;
                if seen.insert(name.as_str()) {
                    selected.push(repo);
                }
            }
            selected
        };
        Ok(selected
            .into_iter()
            .filter(|repo| filters.includes_type(repo.type_name()))
            .collect())
    }
}

impl std::fmt::Debug for RepositoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepositoryRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{Child, Parent};
    use mirrorsync_core::MemoryRepository;

    fn registry() -> RepositoryRegistry {
        let mut registry = RepositoryRegistry::new();
        registry
            .register::<Parent>(Arc::new(MemoryRepository::<Parent>::new()))
            .unwrap();
        registry
            .register::<Child>(Arc::new(MemoryRepository::<Child>::new()))
            .unwrap();
        registry
    }

    fn names(repos: &[Arc<dyn ErasedRepository>]) -> Vec<&'static str> {
        repos.iter().map(|repo| repo.type_name()).collect()
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = registry();
        let err = registry
            .register::<Parent>(Arc::new(MemoryRepository::<Parent>::new()))
            .unwrap_err();
        assert!(matches!(err, CoreError::DuplicateRepository { .. }));
    }

    #[test]
    fn empty_order_is_alphabetical() {
        let registry = registry();
        let repos = registry.syncable(&[], &FilterSet::new()).unwrap();
        assert_eq!(names(&repos), vec!["child", "parent"]);
    }

    #[test]
    fn explicit_order_selects_and_orders() {
        let registry = registry();
        let order = vec!["parent".to_string(), "child".to_string(), "parent".to_string()];
        let repos = registry.syncable(&order, &FilterSet::new()).unwrap();
        assert_eq!(names(&repos), vec!["parent", "child"]);

        let repos = registry
            .syncable(&["child".to_string()], &FilterSet::new())
            .unwrap();
        assert_eq!(names(&repos), vec!["child"]);
    }

    #[test]
    fn full_order_list_covers_the_registry() {
        let registry = registry();
        assert!(registry.covers(&[]));
        assert!(registry.covers(&["parent".to_string(), "child".to_string()]));
        assert!(!registry.covers(&["child".to_string()]));
    }

    #[test]
    fn unknown_name_is_configuration_error() {
        let registry = registry();
        let err = registry
            .syncable(&["invoice".to_string()], &FilterSet::new())
            .err()
            .unwrap();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn exclusive_filters_drop_types() {
        let registry = registry();
        let filters = FilterSet::exclusive().with_type::<Parent>();
        let repos = registry.syncable(&[], &filters).unwrap();
        assert_eq!(names(&repos), vec!["parent"]);
    }

    #[test]
    fn typed_lookup() {
        let registry = registry();
        assert!(registry.typed::<Parent>().is_ok());

        let empty = RepositoryRegistry::new();
        assert!(matches!(
            empty.typed::<Parent>(),
            Err(CoreError::RepositoryNotRegistered { .. })
        ));
    }
}
