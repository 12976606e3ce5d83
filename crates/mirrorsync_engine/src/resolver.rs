//! Relationship resolution.
//!
//! Incoming entities carry only the stable half of each relationship pair;
//! the local half is re-derived here. Local writes may carry either half and
//! get the other one filled in.

use crate::store::SyncStore;
use mirrorsync_core::{CoreError, CoreResult, LocalId, StableId, SyncableEntity};

/// Maps a related entity's stable id to its local id in `store`.
///
/// Tries the identifier cache first. On a miss, asks the repository
/// directly, counts the fallback, and caches the answer. `Ok(None)` means
/// the entity is not present locally.
pub fn local_id_for(
    store: &SyncStore,
    target: &str,
    stable_id: StableId,
) -> CoreResult<Option<LocalId>> {
    if let Some(local_id) = store.cache().get_entity_id(target, stable_id) {
        store.stats().record_cache_hit();
        return Ok(Some(local_id));
    }
    store.stats().record_cache_miss();
    store.stats().record_individual_lookup();

    let Some(repository) = store.registry().get(target) else {
        return Ok(None);
    };
    let found = repository.local_id_of(stable_id)?;
    store.cache().add_entity_id(target, stable_id, found);
    Ok(found)
}

/// Resolves every relationship of an incoming entity.
///
/// A nil stable id clears the pair. The outer `Result` carries store
/// failures; the inner `Err` names the first relationship that could not be
/// resolved, in which case the entity must not be written.
pub fn link_incoming<T: SyncableEntity>(
    store: &SyncStore,
    entity: &mut T,
) -> CoreResult<Result<(), String>> {
    for link in entity.relationships_mut() {
        if link.key.stable_id.is_nil() {
            link.key.clear();
            continue;
        }
        match local_id_for(store, link.target, link.key.stable_id)? {
            Some(local_id) => link.key.local_id = Some(local_id),
            None => {
                return Ok(Err(format!(
                    "{} references {} {} which is not present",
                    link.name, link.target, link.key.stable_id
                )));
            }
        }
    }
    Ok(Ok(()))
}

/// Completes the relationship pairs of a locally written entity.
///
/// The local key wins when both halves are set. A reference to an entity
/// that does not exist is an error.
pub fn link_local<T: SyncableEntity>(store: &SyncStore, entity: &mut T) -> CoreResult<()> {
    for link in entity.relationships_mut() {
        match (link.key.local_id, link.key.stable_id.is_nil()) {
            (Some(local_id), _) => {
                let repository = store
                    .registry()
                    .get(link.target)
                    .ok_or_else(|| CoreError::repository_not_registered(link.target))?;
                let stable_id = repository.stable_id_of(local_id)?.ok_or_else(|| {
                    CoreError::invalid_operation(format!(
                        "{} references missing {} with local id {}",
                        link.name, link.target, local_id
                    ))
                })?;
                link.key.stable_id = stable_id;
                store.cache().add_entity_id(link.target, stable_id, Some(local_id));
            }
            (None, false) => {
                let stable_id = link.key.stable_id;
                let local_id = local_id_for(store, link.target, stable_id)?
                    .ok_or_else(|| CoreError::entity_not_found(link.target, stable_id))?;
                link.key.local_id = Some(local_id);
            }
            (None, true) => link.key.clear(),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{child_of, parent, test_store, Child};
    use mirrorsync_core::ForeignKey;

    #[test]
    fn nil_stable_id_clears_pair() {
        let store = test_store(1);
        let mut child = child_of(StableId::NIL);
        child.parent.local_id = Some(LocalId::new(77));

        assert_eq!(link_incoming(&store, &mut child).unwrap(), Ok(()));
        assert!(child.parent.is_absent());
    }

    #[test]
    fn cache_miss_falls_back_and_populates() {
        let store = test_store(1);
        let saved = store.save(parent("p")).unwrap();
        store.cache().clear();

        let mut child = child_of(saved.stable_id());
        link_incoming(&store, &mut child).unwrap().unwrap();
        assert_eq!(child.parent.local_id, saved.local_id());
        assert_eq!(store.stats().individual_lookups(), 1);

        let mut again = child_of(saved.stable_id());
        link_incoming(&store, &mut again).unwrap().unwrap();
        assert_eq!(store.stats().individual_lookups(), 1);
    }

    #[test]
    fn missing_parent_is_reported() {
        let store = test_store(1);
        let mut child = child_of(StableId::new());
        let outcome = link_incoming(&store, &mut child).unwrap();
        assert!(outcome.unwrap_err().contains("parent"));
        assert_eq!(child.parent.local_id, None);
    }

    #[test]
    fn local_write_fills_stable_half() {
        let store = test_store(1);
        let saved = store.save(parent("p")).unwrap();
        let local_id = saved.local_id().unwrap();

        let mut child = Child::new("c", ForeignKey::to_local(local_id));
        link_local(&store, &mut child).unwrap();
        assert_eq!(child.parent.stable_id, saved.stable_id());
    }

    #[test]
    fn local_write_to_missing_parent_fails() {
        let store = test_store(1);
        let mut child = Child::new("c", ForeignKey::to_local(LocalId::new(404)));
        assert!(link_local(&store, &mut child).is_err());

        let mut child = child_of(StableId::new());
        assert!(matches!(
            link_local(&store, &mut child),
            Err(CoreError::EntityNotFound { .. })
        ));
    }
}
