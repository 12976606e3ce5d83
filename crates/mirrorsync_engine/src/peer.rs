//! Synchronization peers.
//!
//! [`SyncPeer`] is the session-oriented protocol every side of a sync
//! speaks. [`LocalPeer`] implements it in-process over a [`SyncStore`];
//! [`crate::RemotePeer`] implements it over a transport.

use crate::converter::ConverterSet;
use crate::error::{SyncError, SyncResult};
use crate::registry::ErasedRepository;
use crate::store::{ApplyOutcome, SyncStore, SyncStoreProvider};
use mirrorsync_core::{ChangeWindow, EntityRef, FilterSet, Page};
use mirrorsync_protocol::{
    ServiceRequest, ServiceResult, SyncClientOptions, SyncIssue, SyncIssueType, SyncObject,
    SyncOptions, SyncRequest, SyncSession,
};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use uuid::Uuid;

/// The sync protocol, as seen from the engine.
///
/// # Invariants
///
/// - `begin_sync` is idempotent per session id and stamps `started_on` from
///   the peer's own clock
/// - `get_changes` never returns changes newer than the session start
/// - Every outgoing path honors the session's filter set
/// - Apply calls report data problems as issues, never as errors
/// - `end_sync` is idempotent
pub trait SyncPeer: Send + Sync {
    /// Opens (or returns the already open) session.
    fn begin_sync(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SyncSession>;

    /// Returns one page of changes inside `(since, until]`.
    fn get_changes(
        &self,
        session_id: Uuid,
        request: SyncRequest,
    ) -> SyncResult<ServiceResult<SyncObject>>;

    /// Applies a batch of changes and reports what could not be applied.
    fn apply_changes(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>>;

    /// Returns fresh objects for issues the other side reported.
    fn get_corrections(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncIssue>,
    ) -> SyncResult<ServiceResult<SyncObject>>;

    /// Applies a batch of corrections.
    fn apply_corrections(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>>;

    /// Closes a session.
    fn end_sync(&self, session: &SyncSession) -> SyncResult<()>;

    /// Replaces the session options of an open session.
    fn update_options(&self, session_id: Uuid, options: &SyncClientOptions) -> SyncResult<()>;
}

impl<P: SyncPeer + ?Sized> SyncPeer for Arc<P> {
    fn begin_sync(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SyncSession> {
        (**self).begin_sync(session_id, options)
    }

    fn get_changes(
        &self,
        session_id: Uuid,
        request: SyncRequest,
    ) -> SyncResult<ServiceResult<SyncObject>> {
        (**self).get_changes(session_id, request)
    }

    fn apply_changes(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>> {
        (**self).apply_changes(session_id, request)
    }

    fn get_corrections(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncIssue>,
    ) -> SyncResult<ServiceResult<SyncObject>> {
        (**self).get_corrections(session_id, request)
    }

    fn apply_corrections(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>> {
        (**self).apply_corrections(session_id, request)
    }

    fn end_sync(&self, session: &SyncSession) -> SyncResult<()> {
        (**self).end_sync(session)
    }

    fn update_options(&self, session_id: Uuid, options: &SyncClientOptions) -> SyncResult<()> {
        (**self).update_options(session_id, options)
    }
}

#[derive(Clone)]
struct PeerSession {
    session: SyncSession,
    store: Arc<SyncStore>,
    options: SyncOptions,
    client_options: SyncClientOptions,
}

/// In-process peer over a store.
pub struct LocalPeer {
    name: String,
    provider: Arc<dyn SyncStoreProvider>,
    filters: FilterSet,
    incoming: ConverterSet,
    outgoing: ConverterSet,
    sessions: RwLock<HashMap<Uuid, PeerSession>>,
}

impl LocalPeer {
    /// Creates a peer that asks `provider` for its store on every session.
    pub fn new(name: impl Into<String>, provider: Arc<dyn SyncStoreProvider>) -> Self {
        Self {
            name: name.into(),
            provider,
            filters: FilterSet::new(),
            incoming: ConverterSet::new(),
            outgoing: ConverterSet::new(),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Creates a peer over a single store.
    pub fn for_store(name: impl Into<String>, store: Arc<SyncStore>) -> Self {
        Self::new(name, Arc::new(store))
    }

    /// Sets the peer's own outgoing filters, used when a session's options
    /// carry none.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// Sets the converters applied to received objects.
    #[must_use]
    pub fn with_incoming(mut self, converters: ConverterSet) -> Self {
        self.incoming = converters;
        self
    }

    /// Sets the converters applied to sent objects.
    #[must_use]
    pub fn with_outgoing(mut self, converters: ConverterSet) -> Self {
        self.outgoing = converters;
        self
    }

    /// Peer name, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of open sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    fn session(&self, session_id: Uuid) -> SyncResult<PeerSession> {
        self.sessions
            .read()
            .get(&session_id)
            .cloned()
            .ok_or(SyncError::SessionNotFound(session_id))
    }

    fn push_outgoing(
        &self,
        result: &mut ServiceResult<SyncObject>,
        object: SyncObject,
    ) -> SyncResult<()> {
        match self.outgoing.convert(&object)? {
            Some(converted) => result.collection.push(converted),
            None => result.skipped += 1,
        }
        Ok(())
    }

    fn apply_batch(
        &self,
        session: &PeerSession,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>> {
        let mut result = ServiceResult {
            collection: Vec::new(),
            skipped: 0,
            total_count: request.collection.len(),
        };

        for original in request.collection {
            let object = match self.incoming.convert(&original) {
                Ok(Some(object)) => object,
                Ok(None) => {
                    tracing::debug!(peer = %self.name, type_name = %original.type_name, stable_id = %original.stable_id, "declined by converter");
                    result.skipped += 1;
                    continue;
                }
                Err(err) => {
                    result.collection.push(SyncIssue::new(
                        original.stable_id,
                        original.type_name.clone(),
                        SyncIssueType::InvalidData,
                        err.to_string(),
                    ));
                    continue;
                }
            };

            let Some(repository) = session.store.registry().get(&object.type_name) else {
                tracing::warn!(peer = %self.name, type_name = %object.type_name, "no repository for incoming object");
                result.collection.push(SyncIssue::new(
                    original.stable_id,
                    original.type_name.clone(),
                    SyncIssueType::UnknownType,
                    format!("no repository registered for {}", object.type_name),
                ));
                continue;
            };

            match repository.apply(
                &session.store,
                &object,
                &session.client_options,
                request.sender,
            )? {
                ApplyOutcome::Applied => {}
                ApplyOutcome::Skipped => result.skipped += 1,
                ApplyOutcome::Issue(mut issue) => {
                    issue.type_name = original.type_name.clone();
                    result.collection.push(issue);
                }
            }
        }
        Ok(result)
    }

    fn collect_correction(
        &self,
        session: &PeerSession,
        target: EntityRef,
        seen: &mut HashSet<EntityRef>,
        out: &mut Vec<SyncObject>,
    ) -> SyncResult<()> {
        if !session.options.filters.includes_type(&target.type_name) || !seen.insert(target.clone()) {
            return Ok(());
        }
        let Some(repository) = session.store.registry().get(&target.type_name) else {
            return Ok(());
        };
        let Some(candidate) = repository.candidate(target.stable_id, &session.options.filters)?
        else {
            return Ok(());
        };
        if session.client_options.include_related {
            for parent in candidate.parents {
                self.collect_correction(session, parent, seen, out)?;
            }
        }
        out.push(candidate.object);
        Ok(())
    }
}

impl SyncPeer for LocalPeer {
    fn begin_sync(&self, session_id: Uuid, options: &SyncOptions) -> SyncResult<SyncSession> {
        if let Some(open) = self.sessions.read().get(&session_id) {
            return Ok(open.session);
        }

        let store = self.provider.store(options)?;
        let mut options = options.clone();
        if options.filters.is_empty() {
            options.filters = self.filters.clone();
        }
        store.syncable_repositories(&options.repositories, &options.filters)?;

        let session = SyncSession {
            session_id,
            started_on: store.now(),
            replica_id: store.replica_id(),
            covers_all: store.registry().covers(&options.repositories),
        };
        let mut sessions = self.sessions.write();
        let open = sessions.entry(session_id).or_insert(PeerSession {
            session,
            store,
            options,
            client_options: SyncClientOptions::default(),
        });
        tracing::info!(peer = %self.name, %session_id, started_on = %open.session.started_on, "session opened");
        Ok(open.session)
    }

    fn get_changes(
        &self,
        session_id: Uuid,
        request: SyncRequest,
    ) -> SyncResult<ServiceResult<SyncObject>> {
        let session = self.session(session_id)?;
        let started_on = session.session.started_on;
        let until = request
            .until
            .map_or(started_on, |until| until.min(started_on));
        let window = ChangeWindow::new(request.since, until).excluding(request.requester);

        let repositories: Vec<Arc<dyn ErasedRepository>> = session
            .store
            .syncable_repositories(&session.options.repositories, &session.options.filters)?;
        let mut counts = Vec::with_capacity(repositories.len());
        for repository in &repositories {
            counts.push(repository.change_count(window)?);
        }
        let tombstone_types: Vec<&str> = repositories
            .iter()
            .filter(|repository| repository.delete_policy().propagates())
            .map(|repository| repository.type_name())
            .collect();
        let tombstones = session.store.sync_tombstones(window, &tombstone_types)?;

        let mut result = ServiceResult {
            collection: Vec::new(),
            skipped: 0,
            total_count: counts.iter().sum::<usize>() + tombstones.len(),
        };

        let mut skip = request.skip;
        let mut remaining = session.client_options.items_per_page.max(1);
        for (repository, count) in repositories.iter().zip(counts) {
            if remaining == 0 {
                break;
            }
            if skip >= count {
                skip -= count;
                continue;
            }
            let page = repository.outgoing(
                window,
                Page::new(skip, remaining),
                &session.options.filters,
            )?;
            remaining = remaining.saturating_sub(page.objects.len() + page.filtered);
            skip = 0;
            result.skipped += page.filtered;
            for object in page.objects {
                self.push_outgoing(&mut result, object)?;
            }
        }
        if remaining > 0 {
            for tombstone in tombstones.iter().skip(skip).take(remaining) {
                self.push_outgoing(&mut result, SyncObject::from_tombstone(tombstone)?)?;
            }
        }

        tracing::debug!(
            peer = %self.name,
            %session_id,
            skip = request.skip,
            returned = result.collection.len(),
            withheld = result.skipped,
            total = result.total_count,
            "changes page"
        );
        Ok(result)
    }

    fn apply_changes(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>> {
        let session = self.session(session_id)?;
        self.apply_batch(&session, request)
    }

    fn get_corrections(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncIssue>,
    ) -> SyncResult<ServiceResult<SyncObject>> {
        let session = self.session(session_id)?;
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for issue in &request.collection {
            let local_type = self.outgoing.source_of(&issue.type_name);
            self.collect_correction(
                &session,
                EntityRef::new(local_type, issue.stable_id),
                &mut seen,
                &mut candidates,
            )?;
        }

        let mut result = ServiceResult {
            collection: Vec::new(),
            skipped: 0,
            total_count: candidates.len(),
        };
        for object in candidates {
            self.push_outgoing(&mut result, object)?;
        }
        tracing::debug!(peer = %self.name, %session_id, issues = request.collection.len(), corrections = result.collection.len(), "corrections");
        Ok(result)
    }

    fn apply_corrections(
        &self,
        session_id: Uuid,
        request: ServiceRequest<SyncObject>,
    ) -> SyncResult<ServiceResult<SyncIssue>> {
        let session = self.session(session_id)?;
        self.apply_batch(&session, request)
    }

    fn end_sync(&self, session: &SyncSession) -> SyncResult<()> {
        if self.sessions.write().remove(&session.session_id).is_some() {
            tracing::info!(peer = %self.name, session_id = %session.session_id, "session closed");
        }
        Ok(())
    }

    fn update_options(&self, session_id: Uuid, options: &SyncClientOptions) -> SyncResult<()> {
        let mut sessions = self.sessions.write();
        let open = sessions
            .get_mut(&session_id)
            .ok_or(SyncError::SessionNotFound(session_id))?;
        open.client_options = options.clone();
        Ok(())
    }
}

impl std::fmt::Debug for LocalPeer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalPeer")
            .field("name", &self.name)
            .field("sessions", &self.session_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{parent, store_on, Child, Parent};
    use chrono::Duration;
    use mirrorsync_core::{ForeignKey, ManualClock, StableId, SyncFilter, SyncableEntity};

    fn peer_with(store: Arc<SyncStore>) -> LocalPeer {
        LocalPeer::for_store("test", store)
    }

    fn open(peer: &LocalPeer, options: &SyncOptions) -> SyncSession {
        peer.begin_sync(Uuid::new_v4(), options).unwrap()
    }

    #[test]
    fn begin_sync_is_idempotent() {
        let clock = Arc::new(ManualClock::default());
        let peer = peer_with(Arc::new(store_on(clock.clone(), 1)));
        let id = Uuid::new_v4();

        let first = peer.begin_sync(id, &SyncOptions::new()).unwrap();
        clock.advance(Duration::minutes(1));
        let second = peer.begin_sync(id, &SyncOptions::new()).unwrap();
        assert_eq!(first, second);
        assert_eq!(peer.session_count(), 1);

        peer.end_sync(&first).unwrap();
        peer.end_sync(&first).unwrap();
        assert_eq!(peer.session_count(), 0);
    }

    #[test]
    fn begin_sync_rejects_unknown_repository() {
        let peer = peer_with(Arc::new(store_on(Arc::new(ManualClock::default()), 1)));
        let options = SyncOptions::new().with_repository("invoice");
        let err = peer.begin_sync(Uuid::new_v4(), &options).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn changes_are_bounded_by_session_start() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(store_on(clock.clone(), 1));
        let peer = peer_with(store.clone());
        store.save(parent("before")).unwrap();

        let session = open(&peer, &SyncOptions::new());
        store.save(parent("after")).unwrap();

        let far_future = session.started_on + Duration::days(1);
        let page = peer
            .get_changes(
                session.session_id,
                SyncRequest::new(None, Some(far_future)),
            )
            .unwrap();
        assert_eq!(page.total_count, 1);
        let names: Vec<String> = page
            .collection
            .iter()
            .map(|o| o.to_entity::<Parent>().unwrap().name)
            .collect();
        assert_eq!(names, vec!["before"]);
    }

    #[test]
    fn paging_spans_repositories_in_order() {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(store_on(clock, 1));
        let peer = peer_with(store.clone());
        let p = store.save(parent("p")).unwrap();
        for i in 0..3 {
            store
                .save(Child::new(&format!("c{i}"), ForeignKey::to_stable(p.stable_id())))
                .unwrap();
        }

        let options = SyncOptions::new()
            .with_repository("parent")
            .with_repository("child");
        let session = open(&peer, &options);
        peer.update_options(
            session.session_id,
            &SyncClientOptions::default().with_items_per_page(2),
        )
        .unwrap();

        let mut types = Vec::new();
        let mut skip = 0;
        loop {
            let page = peer
                .get_changes(session.session_id, SyncRequest::new(None, None).at(skip))
                .unwrap();
            assert_eq!(page.total_count, 4);
            skip += page.collection.len() + page.skipped;
            types.extend(page.collection.into_iter().map(|o| o.type_name));
            if skip >= page.total_count {
                break;
            }
        }
        assert_eq!(types, vec!["parent", "child", "child", "child"]);
    }

    #[test]
    fn filtered_entities_are_counted_not_sent() {
        let store = Arc::new(store_on(Arc::new(ManualClock::default()), 1));
        store.save(parent("keep")).unwrap();
        store.save(parent("secret")).unwrap();

        let filters =
            FilterSet::new().with(SyncFilter::new(|p: &Parent| !p.name.starts_with("secret")));
        let peer = peer_with(store).with_filters(filters);
        let session = open(&peer, &SyncOptions::new());

        let page = peer
            .get_changes(session.session_id, SyncRequest::default())
            .unwrap();
        assert_eq!(page.collection.len(), 1);
        assert_eq!(page.skipped, 1);
        assert_eq!(page.total_count, 2);
    }

    #[test]
    fn tombstones_follow_entities() {
        let store = Arc::new(store_on(Arc::new(ManualClock::default()), 1));
        let gone = store.save(parent("gone")).unwrap();
        store.save(parent("kept")).unwrap();
        store.remove::<Parent>(gone.stable_id()).unwrap();

        let peer = peer_with(store);
        let session = open(&peer, &SyncOptions::new());
        let page = peer
            .get_changes(session.session_id, SyncRequest::default())
            .unwrap();
        assert_eq!(page.total_count, 2);
        assert!(!page.collection[0].is_deletion());
        assert!(page.collection[1].is_deletion());
        assert_eq!(page.collection[1].stable_id, gone.stable_id());
    }

    #[test]
    fn corrections_send_parents_first_and_honor_filters() {
        let store = Arc::new(store_on(Arc::new(ManualClock::default()), 1));
        let p = store.save(parent("p")).unwrap();
        let c = store
            .save(Child::new("c", ForeignKey::to_stable(p.stable_id())))
            .unwrap();
        let hidden = store
            .save(Child::new("hidden", ForeignKey::to_stable(p.stable_id())))
            .unwrap();

        let filters = FilterSet::new().with(SyncFilter::new(|c: &Child| c.name != "hidden"));
        let peer = peer_with(store).with_filters(filters);
        let session = open(&peer, &SyncOptions::new());

        let issues = vec![
            SyncIssue::relationship(c.stable_id(), Child::TYPE_NAME, "missing parent"),
            SyncIssue::relationship(hidden.stable_id(), Child::TYPE_NAME, "missing parent"),
            SyncIssue::relationship(c.stable_id(), Child::TYPE_NAME, "duplicate"),
        ];
        let result = peer
            .get_corrections(session.session_id, ServiceRequest::new(issues))
            .unwrap();
        let ids: Vec<StableId> = result.collection.iter().map(|o| o.stable_id).collect();
        assert_eq!(ids, vec![p.stable_id(), c.stable_id()]);
    }

    #[test]
    fn apply_reports_unknown_types() {
        let store = Arc::new(store_on(Arc::new(ManualClock::default()), 1));
        let peer = peer_with(store);
        let session = open(&peer, &SyncOptions::new());

        let mut object = SyncObject::from_entity(&parent("p")).unwrap();
        object.type_name = "invoice".into();
        let result = peer
            .apply_changes(session.session_id, ServiceRequest::new(vec![object]))
            .unwrap();
        assert_eq!(result.collection.len(), 1);
        assert_eq!(result.collection[0].issue_type, SyncIssueType::UnknownType);
    }

    #[test]
    fn unknown_session_is_an_error() {
        let peer = peer_with(Arc::new(store_on(Arc::new(ManualClock::default()), 1)));
        let err = peer
            .get_changes(Uuid::new_v4(), SyncRequest::default())
            .unwrap_err();
        assert!(matches!(err, SyncError::SessionNotFound(_)));
        assert!(peer
            .update_options(Uuid::new_v4(), &SyncClientOptions::default())
            .is_err());
    }
}
