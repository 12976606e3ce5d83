//! # mirrorsync engine
//!
//! Peers, stores and the bidirectional sync engine.
//!
//! This crate provides:
//! - [`SyncStore`]: registry, identifier cache, clock, tombstones and save hooks
//! - Relationship resolution for incoming and local writes
//! - Schema converters between private and wire types
//! - The [`SyncPeer`] protocol with the in-process [`LocalPeer`]
//! - A remote peer over an [`HttpClient`] abstraction, plus a loopback server
//! - The [`SyncEngine`] pass loop with corrections, watermarks and retry
//!
//! ## Architecture
//!
//! A pass is **download-then-upload**:
//! 1. Open a session on both peers; each stamps `started_on` from its clock
//! 2. Page server changes into the client, applying each page as it arrives
//! 3. Page client changes into the server
//! 4. Once both pulls are done, run one correction round per direction
//! 5. Close both sessions, then advance the watermark of every direction
//!    whose source served all of its repositories
//!
//! Every stored row carries a store-local stamp taken when it was written
//! and the replica it came from. Change windows select on that stamp, so a
//! row relayed through the server reaches clients that synced before it
//! arrived. Rows are never sent back to the replica they came from.
//!
//! ## Cancellation
//!
//! [`SyncEngine::cancel`] only stops further protocol calls. Pages already
//! applied stay committed on the receiving store; the pass fails with
//! [`SyncError::Cancelled`] and the next pass re-reads the same windows.
//!
//! ## Key Invariants
//!
//! - A failed or cancelled pass never advances a watermark
//! - A pass restricted to some repositories keeps the watermarks in place
//! - Objects a filter rejects are never sent, not even as corrections
//! - Unresolvable relationships are reported as issues and never written
//! - Only stable ids cross the wire

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod converter;
mod engine;
mod error;
mod peer;
mod registry;
mod resolver;
mod stats;
mod store;
mod transport;

pub use config::{EngineConfig, RetryConfig};
pub use converter::{ConverterSet, SyncConverter, TypedConverter};
pub use engine::{SyncEngine, SyncState};
pub use error::{SyncError, SyncResult};
pub use peer::{LocalPeer, SyncPeer};
pub use registry::{CorrectionCandidate, ErasedRepository, OutgoingPage, RepositoryRegistry};
pub use resolver::{link_incoming, link_local, local_id_for};
pub use stats::{DirectionResult, StoreStats, StoreStatsSnapshot, SyncPassResult, SyncStats};
pub use store::{ApplyOutcome, SaveHook, SyncStore, SyncStoreBuilder, SyncStoreProvider};
pub use transport::{HttpClient, LoopbackClient, LoopbackServer, PeerServer, RemotePeer};

#[cfg(test)]
pub(crate) mod test_support {
    use crate::store::{SyncStore, SyncStoreBuilder};
    use chrono::Utc;
    use mirrorsync_core::{
        DeletePolicy, EntityHeader, ForeignKey, ManualClock, MemoryRepository, Relationship,
        RelationshipMut, StableId, SyncableEntity,
    };
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Parent {
        pub header: EntityHeader,
        pub name: String,
    }

    impl SyncableEntity for Parent {
        const TYPE_NAME: &'static str = "parent";
        const DELETE_POLICY: DeletePolicy = DeletePolicy::Propagate;

        fn header(&self) -> &EntityHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut EntityHeader {
            &mut self.header
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub(crate) struct Child {
        pub header: EntityHeader,
        pub name: String,
        pub parent: ForeignKey,
    }

    impl Child {
        pub fn new(name: &str, parent: ForeignKey) -> Self {
            Self {
                header: EntityHeader::new(Utc::now()),
                name: name.to_string(),
                parent,
            }
        }
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
                target: Parent::TYPE_NAME,
                key: self.parent,
            }]
        }

        fn relationships_mut(&mut self) -> Vec<RelationshipMut<'_>> {
            vec![RelationshipMut {
                name: "parent",
                target: Parent::TYPE_NAME,
                key: &mut self.parent,
            }]
        }
    }

    pub(crate) fn parent(name: &str) -> Parent {
        Parent {
            header: EntityHeader::new(Utc::now()),
            name: name.to_string(),
        }
    }

    pub(crate) fn child_of(parent: StableId) -> Child {
        Child::new("child", ForeignKey::to_stable(parent))
    }

    /// A store over fresh in-memory repositories whose local ids start at
    /// `first_local_id`, so two stores never share local keys.
    pub(crate) fn store_on(clock: Arc<ManualClock>, first_local_id: i64) -> SyncStore {
        builder(clock, first_local_id).build()
    }

    pub(crate) fn test_store(first_local_id: i64) -> SyncStore {
        store_on(Arc::new(ManualClock::default()), first_local_id)
    }

    pub(crate) fn test_store_with(
        first_local_id: i64,
        configure: impl FnOnce(SyncStoreBuilder) -> SyncStoreBuilder,
    ) -> SyncStore {
        configure(builder(Arc::new(ManualClock::default()), first_local_id)).build()
    }

    fn builder(clock: Arc<ManualClock>, first_local_id: i64) -> SyncStoreBuilder {
        SyncStore::builder(format!("store-{first_local_id}"))
            .with_clock(clock)
            .with_repository::<Parent>(Arc::new(MemoryRepository::starting_at(first_local_id)))
            .and_then(|b| {
                b.with_repository::<Child>(Arc::new(MemoryRepository::starting_at(
                    first_local_id,
                )))
            })
            .unwrap()
    }
}
