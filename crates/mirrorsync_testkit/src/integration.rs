//! Store, peer and engine builders for cross-crate tests.
//!
//! Every store built from one [`TestNetwork`] shares a single
//! [`ManualClock`], so timestamps are strictly increasing across stores and
//! tests are deterministic. Each store's repositories start their local ids
//! at a different offset, which makes a leaked local id fail loudly.

use crate::fixtures::{Account, Address, LegacyAddress, LogEvent};
use chrono::Duration;
use mirrorsync_core::{CoreResult, ManualClock, MemoryRepository, Repository};
use mirrorsync_engine::{
    ConverterSet, EngineConfig, LocalPeer, LoopbackClient, PeerServer, RemotePeer, SyncEngine,
    SyncPeer, SyncStore, SyncStoreBuilder, TypedConverter,
};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

const LOCAL_ID_STRIDE: i64 = 100_000;

/// A remote peer served in-process over the loopback transport.
pub type LoopbackPeer = RemotePeer<LoopbackClient<PeerServer<Arc<LocalPeer>>>>;

/// Shared clock and local-id offsets for a group of test stores.
#[derive(Debug)]
pub struct TestNetwork {
    clock: Arc<ManualClock>,
    next_offset: AtomicI64,
}

impl TestNetwork {
    /// Creates a network whose clock starts at the Unix epoch.
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ManualClock::default()),
            next_offset: AtomicI64::new(1),
        }
    }

    /// The shared clock.
    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    /// Moves the shared clock forward.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Starts a store builder with the shared clock and the fixture
    /// repositories for `Address`, `Account` and `LogEvent` registered.
    pub fn builder(&self, name: &str) -> CoreResult<SyncStoreBuilder> {
        let first = self.next_offset.fetch_add(LOCAL_ID_STRIDE, Ordering::SeqCst);
        SyncStore::builder(name)
            .with_clock(self.clock.clone())
            .with_repository::<Address>(memory::<Address>(first))?
            .with_repository::<Account>(memory::<Account>(first))?
            .with_repository::<LogEvent>(memory::<LogEvent>(first))
    }

    /// Builds a store with the fixture repositories.
    pub fn store(&self, name: &str) -> Arc<SyncStore> {
        Arc::new(
            self.builder(name)
                .expect("fixture repositories register once")
                .build(),
        )
    }

    /// Builds a store whose address repository holds `LegacyAddress`
    /// instead of `Address`.
    pub fn legacy_store(&self, name: &str) -> Arc<SyncStore> {
        let first = self.next_offset.fetch_add(LOCAL_ID_STRIDE, Ordering::SeqCst);
        let store = SyncStore::builder(name)
            .with_clock(self.clock.clone())
            .with_repository::<LegacyAddress>(memory::<LegacyAddress>(first))
            .and_then(|b| b.with_repository::<Account>(memory::<Account>(first)))
            .expect("fixture repositories register once")
            .build();
        Arc::new(store)
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

fn memory<T: mirrorsync_core::SyncableEntity>(first: i64) -> Arc<dyn Repository<T>> {
    Arc::new(MemoryRepository::<T>::starting_at(first))
}

/// An in-process peer over a store.
pub fn local_peer(name: &str, store: &Arc<SyncStore>) -> Arc<LocalPeer> {
    Arc::new(LocalPeer::for_store(name, Arc::clone(store)))
}

/// Serves `peer` behind the loopback transport and returns the remote end.
pub fn loopback_peer(peer: Arc<LocalPeer>) -> LoopbackPeer {
    RemotePeer::new(
        "http://mirrorsync.test",
        LoopbackClient::new(PeerServer::new(peer)),
    )
}

/// Converters for a peer whose store holds `LegacyAddress`: incoming
/// `address` objects become `legacy_address`, and back on the way out.
pub fn legacy_converters() -> (ConverterSet, ConverterSet) {
    let incoming = ConverterSet::new().with(TypedConverter::new(|address: &Address| {
        Some(LegacyAddress::from_address(address))
    }));
    let outgoing = ConverterSet::new().with(TypedConverter::new(LegacyAddress::to_address));
    (incoming, outgoing)
}

/// An engine between two in-process peers.
pub fn engine_between(
    config: EngineConfig,
    client: Arc<dyn SyncPeer>,
    server: Arc<dyn SyncPeer>,
) -> SyncEngine {
    SyncEngine::new(config, client, server)
}

/// Two stores on one network with an engine between their peers.
pub struct SyncPair {
    /// The shared network.
    pub network: TestNetwork,
    /// Client-side store.
    pub client: Arc<SyncStore>,
    /// Server-side store.
    pub server: Arc<SyncStore>,
    /// Client-side peer.
    pub client_peer: Arc<LocalPeer>,
    /// Server-side peer.
    pub server_peer: Arc<LocalPeer>,
    /// The engine.
    pub engine: SyncEngine,
}

impl SyncPair {
    /// Creates a pair with default engine configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates a pair with the given engine configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self::with_peers(config, |_, peer| peer, |_, peer| peer)
    }

    /// Creates a pair, letting the caller adjust each peer before the
    /// engine is built.
    pub fn with_peers(
        config: EngineConfig,
        client: impl FnOnce(&Arc<SyncStore>, LocalPeer) -> LocalPeer,
        server: impl FnOnce(&Arc<SyncStore>, LocalPeer) -> LocalPeer,
    ) -> Self {
        let network = TestNetwork::new();
        let client_store = network.store("client");
        let server_store = network.store("server");
        let client_peer = Arc::new(client(
            &client_store,
            LocalPeer::for_store("client", client_store.clone()),
        ));
        let server_peer = Arc::new(server(
            &server_store,
            LocalPeer::for_store("server", server_store.clone()),
        ));
        let engine = engine_between(config, client_peer.clone(), server_peer.clone());
        Self {
            network,
            client: client_store,
            server: server_store,
            client_peer,
            server_peer,
            engine,
        }
    }
}

impl Default for SyncPair {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_core::SyncableEntity;

    #[test]
    fn stores_use_distinct_local_ids() {
        let network = TestNetwork::new();
        let a = network.store("a");
        let b = network.store("b");
        let on_a = a.save(Address::new("x")).unwrap();
        let on_b = b.save(Address::new("y")).unwrap();
        assert_ne!(on_a.local_id(), on_b.local_id());
    }

    #[test]
    fn stores_share_the_clock() {
        let network = TestNetwork::new();
        let a = network.store("a");
        let b = network.store("b");
        let first = a.save(Address::new("x")).unwrap();
        let second = b.save(Address::new("y")).unwrap();
        assert!(second.header().modified_on > first.header().modified_on);
    }
}
