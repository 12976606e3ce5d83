//! Tombstone propagation and save hooks across a full pass.

use mirrorsync_core::{CoreError, CoreResult, EntityRef, SyncableEntity};
use mirrorsync_engine::{
    EngineConfig, LocalPeer, SaveHook, SyncEngine, SyncError, SyncState, SyncStore,
};
use mirrorsync_testkit::prelude::*;
use std::sync::Arc;

#[test]
fn deletions_propagate_for_propagating_types() {
    let pair = SyncPair::new();
    let address = pair.client.save(Address::new("9 Gone St")).unwrap();
    pair.engine.run().unwrap();
    assert!(pair
        .server
        .read::<Address>(address.stable_id())
        .unwrap()
        .is_some());

    pair.client.remove::<Address>(address.stable_id()).unwrap();
    let result = pair.engine.run().unwrap();
    assert_eq!(result.upload.pulled, 1);
    assert_eq!(result.upload.applied, 1);
    assert!(pair
        .server
        .read::<Address>(address.stable_id())
        .unwrap()
        .is_none());

    let after = pair.engine.run().unwrap();
    assert!(after.is_reset());
}

#[test]
fn later_edit_wins_over_earlier_delete() {
    let pair = SyncPair::new();
    let address = pair.server.save(Address::new("10 Keep St")).unwrap();
    pair.engine.run().unwrap();

    pair.client.remove::<Address>(address.stable_id()).unwrap();
    let mut edited = pair
        .server
        .read::<Address>(address.stable_id())
        .unwrap()
        .unwrap();
    edited.line2 = "Unit 5".into();
    pair.server.save(edited).unwrap();

    pair.engine.run_until_converged().unwrap();
    for store in [&pair.client, &pair.server] {
        let kept = store.read::<Address>(address.stable_id()).unwrap().unwrap();
        assert_eq!(kept.line2, "Unit 5");
    }
}

/// Touches an account's address whenever the account is saved.
struct TouchBillingAddress;

impl SaveHook for TouchBillingAddress {
    fn after_save(&self, store: &SyncStore, saved: &EntityRef) -> CoreResult<Vec<EntityRef>> {
        if saved.type_name != Account::TYPE_NAME {
            return Ok(Vec::new());
        }
        let Some(account) = store.read::<Account>(saved.stable_id)? else {
            return Ok(Vec::new());
        };
        if account.address.stable_id.is_nil() {
            return Ok(Vec::new());
        }
        Ok(vec![EntityRef::new(
            Address::TYPE_NAME,
            account.address.stable_id,
        )])
    }
}

/// Names the saved entity itself, forever.
struct Relentless;

impl SaveHook for Relentless {
    fn after_save(&self, _store: &SyncStore, saved: &EntityRef) -> CoreResult<Vec<EntityRef>> {
        Ok(vec![saved.clone()])
    }
}

fn hooked_pair(hook: Arc<dyn SaveHook>) -> (Arc<SyncStore>, Arc<SyncStore>, SyncEngine) {
    let network = TestNetwork::new();
    let client = network.store("client");
    let server = Arc::new(
        network
            .builder("server")
            .unwrap()
            .with_hook(hook)
            .build(),
    );
    let engine = SyncEngine::new(
        EngineConfig::default(),
        local_peer("client", &client),
        Arc::new(LocalPeer::for_store("server", server.clone())),
    );
    (client, server, engine)
}

#[test]
fn hooks_run_when_incoming_objects_are_applied() {
    let (client, server, engine) = hooked_pair(Arc::new(TouchBillingAddress));
    let address = client.save(Address::new("11 Hook Rd")).unwrap();
    client
        .save(Account::new("hooli").billed_to(address.stable_id()))
        .unwrap();

    engine.run().unwrap();
    let on_server = server
        .read::<Address>(address.stable_id())
        .unwrap()
        .unwrap();
    assert!(on_server.header.modified_on > address.header.modified_on);

    // The touched address flows back to the client on the next pass.
    let next = engine.run().unwrap();
    assert_eq!(next.download.pulled, 1);
    let on_client = client
        .read::<Address>(address.stable_id())
        .unwrap()
        .unwrap();
    assert_eq!(on_client.header.modified_on, on_server.header.modified_on);
}

#[test]
fn runaway_hooks_abort_the_pass() {
    let (client, _server, engine) = hooked_pair(Arc::new(Relentless));
    client.save(Address::new("12 Loop Ln")).unwrap();

    let err = engine.run().unwrap_err();
    assert!(matches!(
        err,
        SyncError::Core(CoreError::SaveLoopExceeded { max_passes: 3 })
    ));
    assert!(err.is_fatal());
    assert_eq!(engine.state(), SyncState::Error);
    assert_eq!(engine.options().last_synced_on_client, None);
}
