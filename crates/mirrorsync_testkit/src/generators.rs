//! Property-based test generators using proptest.
//!
//! Workloads are generated as plain operation lists and replayed against
//! two stores, so a failing case shrinks to a short, readable script.

use crate::fixtures::{Account, Address};
use mirrorsync_core::{CoreResult, SyncableEntity};
use mirrorsync_engine::SyncStore;
use proptest::prelude::*;
use proptest::sample::Index;

/// Which store an operation runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// The client store.
    Client,
    /// The server store.
    Server,
}

/// One local write in a generated workload.
#[derive(Debug, Clone)]
pub enum WorkloadOp {
    /// Saves a new address.
    AddAddress {
        /// Target store.
        side: Side,
        /// First line.
        line1: String,
    },
    /// Saves a new account, optionally billed to an existing address on
    /// the same side.
    AddAccount {
        /// Target store.
        side: Side,
        /// Account name.
        name: String,
        /// Picks among that store's addresses.
        address: Option<Index>,
    },
    /// Changes the first line of an existing address.
    RenameAddress {
        /// Target store.
        side: Side,
        /// Picks among that store's addresses.
        address: Index,
        /// New first line.
        line1: String,
    },
    /// Hard-deletes an existing account.
    DeleteAccount {
        /// Target store.
        side: Side,
        /// Picks among that store's accounts.
        account: Index,
    },
}

/// Strategy for a store side.
pub fn side_strategy() -> impl Strategy<Value = Side> {
    prop_oneof![Just(Side::Client), Just(Side::Server)]
}

/// Strategy for an address line.
pub fn address_line_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[1-9][0-9]{0,3} [A-Z][a-z]{2,10} (St|Rd|Ave)")
        .expect("Invalid regex")
}

/// Strategy for an account name.
pub fn account_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z]{3,12}").expect("Invalid regex")
}

/// Strategy for an unsaved address.
pub fn address_strategy() -> impl Strategy<Value = Address> {
    (address_line_strategy(), "[A-Z][a-z]{2,8}", "[0-9]{5}").prop_map(|(line1, city, code)| {
        Address::new(line1).in_city(city).with_postal_code(code)
    })
}

/// Strategy for one workload operation.
pub fn workload_op_strategy() -> impl Strategy<Value = WorkloadOp> {
    prop_oneof![
        3 => (side_strategy(), address_line_strategy())
            .prop_map(|(side, line1)| WorkloadOp::AddAddress { side, line1 }),
        3 => (side_strategy(), account_name_strategy(), prop::option::of(any::<Index>()))
            .prop_map(|(side, name, address)| WorkloadOp::AddAccount { side, name, address }),
        2 => (side_strategy(), any::<Index>(), address_line_strategy())
            .prop_map(|(side, address, line1)| WorkloadOp::RenameAddress { side, address, line1 }),
        1 => (side_strategy(), any::<Index>())
            .prop_map(|(side, account)| WorkloadOp::DeleteAccount { side, account }),
    ]
}

/// Strategy for a workload of up to `max_ops` operations.
pub fn workload_strategy(max_ops: usize) -> impl Strategy<Value = Vec<WorkloadOp>> {
    prop::collection::vec(workload_op_strategy(), 0..=max_ops)
}

/// Replays a workload. Operations that pick from an empty set are no-ops.
pub fn apply_workload(client: &SyncStore, server: &SyncStore, ops: &[WorkloadOp]) -> CoreResult<()> {
    let store = |side: Side| match side {
        Side::Client => client,
        Side::Server => server,
    };

    for op in ops {
        match op {
            WorkloadOp::AddAddress { side, line1 } => {
                store(*side).save(Address::new(line1.clone()))?;
            }
            WorkloadOp::AddAccount {
                side,
                name,
                address,
            } => {
                let target = store(*side);
                let mut account = Account::new(name.clone());
                if let Some(index) = address {
                    let addresses = target.read_all::<Address>()?;
                    if !addresses.is_empty() {
                        account = account.billed_to(addresses[index.index(addresses.len())].stable_id());
                    }
                }
                target.save(account)?;
            }
            WorkloadOp::RenameAddress {
                side,
                address,
                line1,
            } => {
                let target = store(*side);
                let addresses = target.read_all::<Address>()?;
                if !addresses.is_empty() {
                    let mut renamed = addresses[address.index(addresses.len())].clone();
                    renamed.line1 = line1.clone();
                    target.save(renamed)?;
                }
            }
            WorkloadOp::DeleteAccount { side, account } => {
                let target = store(*side);
                let accounts = target.read_all::<Account>()?;
                if !accounts.is_empty() {
                    let stable_id = accounts[account.index(accounts.len())].stable_id();
                    target.remove::<Account>(stable_id)?;
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::TestNetwork;

    proptest! {
        #[test]
        fn address_lines_are_non_empty(line in address_line_strategy()) {
            prop_assert!(!line.trim().is_empty());
        }

        #[test]
        fn workloads_replay_without_error(ops in workload_strategy(20)) {
            let network = TestNetwork::new();
            let client = network.store("client");
            let server = network.store("server");
            prop_assert!(apply_workload(&client, &server, &ops).is_ok());
        }
    }
}
