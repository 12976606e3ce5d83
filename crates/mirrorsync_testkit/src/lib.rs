//! # mirrorsync testkit
//!
//! Test utilities for mirrorsync.
//!
//! This crate provides:
//! - Fixture entity types (`Address`, `Account`, `LogEvent`, `LegacyAddress`)
//! - Store, peer and engine builders sharing a deterministic clock
//! - Property-based workload generators using proptest
//! - An opt-in tracing subscriber for test output
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mirrorsync_testkit::prelude::*;
//!
//! #[test]
//! fn address_reaches_the_server() {
//!     let pair = SyncPair::new();
//!     let home = pair.client.save(Address::new("1 Main St")).unwrap();
//!     pair.engine.run().unwrap();
//!     assert!(pair.server.read::<Address>(home.stable_id()).unwrap().is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod integration;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::integration::*;
    pub use crate::init_tracing;
}

pub use fixtures::*;
pub use generators::*;
pub use integration::*;

/// Installs a `tracing` subscriber that writes through the test harness.
///
/// Filtering follows `RUST_LOG`; output is silent when it is unset. Safe to
/// call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
