//! # mirrorsync protocol
//!
//! Sync protocol types and CBOR codecs for mirrorsync.
//!
//! This crate provides:
//! - `SyncObject` and `SyncStatus`, the wire snapshot of one entity
//! - `SyncIssue` for non-fatal apply failures
//! - `SyncSession`, `SyncOptions`, and `SyncClientOptions`
//! - Request and result shapes for every protocol operation
//! - The `SyncMessage` envelope and its CBOR encoding
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod codec;
mod error;
mod issue;
mod messages;
mod object;
mod session;

pub use codec::{from_cbor, to_cbor};
pub use error::{ProtocolError, ProtocolResult};
pub use issue::{SyncIssue, SyncIssueType};
pub use messages::{ServiceRequest, ServiceResult, SyncMessage, SyncRequest};
pub use object::{SyncObject, SyncStatus};
pub use session::{SyncClientOptions, SyncOptions, SyncSession};
