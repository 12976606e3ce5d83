//! # mirrorsync core
//!
//! Building blocks shared by every mirrorsync store.
//!
//! This crate provides:
//! - Stable and local identifiers
//! - The syncable entity contract and tombstones
//! - The repository adapter contract, plus an in-memory adapter
//! - The stable-to-local identifier cache
//! - Per-type filter sets
//! - The capped save-until-stable loop
//!
//! ## Key Invariants
//!
//! - Only stable ids cross a store boundary; local ids never leave their store
//! - A nil stable id on a relationship means the relationship is absent
//! - The identifier cache is an accelerator, never a source of truth
//! - Store timestamps come from the store's own [`Clock`]
//! - Change windows select rows by when they were stored locally, not by
//!   the source's `modified_on`

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cache;
mod clock;
mod config;
mod entity;
mod error;
mod filter;
mod id;
mod memory;
mod repository;
mod save;

pub use cache::{IdentifierCache, KeySource};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::CacheConfig;
pub use entity::{
    DeletePolicy, EntityHeader, EntityRef, ForeignKey, Relationship, RelationshipMut,
    SyncableEntity, Tombstone,
};
pub use error::{CoreError, CoreResult};
pub use filter::{FilterSet, SyncFilter};
pub use id::{LocalId, ReplicaId, StableId};
pub use memory::{MemoryRepository, MemoryTombstones};
pub use repository::{ChangeWindow, Page, Repository, TombstoneRepository};
pub use save::{save_until_stable, MAX_SAVE_PASSES};
