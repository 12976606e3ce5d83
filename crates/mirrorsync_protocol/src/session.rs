//! Sessions and per-pass options.

use chrono::{DateTime, Utc};
use mirrorsync_core::{FilterSet, ReplicaId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// One peer's view of a sync pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    /// Shared by both peers for the pass.
    pub session_id: Uuid,
    /// Peer-local clock reading at `begin_sync`. Upper bound of this pass's
    /// change window on that peer.
    pub started_on: DateTime<Utc>,
    /// The peer's store.
    pub replica_id: ReplicaId,
    /// True when the session enumerates every repository the peer's store
    /// registers, so the window it serves covers the whole store.
    #[serde(default)]
    pub covers_all: bool,
}

/// Per-pass configuration shared by both peers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncOptions {
    /// Repositories to sync, in dependency order. Empty means every
    /// syncable repository in alphabetical order.
    ///
    /// A list naming every registered type is a full pass. A list leaving
    /// types out is a partial pass and does not move the watermarks, so the
    /// omitted types are still sent by the next full pass.
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Watermark for changes read from the client.
    #[serde(default)]
    pub last_synced_on_client: Option<DateTime<Utc>>,

    /// Watermark for changes read from the server.
    #[serde(default)]
    pub last_synced_on_server: Option<DateTime<Utc>>,

    /// Free-form key/value bag.
    #[serde(default)]
    pub values: BTreeMap<String, String>,

    /// Outgoing filters. Peer-local: never serialized.
    #[serde(skip)]
    pub filters: FilterSet,
}

impl SyncOptions {
    /// Creates empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a repository to the order list.
    #[must_use]
    pub fn with_repository(mut self, type_name: impl Into<String>) -> Self {
        self.repositories.push(type_name.into());
        self
    }

    /// Sets the filter set.
    #[must_use]
    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// Sets a bag value.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

/// Session-level protocol options, adjustable mid-session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncClientOptions {
    /// Stamp `created_on` from the receiver's clock when applying a new entity.
    pub maintain_created_on: bool,
    /// Stamp `modified_on` from the receiver's clock when applying.
    ///
    /// Off by default: applied entities keep the source timestamps, which is
    /// what lets a second pass with no new writes pull nothing.
    pub maintain_modified_on: bool,
    /// Page size for `get_changes`.
    pub items_per_page: usize,
    /// Send filter-admitted parents along with corrections.
    pub include_related: bool,
}

impl Default for SyncClientOptions {
    fn default() -> Self {
        Self {
            maintain_created_on: false,
            maintain_modified_on: false,
            items_per_page: 100,
            include_related: true,
        }
    }
}

impl SyncClientOptions {
    /// Sets the page size.
    #[must_use]
    pub fn with_items_per_page(mut self, items: usize) -> Self {
        self.items_per_page = items.max(1);
        self
    }

    /// Sets whether corrections carry related parents.
    #[must_use]
    pub fn with_include_related(mut self, value: bool) -> Self {
        self.include_related = value;
        self
    }

    /// Sets whether applied entities are re-stamped.
    #[must_use]
    pub fn with_maintain_timestamps(mut self, created_on: bool, modified_on: bool) -> Self {
        self.maintain_created_on = created_on;
        self.maintain_modified_on = modified_on;
        self
    }
}
