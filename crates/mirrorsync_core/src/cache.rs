//! Stable-to-local identifier cache.
//!
//! The cache is an accelerator for relationship resolution. A miss means
//! "unknown to the cache", never "does not exist": every caller must fall
//! back to the authoritative repository when [`IdentifierCache::get_entity_id`]
//! returns `None`.
//!
//! One cache instance belongs to one store. Concurrent sessions against the
//! same store share it, and writes are last-write-wins.

use crate::clock::{Clock, SystemClock, Timestamp};
use crate::config::CacheConfig;
use crate::error::CoreResult;
use crate::id::{LocalId, StableId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    local_id: LocalId,
    expires_on: Timestamp,
}

/// Something that can enumerate every persisted key pair of a type.
///
/// Implemented by stores so the cache can be warmed at startup.
pub trait KeySource {
    /// Returns the type names this source can enumerate.
    fn type_names(&self) -> Vec<String>;

    /// Returns every `(stable id, local id)` pair persisted for a type.
    fn read_all_keys(&self, type_name: &str) -> CoreResult<Vec<(StableId, LocalId)>>;
}

/// Per-type, time-bounded mapping from stable id to local id.
pub struct IdentifierCache {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    buckets: RwLock<HashMap<String, HashMap<StableId, CacheEntry>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl IdentifierCache {
    /// Creates an empty cache on the system clock.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates an empty cache reading expiry time from `clock`.
    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            buckets: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Records a mapping.
    ///
    /// No-op when `local_id` is absent, the stable id is nil, or the type is
    /// outside the configured inclusion list.
    pub fn add_entity_id(&self, type_name: &str, stable_id: StableId, local_id: Option<LocalId>) {
        let Some(local_id) = local_id else {
            return;
        };
        if stable_id.is_nil() || !self.config.includes(type_name) {
            return;
        }
        let entry = CacheEntry {
            local_id,
            expires_on: self.clock.now() + self.config.entry_lifetime,
        };
        self.buckets
            .write()
            .entry(type_name.to_string())
            .or_default()
            .insert(stable_id, entry);
    }

    /// Looks up a mapping. Expired entries read as misses.
    pub fn get_entity_id(&self, type_name: &str, stable_id: StableId) -> Option<LocalId> {
        let found = {
            let buckets = self.buckets.read();
            buckets
                .get(type_name)
                .and_then(|bucket| bucket.get(&stable_id))
                .copied()
        };
        match found {
            Some(entry) if entry.expires_on > self.clock.now() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.local_id)
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Removes one mapping.
    pub fn invalidate(&self, type_name: &str, stable_id: StableId) {
        let mut buckets = self.buckets.write();
        if let Some(bucket) = buckets.get_mut(type_name) {
            bucket.remove(&stable_id);
            if bucket.is_empty() {
                buckets.remove(type_name);
            }
        }
    }

    /// Clears every entry, or only one type's entries.
    pub fn initialize(&self, type_name: Option<&str>) {
        let mut buckets = self.buckets.write();
        match type_name {
            Some(type_name) => {
                buckets.remove(type_name);
            }
            None => buckets.clear(),
        }
    }

    /// Clears, then loads every persisted key pair from `source`.
    ///
    /// This walks every key of every included type, so run it once at
    /// startup rather than per pass. Returns the number of entries loaded.
    pub fn initialize_and_load(
        &self,
        source: &dyn KeySource,
        type_name: Option<&str>,
    ) -> CoreResult<usize> {
        self.initialize(type_name);

        let types = match type_name {
            Some(type_name) => vec![type_name.to_string()],
            None => source.type_names(),
        };

        let mut loaded = 0;
        for type_name in types {
            if !self.config.includes(&type_name) {
                continue;
            }
            for (stable_id, local_id) in source.read_all_keys(&type_name)? {
                self.add_entity_id(&type_name, stable_id, Some(local_id));
                loaded += 1;
            }
        }
        tracing::debug!(loaded, "identifier cache loaded");
        Ok(loaded)
    }

    /// Sweeps expired entries and drops empty buckets. Returns how many
    /// entries were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut buckets = self.buckets.write();
        let mut removed = 0;
        for bucket in buckets.values_mut() {
            let before = bucket.len();
            bucket.retain(|_, entry| entry.expires_on > now);
            removed += before - bucket.len();
        }
        buckets.retain(|_, bucket| !bucket.is_empty());
        removed
    }

    /// Drops every entry unconditionally.
    pub fn clear(&self) {
        self.buckets.write().clear();
    }

    /// Returns the number of entries, expired or not.
    pub fn len(&self) -> usize {
        self.buckets.read().values().map(HashMap::len).sum()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of per-type buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    /// Returns `(hits, misses)` since creation.
    pub fn hit_counts(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

impl Default for IdentifierCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl std::fmt::Debug for IdentifierCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentifierCache")
            .field("config", &self.config)
            .field("entries", &self.len())
            .finish()
    }
}
