//! Identifier cache configuration.

use chrono::Duration;
use std::collections::BTreeSet;

/// Configuration for an [`crate::IdentifierCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// How long an entry stays valid after it was written.
    pub entry_lifetime: Duration,

    /// Types the cache keeps entries for. `None` caches every type.
    pub included_types: Option<BTreeSet<String>>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            entry_lifetime: Duration::minutes(15),
            included_types: None,
        }
    }
}

impl CacheConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the entry lifetime.
    #[must_use]
    pub fn with_entry_lifetime(mut self, lifetime: Duration) -> Self {
        self.entry_lifetime = lifetime;
        self
    }

    /// Restricts caching to the given type. May be called repeatedly.
    #[must_use]
    pub fn with_included_type(mut self, type_name: impl Into<String>) -> Self {
        self.included_types
            .get_or_insert_with(BTreeSet::new)
            .insert(type_name.into());
        self
    }

    /// Returns true if entries of `type_name` are cached.
    pub fn includes(&self, type_name: &str) -> bool {
        self.included_types
            .as_ref()
            .map_or(true, |types| types.contains(type_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_caches_everything() {
        let config = CacheConfig::default();
        assert!(config.includes("address"));
        assert!(config.includes("anything"));
        assert_eq!(config.entry_lifetime, Duration::minutes(15));
    }

    #[test]
    fn inclusion_list_is_opt_in() {
        let config = CacheConfig::new()
            .with_included_type("address")
            .with_entry_lifetime(Duration::seconds(30));
        assert!(config.includes("address"));
        assert!(!config.includes("account"));
        assert_eq!(config.entry_lifetime, Duration::seconds(30));
    }
}
