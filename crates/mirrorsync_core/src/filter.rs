//! Per-type inclusion filters.
//!
//! A [`SyncFilter`] is a predicate over one entity type; filters compose with
//! [`SyncFilter::and`], [`SyncFilter::or`], and [`SyncFilter::not`]. A
//! [`FilterSet`] holds at most one filter per type and is consulted on every
//! outgoing path: change enumeration and correction replies alike.

use crate::entity::SyncableEntity;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// A composable inclusion predicate over one entity type.
pub struct SyncFilter<T> {
    predicate: Predicate<T>,
}

impl<T: 'static> SyncFilter<T> {
    /// Creates a filter from a predicate.
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Arc::new(predicate),
        }
    }

    /// A filter that admits everything.
    pub fn all() -> Self {
        Self::new(|_| true)
    }

    /// A filter that admits nothing.
    pub fn none() -> Self {
        Self::new(|_| false)
    }

    /// Admits entities both filters admit.
    #[must_use]
    pub fn and(self, other: SyncFilter<T>) -> Self {
        let (a, b) = (self.predicate, other.predicate);
        Self::new(move |entity| a(entity) && b(entity))
    }

    /// Admits entities either filter admits.
    #[must_use]
    pub fn or(self, other: SyncFilter<T>) -> Self {
        let (a, b) = (self.predicate, other.predicate);
        Self::new(move |entity| a(entity) || b(entity))
    }

    /// Admits entities this filter rejects.
    #[must_use]
    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Self {
        let a = self.predicate;
        Self::new(move |entity| !a(entity))
    }

    /// Evaluates the filter.
    pub fn matches(&self, entity: &T) -> bool {
        (self.predicate)(entity)
    }
}

impl<T> Clone for SyncFilter<T> {
    fn clone(&self) -> Self {
        Self {
            predicate: Arc::clone(&self.predicate),
        }
    }
}

impl<T> fmt::Debug for SyncFilter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SyncFilter(..)")
    }
}

/// A set of filters keyed by entity type name.
///
/// In the default mode, types without a filter are admitted unconditionally.
/// In exclusive mode ([`FilterSet::exclusive`]), only types that have a
/// filter participate at all.
#[derive(Clone, Default)]
pub struct FilterSet {
    filters: HashMap<String, Arc<dyn Any + Send + Sync>>,
    exclusive: bool,
}

impl FilterSet {
    /// Creates an empty, non-exclusive filter set that admits everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty filter set in exclusive mode.
    pub fn exclusive() -> Self {
        Self {
            filters: HashMap::new(),
            exclusive: true,
        }
    }

    /// Installs the filter for `T`, replacing any previous one.
    pub fn add<T: SyncableEntity>(&mut self, filter: SyncFilter<T>) {
        self.filters
            .insert(T::TYPE_NAME.to_string(), Arc::new(filter));
    }

    /// Builder form of [`FilterSet::add`].
    #[must_use]
    pub fn with<T: SyncableEntity>(mut self, filter: SyncFilter<T>) -> Self {
        self.add(filter);
        self
    }

    /// Admits every entity of `T`. Useful in exclusive mode.
    #[must_use]
    pub fn with_type<T: SyncableEntity>(self) -> Self {
        self.with(SyncFilter::<T>::all())
    }

    /// Returns true if entities of `type_name` can participate at all.
    pub fn includes_type(&self, type_name: &str) -> bool {
        !self.exclusive || self.filters.contains_key(type_name)
    }

    /// Returns true if the entity passes its type's filter.
    pub fn admits<T: SyncableEntity>(&self, entity: &T) -> bool {
        match self.filters.get(T::TYPE_NAME) {
            Some(filter) => filter
                .downcast_ref::<SyncFilter<T>>()
                .map_or(true, |filter| filter.matches(entity)),
            None => !self.exclusive,
        }
    }

    /// Returns true if the set admits everything.
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && !self.exclusive
    }

    /// Returns true if the set is in exclusive mode.
    pub fn is_exclusive(&self) -> bool {
        self.exclusive
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&String> = self.filters.keys().collect();
        types.sort();
        f.debug_struct("FilterSet")
            .field("types", &types)
            .field("exclusive", &self.exclusive)
            .finish()
    }
}
