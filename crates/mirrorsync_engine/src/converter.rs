//! Schema converters between a peer's private types and the wire types.
//!
//! A converter maps objects of one type name to another. Incoming
//! converters run right after an object is received and before it is routed;
//! outgoing converters run on every object a peer sends. A converter that
//! returns `None` declines the object, which is then dropped silently.

use crate::error::SyncResult;
use mirrorsync_core::SyncableEntity;
use mirrorsync_protocol::SyncObject;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Translates sync objects from one type name to another.
pub trait SyncConverter: Send + Sync {
    /// Type name this converter accepts.
    fn source_type(&self) -> &str;

    /// Type name this converter produces.
    fn target_type(&self) -> &str;

    /// Converts an object, or declines it with `None`.
    fn convert(&self, object: &SyncObject) -> SyncResult<Option<SyncObject>>;
}

/// A converter between two entity types, backed by a closure.
///
/// Deletions are converted by renaming the tombstone's type, since there is
/// no entity payload to translate.
pub struct TypedConverter<A, B> {
    map: Arc<dyn Fn(&A) -> Option<B> + Send + Sync>,
    _types: PhantomData<fn(A) -> B>,
}

impl<A: SyncableEntity, B: SyncableEntity> TypedConverter<A, B> {
    /// Creates a converter from a mapping closure.
    pub fn new<F>(map: F) -> Self
    where
        F: Fn(&A) -> Option<B> + Send + Sync + 'static,
    {
        Self {
            map: Arc::new(map),
            _types: PhantomData,
        }
    }
}

impl<A: SyncableEntity, B: SyncableEntity> SyncConverter for TypedConverter<A, B> {
    fn source_type(&self) -> &str {
        A::TYPE_NAME
    }

    fn target_type(&self) -> &str {
        B::TYPE_NAME
    }

    fn convert(&self, object: &SyncObject) -> SyncResult<Option<SyncObject>> {
        if object.is_deletion() {
            let mut tombstone = object.to_tombstone()?;
            tombstone.type_name = B::TYPE_NAME.to_string();
            return Ok(Some(SyncObject::from_tombstone(&tombstone)?));
        }
        let source: A = object.to_entity()?;
        match (self.map)(&source) {
            Some(target) => Ok(Some(SyncObject::from_entity(&target)?)),
            None => Ok(None),
        }
    }
}

/// The converters of one direction of a peer.
///
/// An empty set passes everything through. Objects whose type has no
/// converter also pass through unchanged.
#[derive(Clone, Default)]
pub struct ConverterSet {
    converters: Vec<Arc<dyn SyncConverter>>,
}

impl ConverterSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a converter.
    #[must_use]
    pub fn with(mut self, converter: impl SyncConverter + 'static) -> Self {
        self.converters.push(Arc::new(converter));
        self
    }

    /// Returns true if no converters are installed.
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }

    /// Converts an object. `None` means it was declined.
    pub fn convert(&self, object: &SyncObject) -> SyncResult<Option<SyncObject>> {
        match self
            .converters
            .iter()
            .find(|c| c.source_type() == object.type_name)
        {
            Some(converter) => converter.convert(object),
            None => Ok(Some(object.clone())),
        }
    }

    /// Maps a produced type name back to the type it was converted from.
    pub fn source_of<'a>(&'a self, target_type: &'a str) -> &'a str {
        self.converters
            .iter()
            .find(|c| c.target_type() == target_type)
            .map_or(target_type, |c| c.source_type())
    }
}

impl fmt::Debug for ConverterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .converters
            .iter()
            .map(|c| format!("{} -> {}", c.source_type(), c.target_type()))
            .collect();
        f.debug_struct("ConverterSet").field("converters", &pairs).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{parent, Parent};
    use chrono::Utc;
    use mirrorsync_core::{DeletePolicy, EntityHeader, Tombstone};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Label {
        header: EntityHeader,
        text: String,
    }

    impl SyncableEntity for Label {
        const TYPE_NAME: &'static str = "label";
        const DELETE_POLICY: DeletePolicy = DeletePolicy::Propagate;

        fn header(&self) -> &EntityHeader {
            &self.header
        }

        fn header_mut(&mut self) -> &mut EntityHeader {
            &mut self.header
        }
    }

    fn to_label() -> ConverterSet {
        ConverterSet::new().with(TypedConverter::new(|p: &Parent| {
            (!p.name.is_empty()).then(|| Label {
                header: p.header.clone(),
                text: p.name.to_uppercase(),
            })
        }))
    }

    #[test]
    fn converts_matching_type() {
        let object = SyncObject::from_entity(&parent("home")).unwrap();
        let converted = to_label().convert(&object).unwrap().unwrap();
        assert_eq!(converted.type_name, "label");
        assert_eq!(converted.stable_id, object.stable_id);
        let label: Label = converted.to_entity().unwrap();
        assert_eq!(label.text, "HOME");
    }

    #[test]
    fn declined_objects_are_dropped() {
        let object = SyncObject::from_entity(&parent("")).unwrap();
        assert!(to_label().convert(&object).unwrap().is_none());
    }

    #[test]
    fn other_types_pass_through() {
        let label = Label {
            header: EntityHeader::new(Utc::now()),
            text: "x".into(),
        };
        let object = SyncObject::from_entity(&label).unwrap();
        assert_eq!(to_label().convert(&object).unwrap(), Some(object));
    }

    #[test]
    fn deletions_are_renamed() {
        let p = parent("gone");
        let object =
            SyncObject::from_tombstone(&Tombstone::for_entity(&p, Utc::now())).unwrap();
        let converted = to_label().convert(&object).unwrap().unwrap();
        assert!(converted.is_deletion());
        assert_eq!(converted.type_name, "label");
        assert_eq!(converted.to_tombstone().unwrap().type_name, "label");
    }

    #[test]
    fn reverse_mapping() {
        let set = to_label();
        assert_eq!(set.source_of("label"), "parent");
        assert_eq!(set.source_of("other"), "other");
    }
}
