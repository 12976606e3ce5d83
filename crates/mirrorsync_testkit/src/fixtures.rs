//! Fixture entity types.
//!
//! `Address` and `Account` form the parent/child pair most tests use.
//! `LogEvent` is a local-only type, and `LegacyAddress` is a private schema
//! that only exists on one side of a converter.

use chrono::{DateTime, Utc};
use mirrorsync_core::{
    DeletePolicy, EntityHeader, ForeignKey, LocalId, Relationship, RelationshipMut, StableId,
    SyncableEntity,
};
use serde::{Deserialize, Serialize};

fn fresh_header() -> EntityHeader {
    EntityHeader::new(Utc::now())
}

/// A postal address. Deletions propagate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    /// Bookkeeping header.
    pub header: EntityHeader,
    /// First address line.
    pub line1: String,
    /// Second address line.
    pub line2: String,
    /// City.
    pub city: String,
    /// Postal code.
    pub postal_code: String,
}

impl Address {
    /// Creates an unsaved address with a fresh stable id.
    pub fn new(line1: impl Into<String>) -> Self {
        Self {
            header: fresh_header(),
            line1: line1.into(),
            line2: String::new(),
            city: String::new(),
            postal_code: String::new(),
        }
    }

    /// Creates an unsaved address with the given stable id.
    pub fn with_stable_id(stable_id: StableId, line1: impl Into<String>) -> Self {
        let mut address = Self::new(line1);
        address.header.stable_id = stable_id;
        address
    }

    /// Sets the city.
    #[must_use]
    pub fn in_city(mut self, city: impl Into<String>) -> Self {
        self.city = city.into();
        self
    }

    /// Sets the postal code.
    #[must_use]
    pub fn with_postal_code(mut self, postal_code: impl Into<String>) -> Self {
        self.postal_code = postal_code.into();
        self
    }
}

impl SyncableEntity for Address {
    const TYPE_NAME: &'static str = "address";
    const DELETE_POLICY: DeletePolicy = DeletePolicy::Propagate;

    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }
}

/// An account with an optional billing address. Deletions propagate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    /// Bookkeeping header.
    pub header: EntityHeader,
    /// Display name.
    pub name: String,
    /// Billing address.
    pub address: ForeignKey,
}

impl Account {
    /// Creates an unsaved account without an address.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            header: fresh_header(),
            name: name.into(),
            address: ForeignKey::NONE,
        }
    }

    /// Links the account to an address by stable id.
    #[must_use]
    pub fn billed_to(mut self, address: StableId) -> Self {
        self.address = ForeignKey::to_stable(address);
        self
    }

    /// Links the account to an address by local key.
    #[must_use]
    pub fn billed_to_local(mut self, address: LocalId) -> Self {
        self.address = ForeignKey::to_local(address);
        self
    }
}

impl SyncableEntity for Account {
    const TYPE_NAME: &'static str = "account";
    const DELETE_POLICY: DeletePolicy = DeletePolicy::Propagate;

    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }

    fn relationships(&self) -> Vec<Relationship> {
        vec![Relationship {
            name: "address",
            target: Address::TYPE_NAME,
            key: self.address,
        }]
    }

    fn relationships_mut(&mut self) -> Vec<RelationshipMut<'_>> {
        vec![RelationshipMut {
            name: "address",
            target: Address::TYPE_NAME,
            key: &mut self.address,
        }]
    }
}

/// A diagnostic record. Deletions stay local.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Bookkeeping header.
    pub header: EntityHeader,
    /// Message text.
    pub message: String,
    /// When the event happened, on the recording store's clock.
    pub occurred_on: DateTime<Utc>,
}

impl LogEvent {
    /// Creates an unsaved event.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            header: fresh_header(),
            message: message.into(),
            occurred_on: Utc::now(),
        }
    }
}

impl SyncableEntity for LogEvent {
    const TYPE_NAME: &'static str = "log_event";

    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }
}

/// An address in an older, single-line schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyAddress {
    /// Bookkeeping header.
    pub header: EntityHeader,
    /// Lines joined with `", "`.
    pub full_text: String,
}

impl LegacyAddress {
    /// Creates an unsaved legacy address.
    pub fn new(full_text: impl Into<String>) -> Self {
        Self {
            header: fresh_header(),
            full_text: full_text.into(),
        }
    }

    /// Splits into the current schema. Declines empty text.
    pub fn to_address(&self) -> Option<Address> {
        if self.full_text.trim().is_empty() {
            return None;
        }
        let mut parts = self.full_text.splitn(2, ", ");
        Some(Address {
            header: self.header.clone(),
            line1: parts.next().unwrap_or_default().to_string(),
            line2: parts.next().unwrap_or_default().to_string(),
            city: String::new(),
            postal_code: String::new(),
        })
    }

    /// Joins from the current schema.
    pub fn from_address(address: &Address) -> Self {
        let full_text = if address.line2.is_empty() {
            address.line1.clone()
        } else {
            format!("{}, {}", address.line1, address.line2)
        };
        Self {
            header: address.header.clone(),
            full_text,
        }
    }
}

impl SyncableEntity for LegacyAddress {
    const TYPE_NAME: &'static str = "legacy_address";
    const DELETE_POLICY: DeletePolicy = DeletePolicy::Propagate;

    fn header(&self) -> &EntityHeader {
        &self.header
    }

    fn header_mut(&mut self) -> &mut EntityHeader {
        &mut self.header
    }
}
