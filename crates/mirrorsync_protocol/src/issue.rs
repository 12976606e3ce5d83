//! Sync issues: non-fatal failures to apply part of a batch.

use mirrorsync_core::StableId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why an incoming object could not be applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncIssueType {
    /// A relationship points at an entity the receiver does not have.
    RelationshipConstraint,
    /// The receiver has no repository for the object's type.
    UnknownType,
    /// The payload could not be decoded.
    InvalidData,
}

impl fmt::Display for SyncIssueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncIssueType::RelationshipConstraint => "relationship constraint",
            SyncIssueType::UnknownType => "unknown type",
            SyncIssueType::InvalidData => "invalid data",
        };
        f.write_str(name)
    }
}

/// A reported, non-fatal failure to apply one sync object.
///
/// Issues are sent back to the source peer as correction requests. They
/// carry enough to find the entity again: its stable id and type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncIssue {
    /// Stable id of the entity that was not applied.
    pub stable_id: StableId,
    /// Wire type name of the entity.
    pub type_name: String,
    /// Kind of failure.
    pub issue_type: SyncIssueType,
    /// Human-readable description.
    pub message: String,
}

impl SyncIssue {
    /// Creates an issue.
    pub fn new(
        stable_id: StableId,
        type_name: impl Into<String>,
        issue_type: SyncIssueType,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stable_id,
            type_name: type_name.into(),
            issue_type,
            message: message.into(),
        }
    }

    /// Creates a relationship-constraint issue.
    pub fn relationship(
        stable_id: StableId,
        type_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            stable_id,
            type_name,
            SyncIssueType::RelationshipConstraint,
            message,
        )
    }

    /// Returns true if a correction round may resolve this issue.
    pub fn is_correctable(&self) -> bool {
        self.issue_type == SyncIssueType::RelationshipConstraint
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}): {}",
            self.type_name, self.stable_id, self.issue_type, self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_issue_is_correctable() {
        let issue = SyncIssue::relationship(StableId::new(), "account", "address missing");
        assert!(issue.is_correctable());
        assert!(issue.to_string().contains("relationship constraint"));

        let issue = SyncIssue::new(StableId::new(), "x", SyncIssueType::UnknownType, "no repo");
        assert!(!issue.is_correctable());
    }
}
