//! Error types for mirrorsync core.

use crate::id::StableId;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in mirrorsync core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Entity payload could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the codec failure.
        message: String,
    },

    /// No repository is registered under the given type name.
    #[error("repository not registered: {type_name}")]
    RepositoryNotRegistered {
        /// The routing type name that was looked up.
        type_name: String,
    },

    /// A repository was registered twice under the same type name.
    #[error("repository already registered: {type_name}")]
    DuplicateRepository {
        /// The conflicting type name.
        type_name: String,
    },

    /// Entity not found.
    #[error("entity not found: {stable_id} of type {type_name}")]
    EntityNotFound {
        /// The entity type searched.
        type_name: String,
        /// The stable id that was not found.
        stable_id: StableId,
    },

    /// An entity was written without a stable id.
    #[error("entity of type {type_name} has no stable id")]
    MissingStableId {
        /// The entity type.
        type_name: String,
    },

    /// The save loop did not settle within its pass limit.
    #[error("save loop exceeded {max_passes} passes; relationship cascade is likely cyclic")]
    SaveLoopExceeded {
        /// The configured pass limit.
        max_passes: usize,
    },

    /// The backing store failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Creates a repository-not-registered error.
    pub fn repository_not_registered(type_name: impl Into<String>) -> Self {
        Self::RepositoryNotRegistered {
            type_name: type_name.into(),
        }
    }

    /// Creates an entity-not-found error.
    pub fn entity_not_found(type_name: impl Into<String>, stable_id: StableId) -> Self {
        Self::EntityNotFound {
            type_name: type_name.into(),
            stable_id,
        }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true if this error reflects a configuration mistake rather
    /// than a runtime failure of the store.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            CoreError::RepositoryNotRegistered { .. } | CoreError::DuplicateRepository { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors() {
        assert!(CoreError::repository_not_registered("address").is_configuration_error());
        assert!(!CoreError::storage("disk full").is_configuration_error());
        assert!(!CoreError::SaveLoopExceeded { max_passes: 3 }.is_configuration_error());
    }

    #[test]
    fn error_display() {
        let err = CoreError::SaveLoopExceeded { max_passes: 3 };
        assert!(err.to_string().contains('3'));

        let err = CoreError::repository_not_registered("account");
        assert_eq!(err.to_string(), "repository not registered: account");
    }
}
