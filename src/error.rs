//! Error types for the intid registry and container index.
//!
//! All errors are strongly typed using thiserror so callers can branch on
//! the specific failure (a missing id is not the same as a missing object).

use thiserror::Error;

use crate::id::IntId;

/// Errors surfaced by the registry, container index, facades and weak refs.
#[derive(Debug, Error)]
pub enum IntIdError {
    /// The object has no (valid) id in the registry.
    #[error("Object {object} has no id in registry '{registry}'")]
    IdMissing {
        /// Debug rendering of the unwrapped object.
        object: String,
        /// Attribute name of the registry that was asked.
        registry: String,
    },

    /// The id is unknown, or its stable key no longer resolves to an object.
    #[error("No object for id {id} in registry '{registry}'")]
    ObjectMissing {
        /// The id that failed to resolve.
        id: IntId,
        /// Attribute name of the registry that was asked.
        registry: String,
    },

    /// `force_register` with checking enabled hit an occupied id.
    #[error("Id {id} is already in use")]
    IdInUse {
        /// The occupied id.
        id: IntId,
    },

    /// `force_unregister` was given an object that is not registered under the id.
    #[error("Object {object} is not the object registered under id {id}")]
    KeyMismatch {
        /// The id being unregistered.
        id: IntId,
        /// Debug rendering of the mismatching object.
        object: String,
    },

    /// Id generation could not find a free id.
    #[error("Id domain exhausted after {attempts} attempts (max id {max_id})")]
    DomainExhausted {
        /// Number of candidate draws made.
        attempts: u32,
        /// Exclusive upper bound of the id domain.
        max_id: u64,
    },

    /// The object cannot produce a stable key and so cannot be registered.
    #[error("Object {object} cannot produce a stable key")]
    NotPersistable {
        /// Debug rendering of the object.
        object: String,
    },

    /// A container key was not present.
    #[error("Container not found: '{container}'")]
    KeyMissing {
        /// The container key.
        container: String,
    },

    /// No registry was injected and none is installed in the locator.
    #[error("No intid registry is available")]
    NoRegistry,

    /// Restored state violates an invariant.
    #[error("Corrupt snapshot: {reason}")]
    CorruptSnapshot {
        /// What was inconsistent.
        reason: String,
    },

    /// Snapshot file IO or codec failure.
    #[error("Storage error: {message}")]
    Storage {
        /// Underlying failure.
        message: String,
    },

    /// Internal failure (poisoned lock and similar).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl IntIdError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Returns true if this is an `IdMissing` error.
    #[must_use]
    pub const fn is_id_missing(&self) -> bool {
        matches!(self, Self::IdMissing { .. })
    }

    /// Returns true if this is an `ObjectMissing` error.
    #[must_use]
    pub const fn is_object_missing(&self) -> bool {
        matches!(self, Self::ObjectMissing { .. })
    }

    /// Returns true for either lookup miss (the errors `query_*` turn into `None`).
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        self.is_id_missing() || self.is_object_missing()
    }
}

/// Result type alias for intid operations.
pub type IntIdResult<T> = Result<T, IntIdError>;

pub(crate) fn lock_err(context: &'static str) -> IntIdError {
    IntIdError::internal(format!("poisoned lock: {context}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_missing_display() {
        let err = IntIdError::IdMissing {
            object: "Doc(a)".to_string(),
            registry: "_ds_id".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Doc(a)"));
        assert!(msg.contains("_ds_id"));
        assert!(err.is_id_missing());
        assert!(err.is_missing());
        assert!(!err.is_object_missing());
    }

    #[test]
    fn test_object_missing_display() {
        let err = IntIdError::ObjectMissing {
            id: IntId::new(42),
            registry: "_ds_id".to_string(),
        };
        assert!(err.to_string().contains("42"));
        assert!(err.is_object_missing());
        assert!(err.is_missing());
    }

    #[test]
    fn test_admin_errors_are_not_missing() {
        let in_use = IntIdError::IdInUse { id: IntId::new(5) };
        let mismatch = IntIdError::KeyMismatch {
            id: IntId::new(5),
            object: "x".to_string(),
        };
        assert!(!in_use.is_missing());
        assert!(!mismatch.is_missing());
        assert!(in_use.to_string().contains("already in use"));
    }

    #[test]
    fn test_domain_exhausted_display() {
        let err = IntIdError::DomainExhausted {
            attempts: 16,
            max_id: 8,
        };
        let msg = err.to_string();
        assert!(msg.contains("16"));
        assert!(msg.contains("max id 8"));
    }

    #[test]
    fn test_lock_err() {
        let err = lock_err("intids.register");
        assert!(matches!(err, IntIdError::Internal { .. }));
        assert!(err.to_string().contains("intids.register"));
    }
}
