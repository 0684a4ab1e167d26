//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input, undeclared option).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A domain invariant was violated (illegal state-machine transition).
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// The snapshot for an aggregate id is absent.
    #[error("aggregate {aggregate_id} not found")]
    NotFound { aggregate_id: String },

    /// Optimistic concurrency failure: the stored version does not match the
    /// version the command expected.
    #[error("version conflict on {aggregate_id}: expected {expected} but found {found}")]
    VersionConflict {
        aggregate_id: String,
        expected: u64,
        found: u64,
    },

    /// A unique resource (slug, SKU) is held by another entity.
    #[error("{resource} \"{value}\" is already in use")]
    AlreadyInUse {
        resource: &'static str,
        value: String,
    },

    /// Aggregate state failed to serialize or deserialize.
    #[error("state serialization failed: {0}")]
    Serialization(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn not_found(aggregate_id: impl Into<String>) -> Self {
        Self::NotFound {
            aggregate_id: aggregate_id.into(),
        }
    }

    pub fn version_conflict(aggregate_id: impl Into<String>, expected: u64, found: u64) -> Self {
        Self::VersionConflict {
            aggregate_id: aggregate_id.into(),
            expected,
            found,
        }
    }

    pub fn already_in_use(resource: &'static str, value: impl Into<String>) -> Self {
        Self::AlreadyInUse {
            resource,
            value: value.into(),
        }
    }

    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_conflict_message_names_both_versions() {
        let err = DomainError::version_conflict("c1", 5, 0);
        assert_eq!(
            err.to_string(),
            "version conflict on c1: expected 5 but found 0"
        );
    }

    #[test]
    fn already_in_use_message_quotes_the_value() {
        let err = DomainError::already_in_use("slug", "b");
        assert_eq!(err.to_string(), "slug \"b\" is already in use");
    }
}
