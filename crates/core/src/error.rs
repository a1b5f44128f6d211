//! Core error model.

use thiserror::Error;

use crate::reference::EntityReference;

/// Result type used by the pure state/type layer.
pub type StateResult<T> = Result<T, StateError>;

/// Failure raised while building or mutating entity state.
///
/// Keep this focused on deterministic failures (bad input, illegal state
/// transitions). Storage and unit-of-work concerns have their own errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The entity was marked for removal; no further mutation is allowed.
    #[error("entity {0} has been removed")]
    Removed(EntityReference),

    /// A textual reference or identity could not be parsed.
    #[error("malformed reference: {0}")]
    MalformedReference(String),

    /// A type descriptor was registered twice.
    #[error("entity type already registered: {0}")]
    DuplicateType(String),

    /// A descriptor carries an invalid validation rule (e.g. a bad regex).
    #[error("invalid validation rule on {property}: {reason}")]
    InvalidRule { property: String, reason: String },
}

impl StateError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedReference(msg.into())
    }
}
