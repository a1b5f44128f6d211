use thiserror::Error;

use strata_core::{
    ConstraintViolations, EntityReference, EntityTypeName, StateError, UnitOfWorkId,
};

use crate::entity_store::EntityStoreError;
use crate::finder::EntityFinderError;

use super::instance::UnitOfWorkStatus;

#[derive(Debug, Error)]
pub enum UnitOfWorkError {
    /// The requested entity type cannot be instantiated.
    #[error("cannot construct {entity_type}: {reason}")]
    Construction {
        entity_type: EntityTypeName,
        reason: String,
    },

    #[error("no such entity: {0}")]
    EntityNotFound(EntityReference),

    #[error("entity {reference} is a {stored}, not assignable to the requested type")]
    EntityTypeMismatch {
        reference: EntityReference,
        stored: EntityTypeName,
    },

    /// Optimistic version check failed; names every conflicting entity.
    #[error("concurrent modification of {}", format_references(.conflicts))]
    ConcurrentModification { conflicts: Vec<EntityReference> },

    /// The store failed while applying the change-set.
    #[error("unit of work {id} failed to complete: {source}")]
    Completion {
        id: UnitOfWorkId,
        #[source]
        source: EntityStoreError,
    },

    #[error("unit of work {id} is closed ({status:?})")]
    Closed {
        id: UnitOfWorkId,
        status: UnitOfWorkStatus,
    },

    #[error(transparent)]
    Finder(#[from] EntityFinderError),

    #[error(transparent)]
    ConstraintViolation(#[from] ConstraintViolations),

    #[error("entity {0} has been removed in this unit of work")]
    EntityRemoved(EntityReference),

    /// A completion callback refused the change-set.
    #[error("completion vetoed: {0}")]
    Vetoed(String),

    #[error("invalid unit of work state: {0}")]
    InvalidState(String),

    /// A store failure outside of completion (e.g. while loading).
    #[error(transparent)]
    Store(EntityStoreError),
}

fn format_references(references: &[EntityReference]) -> String {
    references
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl From<EntityStoreError> for UnitOfWorkError {
    fn from(value: EntityStoreError) -> Self {
        match value {
            EntityStoreError::NotFound(reference) => UnitOfWorkError::EntityNotFound(reference),
            EntityStoreError::Concurrency { conflicts } => {
                UnitOfWorkError::ConcurrentModification { conflicts }
            }
            other => UnitOfWorkError::Store(other),
        }
    }
}

impl From<StateError> for UnitOfWorkError {
    fn from(value: StateError) -> Self {
        match value {
            StateError::Removed(reference) => UnitOfWorkError::EntityRemoved(reference),
            other => UnitOfWorkError::InvalidState(other.to_string()),
        }
    }
}
