use chrono::{DateTime, Utc};
use thiserror::Error;

use strata_core::{
    EntityReference, EntityState, EntityVersion, ExpectedVersion, Identity, Module,
};
use std::sync::Arc;

/// One entry of a change-set handed to `EntityStore::apply_changes`.
///
/// `expected` is the version the unit of work observed when it loaded the
/// entity. The store compares it against the durable version before writing.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityChange {
    pub state: EntityState,
    pub expected: ExpectedVersion,
}

impl EntityChange {
    /// Derive the expectation from the state: never-persisted states expect
    /// the identity to be absent, everything else expects the loaded version.
    pub fn for_state(state: EntityState) -> Self {
        let expected = if state.is_transient() {
            ExpectedVersion::Absent
        } else {
            ExpectedVersion::Exact(state.version())
        };
        Self { state, expected }
    }

    pub fn with_expected(state: EntityState, expected: ExpectedVersion) -> Self {
        Self { state, expected }
    }

    pub fn identity(&self) -> &Identity {
        self.state.identity()
    }
}

/// Version assigned by the store to an entity that survived a change-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedVersion {
    pub reference: EntityReference,
    pub version: EntityVersion,
    pub last_modified: DateTime<Utc>,
}

/// Entity store operation error.
///
/// These are **infrastructure errors** (missing records, version conflicts,
/// codec and IO failures). Unit-of-work code maps them into its own taxonomy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntityStoreError {
    #[error("entity not found: {0}")]
    NotFound(EntityReference),

    #[error("optimistic concurrency check failed for {}", format_references(.conflicts))]
    Concurrency { conflicts: Vec<EntityReference> },

    #[error("entity record codec failure: {0}")]
    Codec(String),

    #[error("entity store io failure: {0}")]
    Io(String),

    #[error("change-set lists {} more than once", format_references(.duplicates))]
    DuplicateChange { duplicates: Vec<EntityReference> },

    #[error("version counter exhausted for {0}")]
    VersionExhausted(EntityReference),

    #[error("entity store lock poisoned")]
    Poisoned,
}

fn format_references(references: &[EntityReference]) -> String {
    references
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Lazy sequence of stored states produced by `EntityStore::entity_states`.
pub type EntityStates<'a> = Box<dyn Iterator<Item = Result<EntityState, EntityStoreError>> + 'a>;

/// Persistence boundary for entity state.
///
/// The store is the only component that talks to durable storage, and the
/// one place where optimistic concurrency is enforced.
///
/// ## Implementation Requirements
///
/// - `entity_state_of` returns a fresh, unshared `LOADED` state whose version
///   and timestamp reflect the durable record at read time.
/// - `apply_changes` is all-or-nothing: if any expectation fails, nothing in
///   the change-set is written and every conflicting reference is reported.
/// - `entity_states` is lazy and restartable per call; it must not load the
///   whole store into memory at once.
pub trait EntityStore: Send + Sync {
    /// Load the current durable state of one entity.
    fn entity_state_of(&self, reference: &EntityReference) -> Result<EntityState, EntityStoreError>;

    /// Current durable version, or `None` when no record exists.
    fn version_of(&self, identity: &Identity) -> Result<Option<EntityVersion>, EntityStoreError>;

    /// Atomically apply a change-set, returning the new version of every
    /// surviving (non-removed) entity.
    fn apply_changes(
        &self,
        changes: Vec<EntityChange>,
    ) -> Result<Vec<CommittedVersion>, EntityStoreError>;

    /// Iterate every stored entity whose type belongs to `module`.
    fn entity_states<'a>(&'a self, module: &'a Module) -> EntityStates<'a>;
}

impl<S> EntityStore for Arc<S>
where
    S: EntityStore + ?Sized,
{
    fn entity_state_of(&self, reference: &EntityReference) -> Result<EntityState, EntityStoreError> {
        (**self).entity_state_of(reference)
    }

    fn version_of(&self, identity: &Identity) -> Result<Option<EntityVersion>, EntityStoreError> {
        (**self).version_of(identity)
    }

    fn apply_changes(
        &self,
        changes: Vec<EntityChange>,
    ) -> Result<Vec<CommittedVersion>, EntityStoreError> {
        (**self).apply_changes(changes)
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> EntityStates<'a> {
        (**self).entity_states(module)
    }
}
