//! The transactional context over entity state.
//!
//! ```text
//! OPEN ──complete()──▶ COMPLETING ──▶ COMPLETED
//!   │                       └───────▶ FAILED
//!   └──discard()──▶ DISCARDED
//! ```
//!
//! A unit of work owns every state it touches. States are loaded as private
//! copies, so nothing done here is visible to other units until `complete`
//! hands the change-set to the store, which checks versions and applies it
//! atomically.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use strata_core::{
    ConstraintViolations, EntityReference, EntityState, EntityStatus, EntityTypeName, Identity,
    IdentityGenerator, Module, UnitOfWorkId,
};

use super::callback::{CompletionView, UnitOfWorkCallback};
use super::error::UnitOfWorkError;
use crate::config::PersistenceConfig;
use crate::entity_store::{CommittedVersion, EntityChange, EntityStore, EntityStoreError};
use crate::finder::{EntityFinder, FindQuery};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitOfWorkStatus {
    Open,
    Completing,
    Completed,
    Failed,
    Discarded,
}

impl UnitOfWorkStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UnitOfWorkStatus::Completed | UnitOfWorkStatus::Failed | UnitOfWorkStatus::Discarded
        )
    }
}

/// Name of the business operation a unit of work runs for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Usecase {
    name: String,
}

impl Usecase {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for Usecase {
    fn default() -> Self {
        Self::new("default")
    }
}

impl core::fmt::Display for Usecase {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

/// Collaborators a unit of work is bound to, shared with its factory.
pub(crate) struct Binding<S> {
    pub(crate) store: Arc<S>,
    pub(crate) module: Module,
    pub(crate) identities: Arc<dyn IdentityGenerator>,
    pub(crate) finder: Arc<dyn EntityFinder>,
    pub(crate) config: PersistenceConfig,
}

impl<S> Clone for Binding<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            module: self.module.clone(),
            identities: Arc::clone(&self.identities),
            finder: Arc::clone(&self.finder),
            config: self.config.clone(),
        }
    }
}

/// One transaction over entity state. Created by `UnitOfWorkFactory`.
pub struct UnitOfWork<S> {
    id: UnitOfWorkId,
    usecase: Usecase,
    current_time: DateTime<Utc>,
    status: UnitOfWorkStatus,
    paused: bool,
    binding: Binding<S>,
    states: BTreeMap<Identity, EntityState>,
    callbacks: Vec<Arc<dyn UnitOfWorkCallback>>,
}

impl<S> core::fmt::Debug for UnitOfWork<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("usecase", &self.usecase)
            .field("status", &self.status)
            .field("paused", &self.paused)
            .field("tracked", &self.states.len())
            .finish_non_exhaustive()
    }
}

impl<S: EntityStore> UnitOfWork<S> {
    pub(crate) fn open(binding: Binding<S>, usecase: Usecase) -> Self {
        let unit = Self {
            id: UnitOfWorkId::new(),
            usecase,
            current_time: Utc::now(),
            status: UnitOfWorkStatus::Open,
            paused: false,
            binding,
            states: BTreeMap::new(),
            callbacks: Vec::new(),
        };
        tracing::debug!(uow = %unit.id, usecase = %unit.usecase, "unit of work opened");
        unit
    }

    pub fn id(&self) -> UnitOfWorkId {
        self.id
    }

    pub fn usecase(&self) -> &Usecase {
        &self.usecase
    }

    /// Time the unit was opened; used as the creation time of new entities.
    pub fn current_time(&self) -> DateTime<Utc> {
        self.current_time
    }

    pub fn status(&self) -> UnitOfWorkStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == UnitOfWorkStatus::Open
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn module(&self) -> &Module {
        &self.binding.module
    }

    pub fn add_callback(&mut self, callback: Arc<dyn UnitOfWorkCallback>) {
        self.callbacks.push(callback);
    }

    /// Unregister a callback added with `add_callback`, matched by identity.
    /// Returns whether it was registered.
    pub fn remove_callback(&mut self, callback: &Arc<dyn UnitOfWorkCallback>) -> bool {
        let before = self.callbacks.len();
        self.callbacks.retain(|registered| !Arc::ptr_eq(registered, callback));
        self.callbacks.len() != before
    }

    /// Every state currently tracked, including ones left behind by a
    /// failed completion.
    pub fn tracked_states(&self) -> impl Iterator<Item = &EntityState> {
        self.states.values()
    }

    /// The tracked state for `identity`, without loading.
    pub fn tracked(&self, identity: &Identity) -> Option<&EntityState> {
        self.states.get(identity)
    }

    // ---- entity life-cycle ----

    /// Create a `NEW` entity of a registered type. Declared defaults are
    /// applied; the identity is generated when not supplied.
    pub fn new_entity(
        &mut self,
        entity_type: impl Into<EntityTypeName>,
        identity: Option<Identity>,
    ) -> Result<&mut EntityState, UnitOfWorkError> {
        self.ensure_active()?;
        let entity_type = entity_type.into();
        let construction = |reason: String| UnitOfWorkError::Construction {
            entity_type: entity_type.clone(),
            reason,
        };

        let descriptor = self
            .binding
            .module
            .registry()
            .descriptor(&entity_type)
            .cloned()
            .ok_or_else(|| construction("type is not registered as an entity".to_string()))?;

        let identity = match identity {
            Some(identity) => identity,
            None => self.binding.identities.generate(&entity_type),
        };
        if identity.as_str().trim().is_empty() {
            return Err(construction("identity must not be empty".to_string()));
        }
        if self.states.contains_key(&identity) {
            return Err(construction(format!(
                "identity '{identity}' is already tracked by this unit of work"
            )));
        }

        let reference = EntityReference::new(entity_type.clone(), identity.clone());
        let mut state = EntityState::new(reference, self.current_time);
        descriptor
            .apply_defaults(&mut state)
            .map_err(|e| construction(e.to_string()))?;

        tracing::debug!(uow = %self.id, entity = %state.reference(), "entity created");
        Ok(self.states.entry(identity).or_insert(state))
    }

    /// The state for `reference`, loading it (cache first, then store) on
    /// first access.
    pub fn get(&mut self, reference: &EntityReference) -> Result<&mut EntityState, UnitOfWorkError> {
        self.ensure_active()?;

        if let Some(state) = self.states.get(reference.identity()) {
            if state.is_removed() {
                return Err(UnitOfWorkError::EntityNotFound(reference.clone()));
            }
            self.check_type(state, reference)?;
        } else {
            let state = self.binding.store.entity_state_of(reference)?;
            self.check_type(&state, reference)?;
            tracing::debug!(
                uow = %self.id,
                entity = %state.reference(),
                version = %state.version(),
                "entity loaded"
            );
            self.states.insert(reference.identity().clone(), state);
        }

        self.states
            .get_mut(reference.identity())
            .ok_or_else(|| UnitOfWorkError::EntityNotFound(reference.clone()))
    }

    /// Mark an entity for removal. A `NEW` entity is simply detached, since
    /// there is nothing to delete in the store.
    pub fn remove(&mut self, reference: &EntityReference) -> Result<(), UnitOfWorkError> {
        let state = self.get(reference)?;
        if state.status() == EntityStatus::New {
            self.states.remove(reference.identity());
            tracing::debug!(uow = %self.id, entity = %reference, "new entity detached");
        } else {
            state.remove();
            tracing::debug!(uow = %self.id, entity = %reference, "entity marked for removal");
        }
        Ok(())
    }

    // ---- queries ----

    /// Query the store. Entities created in this unit are not visible until
    /// it completes.
    pub fn find_entities(&self, query: &FindQuery) -> Result<Vec<EntityReference>, UnitOfWorkError> {
        self.ensure_active()?;
        Ok(self.binding.finder.find_entities(&self.binding.module, query)?)
    }

    pub fn find_entity(&self, query: &FindQuery) -> Result<Option<EntityReference>, UnitOfWorkError> {
        self.ensure_active()?;
        Ok(self.binding.finder.find_entity(&self.binding.module, query)?)
    }

    pub fn count_entities(&self, query: &FindQuery) -> Result<usize, UnitOfWorkError> {
        self.ensure_active()?;
        Ok(self.binding.finder.count_entities(&self.binding.module, query)?)
    }

    // ---- completion ----

    /// Validate, run callbacks and atomically apply the change-set.
    ///
    /// Validation failures and vetoes leave the unit `Open`. Conflicts and
    /// store failures leave it `Failed`, with tracked states untouched.
    pub fn complete(&mut self) -> Result<Vec<CommittedVersion>, UnitOfWorkError> {
        self.ensure_active()?;
        self.validate()?;

        let view = CompletionView {
            id: self.id,
            usecase: &self.usecase,
            changes: self.states.values().filter(|s| s.has_changes()).collect(),
        };
        for callback in &self.callbacks {
            if let Err(reason) = callback.before_completion(&view) {
                tracing::info!(uow = %self.id, %reason, "completion vetoed");
                return Err(UnitOfWorkError::Vetoed(reason));
            }
        }
        let changes: Vec<EntityChange> = view
            .changes
            .into_iter()
            .map(|state| EntityChange::for_state(state.clone()))
            .collect();

        self.status = UnitOfWorkStatus::Completing;
        let change_count = changes.len();
        let result = if changes.is_empty() {
            Ok(Vec::new())
        } else {
            self.binding.store.apply_changes(changes)
        };

        match result {
            Ok(committed) => {
                self.status = UnitOfWorkStatus::Completed;
                self.states.clear();
                tracing::info!(uow = %self.id, changes = change_count, "unit of work completed");
                self.notify(UnitOfWorkStatus::Completed);
                Ok(committed)
            }
            Err(EntityStoreError::Concurrency { conflicts }) => {
                self.status = UnitOfWorkStatus::Failed;
                tracing::warn!(
                    uow = %self.id,
                    conflicts = conflicts.len(),
                    "unit of work failed on concurrent modification"
                );
                Err(UnitOfWorkError::ConcurrentModification { conflicts })
            }
            Err(source) => {
                self.status = UnitOfWorkStatus::Failed;
                tracing::warn!(uow = %self.id, error = %source, "unit of work failed to complete");
                Err(UnitOfWorkError::Completion {
                    id: self.id,
                    source,
                })
            }
        }
    }

    /// Drop all tracked state without touching the store.
    ///
    /// Succeeds on `Open` and `Failed` units; a unit that already completed
    /// or was discarded reports `Closed`.
    pub fn discard(&mut self) -> Result<(), UnitOfWorkError> {
        match self.status {
            UnitOfWorkStatus::Completed | UnitOfWorkStatus::Discarded => Err(self.closed()),
            UnitOfWorkStatus::Open | UnitOfWorkStatus::Completing | UnitOfWorkStatus::Failed => {
                self.status = UnitOfWorkStatus::Discarded;
                self.paused = false;
                self.states.clear();
                tracing::debug!(uow = %self.id, "unit of work discarded");
                self.notify(UnitOfWorkStatus::Discarded);
                Ok(())
            }
        }
    }

    // ---- pause / resume ----

    /// Detach from the caller's current context. With `prune_on_pause`,
    /// unmodified `LOADED` states are dropped and reloaded on next access.
    pub fn pause(&mut self) -> Result<(), UnitOfWorkError> {
        self.ensure_open()?;
        if self.paused {
            return Err(UnitOfWorkError::InvalidState(format!(
                "unit of work {} is already paused",
                self.id
            )));
        }
        self.paused = true;
        if self.binding.config.prune_on_pause {
            let before = self.states.len();
            self.states.retain(|_, state| state.has_changes());
            tracing::debug!(uow = %self.id, pruned = before - self.states.len(), "unit of work paused");
        } else {
            tracing::debug!(uow = %self.id, "unit of work paused");
        }
        Ok(())
    }

    pub fn resume(&mut self) -> Result<(), UnitOfWorkError> {
        self.ensure_open()?;
        if !self.paused {
            return Err(UnitOfWorkError::InvalidState(format!(
                "unit of work {} is not paused",
                self.id
            )));
        }
        self.paused = false;
        tracing::debug!(uow = %self.id, "unit of work resumed");
        Ok(())
    }

    // ---- internals ----

    fn closed(&self) -> UnitOfWorkError {
        UnitOfWorkError::Closed {
            id: self.id,
            status: self.status,
        }
    }

    fn ensure_open(&self) -> Result<(), UnitOfWorkError> {
        if self.status != UnitOfWorkStatus::Open {
            return Err(self.closed());
        }
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), UnitOfWorkError> {
        self.ensure_open()?;
        if self.paused {
            return Err(UnitOfWorkError::InvalidState(format!(
                "unit of work {} is paused",
                self.id
            )));
        }
        Ok(())
    }

    fn check_type(&self, state: &EntityState, reference: &EntityReference) -> Result<(), UnitOfWorkError> {
        if state.is_assignable_to(self.binding.module.registry(), reference.entity_type()) {
            return Ok(());
        }
        Err(UnitOfWorkError::EntityTypeMismatch {
            reference: reference.clone(),
            stored: state.entity_type().clone(),
        })
    }

    fn validate(&self) -> Result<(), UnitOfWorkError> {
        let registry = self.binding.module.registry();
        let mut violations = Vec::new();
        for state in self.states.values().filter(|s| s.has_changes() && !s.is_removed()) {
            let Some(descriptor) = registry.descriptor(state.entity_type()) else {
                continue;
            };
            if let Err(found) = descriptor.validate(state) {
                violations.extend(found.0);
            }
        }
        if violations.is_empty() {
            return Ok(());
        }
        tracing::info!(uow = %self.id, violations = violations.len(), "change-set failed validation");
        Err(ConstraintViolations(violations).into())
    }

    fn notify(&self, status: UnitOfWorkStatus) {
        for callback in &self.callbacks {
            callback.after_completion(self.id, status);
        }
    }
}
