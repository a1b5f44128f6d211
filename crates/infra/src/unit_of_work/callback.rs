//! Hooks around unit-of-work completion.

use strata_core::{EntityState, UnitOfWorkId};

use super::instance::{UnitOfWorkStatus, Usecase};

/// What a `before_completion` hook gets to inspect.
#[derive(Debug)]
pub struct CompletionView<'a> {
    pub id: UnitOfWorkId,
    pub usecase: &'a Usecase,
    /// States that will be handed to the store (`NEW`, `UPDATED`, `REMOVED`).
    pub changes: Vec<&'a EntityState>,
}

/// Observer of a unit of work's end of life.
pub trait UnitOfWorkCallback: Send + Sync {
    /// Called before the change-set is applied. An `Err` vetoes completion
    /// and leaves the unit open.
    fn before_completion(&self, view: &CompletionView<'_>) -> Result<(), String> {
        let _ = view;
        Ok(())
    }

    /// Called once the unit reached `Completed` or `Discarded`.
    fn after_completion(&self, id: UnitOfWorkId, status: UnitOfWorkStatus) {
        let _ = (id, status);
    }
}
