//! Caller-owned stack of units of work.
//!
//! Units are always passed explicitly; this helper only adds "current unit"
//! ergonomics for code that nests work, e.g. pausing an outer unit while an
//! inner one runs to completion.

use super::error::UnitOfWorkError;
use super::instance::UnitOfWork;
use crate::entity_store::EntityStore;

#[derive(Debug)]
pub struct UnitOfWorkContext<S> {
    stack: Vec<UnitOfWork<S>>,
}

impl<S> Default for UnitOfWorkContext<S> {
    fn default() -> Self {
        Self { stack: Vec::new() }
    }
}

impl<S: EntityStore> UnitOfWorkContext<S> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `unit` the current unit of work.
    pub fn push(&mut self, unit: UnitOfWork<S>) {
        self.stack.push(unit);
    }

    /// Remove and return the current unit, leaving its state as is.
    pub fn pop(&mut self) -> Option<UnitOfWork<S>> {
        self.stack.pop()
    }

    pub fn current(&self) -> Option<&UnitOfWork<S>> {
        self.stack.last()
    }

    pub fn current_mut(&mut self) -> Option<&mut UnitOfWork<S>> {
        self.stack.last_mut()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Pause the current unit and detach it from the stack. The unit below
    /// (if any) becomes current.
    pub fn pause_current(&mut self) -> Result<Option<UnitOfWork<S>>, UnitOfWorkError> {
        let Some(unit) = self.stack.last_mut() else {
            return Ok(None);
        };
        unit.pause()?;
        Ok(self.stack.pop())
    }

    /// Resume a paused unit and make it current again.
    pub fn resume(&mut self, mut unit: UnitOfWork<S>) -> Result<(), UnitOfWorkError> {
        unit.resume()?;
        self.stack.push(unit);
        Ok(())
    }
}
