//! Entity finders: resolve a logical query into entity references.
//!
//! ```text
//! FindQuery (type, predicate, order, first, max, variables)
//!   ↓
//! IndexedEntityFinder ──(index declines)──▶ ScanEntityFinder
//!   ↓                                          ↓
//! EntityIndex                             EntityStore::entity_states + Specification
//! ```
//!
//! Both paths apply the same predicate semantics, so `count_entities` and
//! `find_entities` agree whichever one served the query.

pub mod index;
pub mod scan;

pub use index::{EntityIndex, IndexedEntityFinder, IndexingEntityStore, InMemoryEntityIndex};
pub use scan::ScanEntityFinder;

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use strata_core::{
    EntityReference, EntityTypeName, Module, OrderBy, Predicate, PredicateError, Variables,
};

use crate::entity_store::EntityStoreError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EntityFinderError {
    #[error("variable '{0}' is not bound")]
    UnboundVariable(String),

    #[error("invalid predicate: {0}")]
    InvalidPredicate(String),

    #[error("query for {entity_type} matched more than one entity")]
    NonUnique { entity_type: EntityTypeName },

    #[error("entity store failure during query: {0}")]
    Store(#[from] EntityStoreError),

    #[error("entity index failure: {0}")]
    Index(String),
}

impl From<PredicateError> for EntityFinderError {
    fn from(value: PredicateError) -> Self {
        match value {
            PredicateError::UnboundVariable(name) => EntityFinderError::UnboundVariable(name),
            other @ PredicateError::InvalidPattern { .. } => {
                EntityFinderError::InvalidPredicate(other.to_string())
            }
        }
    }
}

/// A logical query over one entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct FindQuery {
    pub entity_type: EntityTypeName,
    pub predicate: Option<Predicate>,
    pub order_by: Vec<OrderBy>,
    pub first: usize,
    pub max: Option<usize>,
    pub variables: Variables,
}

impl FindQuery {
    pub fn new(entity_type: impl Into<EntityTypeName>) -> Self {
        Self {
            entity_type: entity_type.into(),
            predicate: None,
            order_by: Vec::new(),
            first: 0,
            max: None,
            variables: Variables::new(),
        }
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    pub fn first(mut self, first: usize) -> Self {
        self.first = first;
        self
    }

    pub fn max(mut self, max: usize) -> Self {
        self.max = Some(max);
        self
    }

    pub fn bind(mut self, name: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    /// Apply `first`/`max` to an already filtered and ordered sequence.
    pub(crate) fn page<T>(&self, items: impl IntoIterator<Item = T>) -> Vec<T> {
        items
            .into_iter()
            .skip(self.first)
            .take(self.max.unwrap_or(usize::MAX))
            .collect()
    }

    fn unpaged(&self) -> Self {
        Self {
            first: 0,
            max: None,
            ..self.clone()
        }
    }
}

/// Query-resolution SPI.
pub trait EntityFinder: Send + Sync {
    /// References of entities assignable to the query type that satisfy the
    /// predicate, ordered and paged as requested.
    fn find_entities(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Vec<EntityReference>, EntityFinderError>;

    /// The single matching entity. Paging and ordering are ignored; more
    /// than one match is an error.
    fn find_entity(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Option<EntityReference>, EntityFinderError> {
        let probe = FindQuery {
            order_by: Vec::new(),
            ..query.unpaged()
        }
        .max(2);
        let mut found = self.find_entities(module, &probe)?;
        if found.len() > 1 {
            return Err(EntityFinderError::NonUnique {
                entity_type: query.entity_type.clone(),
            });
        }
        Ok(found.pop())
    }

    /// Number of matching entities, ignoring paging.
    fn count_entities(&self, module: &Module, query: &FindQuery) -> Result<usize, EntityFinderError> {
        Ok(self.find_entities(module, &query.unpaged())?.len())
    }
}

impl<F> EntityFinder for Arc<F>
where
    F: EntityFinder + ?Sized,
{
    fn find_entities(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Vec<EntityReference>, EntityFinderError> {
        (**self).find_entities(module, query)
    }

    fn find_entity(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Option<EntityReference>, EntityFinderError> {
        (**self).find_entity(module, query)
    }

    fn count_entities(&self, module: &Module, query: &FindQuery) -> Result<usize, EntityFinderError> {
        (**self).count_entities(module, query)
    }
}
