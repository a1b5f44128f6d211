use strata_core::{compare_states, EntityReference, EntityState, Module, Specification};

use super::{EntityFinder, EntityFinderError, FindQuery};
use crate::entity_store::EntityStore;

/// Finder that walks `EntityStore::entity_states` and evaluates the
/// predicate entity by entity. Always available; no index required.
#[derive(Debug, Clone)]
pub struct ScanEntityFinder<S> {
    store: S,
}

impl<S: EntityStore> ScanEntityFinder<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Matching states in store iteration order.
    ///
    /// Without ordering the scan stops as soon as the requested page is full.
    fn matching_states(
        &self,
        module: &Module,
        query: &FindQuery,
        ordered: bool,
    ) -> Result<Vec<EntityState>, EntityFinderError> {
        let specification = query
            .predicate
            .as_ref()
            .map(|p| p.to_specification(&query.variables))
            .transpose()?;
        let registry = module.registry();
        let limit = match (ordered, query.max) {
            (false, Some(max)) => query.first.saturating_add(max),
            _ => usize::MAX,
        };

        let mut matches = Vec::new();
        for state in self.store.entity_states(module) {
            if matches.len() >= limit {
                break;
            }
            let state = state?;
            if !state.is_assignable_to(registry, &query.entity_type) {
                continue;
            }
            if specification.as_ref().is_none_or(|s| s.satisfied_by(&state)) {
                matches.push(state);
            }
        }
        Ok(matches)
    }
}

impl<S: EntityStore> EntityFinder for ScanEntityFinder<S> {
    fn find_entities(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Vec<EntityReference>, EntityFinderError> {
        let ordered = !query.order_by.is_empty();
        let mut states = self.matching_states(module, query, ordered)?;
        if ordered {
            // Stable: ties keep store iteration order.
            states.sort_by(|a, b| compare_states(a, b, &query.order_by));
        }
        let references = query.page(states.into_iter().map(|s| s.reference().clone()));
        tracing::debug!(
            entity_type = %query.entity_type,
            results = references.len(),
            "query served by store scan"
        );
        Ok(references)
    }

    fn count_entities(&self, module: &Module, query: &FindQuery) -> Result<usize, EntityFinderError> {
        let unpaged = FindQuery {
            first: 0,
            max: None,
            ..query.clone()
        };
        Ok(self.matching_states(module, &unpaged, false)?.len())
    }
}
