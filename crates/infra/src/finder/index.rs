use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde_json::Value as JsonValue;

use strata_core::{
    EntityReference, EntityState, EntityVersion, Identity, IndexTerm, Module, QualifiedName,
    TermKind,
};

use super::scan::ScanEntityFinder;
use super::{EntityFinder, EntityFinderError, FindQuery};
use crate::entity_store::{
    CommittedVersion, EntityChange, EntityStates, EntityStore, EntityStoreError,
};

/// Optional query accelerator behind the finder contract.
///
/// An index may decline any query it cannot answer exactly (`Ok(None)`); the
/// finder then falls back to a store scan.
pub trait EntityIndex: Send + Sync {
    fn find(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Option<Vec<EntityReference>>, EntityFinderError>;

    fn count(&self, module: &Module, query: &FindQuery) -> Result<Option<usize>, EntityFinderError>;

    /// Insert or replace the entry for `state`.
    fn index_state(&self, state: &EntityState) -> Result<(), EntityFinderError>;

    fn unindex(&self, identity: &Identity) -> Result<(), EntityFinderError>;
}

impl<I> EntityIndex for Arc<I>
where
    I: EntityIndex + ?Sized,
{
    fn find(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Option<Vec<EntityReference>>, EntityFinderError> {
        (**self).find(module, query)
    }

    fn count(&self, module: &Module, query: &FindQuery) -> Result<Option<usize>, EntityFinderError> {
        (**self).count(module, query)
    }

    fn index_state(&self, state: &EntityState) -> Result<(), EntityFinderError> {
        (**self).index_state(state)
    }

    fn unindex(&self, identity: &Identity) -> Result<(), EntityFinderError> {
        (**self).unindex(identity)
    }
}

type Term = (QualifiedName, TermKind, String);

/// Magnitude from which integers stop having distinct `f64` forms.
const EXACT_FLOAT_LIMIT: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone)]
struct IndexEntry {
    reference: EntityReference,
    terms: Vec<Term>,
}

#[derive(Debug, Default)]
struct Postings {
    entries: BTreeMap<Identity, IndexEntry>,
    terms: HashMap<Term, BTreeSet<Identity>>,
}

impl Postings {
    fn insert(&mut self, state: &EntityState) {
        self.remove(state.identity());
        let mut terms: Vec<Term> = Vec::new();
        for (name, value) in state.properties() {
            if value.is_null() {
                continue;
            }
            terms.push((name.clone(), TermKind::Equals, term_key(value)));
            for element in value.as_array().into_iter().flatten() {
                let term = (name.clone(), TermKind::Element, term_key(element));
                if !element.is_null() && !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }
        for term in &terms {
            self.terms
                .entry(term.clone())
                .or_default()
                .insert(state.identity().clone());
        }
        self.entries.insert(
            state.identity().clone(),
            IndexEntry {
                reference: state.reference().clone(),
                terms,
            },
        );
    }

    fn remove(&mut self, identity: &Identity) {
        let Some(entry) = self.entries.remove(identity) else {
            return;
        };
        for term in entry.terms {
            if let Some(ids) = self.terms.get_mut(&term) {
                ids.remove(identity);
                if ids.is_empty() {
                    self.terms.remove(&term);
                }
            }
        }
    }
}

/// Canonical posting key of a property value. Integral numbers share a key
/// regardless of representation so `1` and `1.0` land in the same posting,
/// matching the numeric equality used by predicate evaluation. Integers keep
/// their exact digits; floats are only folded onto them while exact.
fn term_key(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => format!("s:{s}"),
        JsonValue::Bool(b) => format!("b:{b}"),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                format!("n:{i}")
            } else if let Some(u) = n.as_u64() {
                format!("n:{u}")
            } else {
                match n.as_f64() {
                    Some(f) if f.fract() == 0.0 && f.abs() < EXACT_FLOAT_LIMIT => {
                        format!("n:{}", f as i64)
                    }
                    _ => format!("f:{n}"),
                }
            }
        }
        other => format!("j:{other}"),
    }
}

/// Whether a query value hits exactly the postings predicate evaluation
/// would accept. Large numbers compare through `f64` against floats, so they
/// may equal values posted under a different key.
fn exactly_keyed(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => false,
        JsonValue::Number(n) => n.as_f64().is_some_and(|f| f.abs() < EXACT_FLOAT_LIMIT),
        _ => true,
    }
}

/// Equality index over top-level property values and the elements of
/// array-valued properties.
///
/// Serves queries whose predicate is absent or a conjunction of equalities
/// and `contains`/`contains_all` tests against non-null values, without
/// ordering. Everything else is declined.
#[derive(Debug, Default)]
pub struct InMemoryEntityIndex {
    postings: RwLock<Postings>,
}

impl InMemoryEntityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from every state in `module`, returning the number
    /// of indexed entities.
    pub fn reindex<S>(&self, store: &S, module: &Module) -> Result<usize, EntityFinderError>
    where
        S: EntityStore + ?Sized,
    {
        let mut rebuilt = Postings::default();
        for state in store.entity_states(module) {
            rebuilt.insert(&state?);
        }
        let count = rebuilt.entries.len();

        let mut postings = self.postings.write().map_err(|_| poisoned())?;
        *postings = rebuilt;
        tracing::info!(module = module.name(), entities = count, "entity index rebuilt");
        Ok(count)
    }

    pub fn len(&self) -> Result<usize, EntityFinderError> {
        Ok(self.postings.read().map_err(|_| poisoned())?.entries.len())
    }

    pub fn is_empty(&self) -> Result<bool, EntityFinderError> {
        Ok(self.len()? == 0)
    }

    fn matching(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Option<Vec<EntityReference>>, EntityFinderError> {
        if !query.order_by.is_empty() {
            return Ok(None);
        }
        let terms = match &query.predicate {
            None => Some(Vec::new()),
            Some(predicate) => predicate.index_terms(&query.variables),
        };
        let Some(terms) = terms else {
            return Ok(None);
        };
        if !terms.iter().all(|term| exactly_keyed(&term.value)) {
            return Ok(None);
        }

        let postings = self.postings.read().map_err(|_| poisoned())?;
        let keys: Vec<Term> = terms
            .iter()
            .map(|IndexTerm { property, kind, value }| (property.clone(), *kind, term_key(value)))
            .collect();
        let mut sets = Vec::with_capacity(keys.len());
        for key in &keys {
            match postings.terms.get(key) {
                Some(ids) => sets.push(ids),
                None => return Ok(Some(Vec::new())),
            }
        }
        sets.sort_by_key(|ids| ids.len());

        let registry = module.registry();
        let accept = |identity: &Identity| -> Option<EntityReference> {
            let entry = postings.entries.get(identity)?;
            let stored = entry.reference.entity_type();
            let visible = module.contains(stored) && registry.is_assignable(stored, &query.entity_type);
            visible.then(|| entry.reference.clone())
        };

        let references = match sets.split_first() {
            None => postings.entries.keys().filter_map(accept).collect(),
            Some((smallest, rest)) => smallest
                .iter()
                .filter(|id| rest.iter().all(|ids| ids.contains(*id)))
                .filter_map(accept)
                .collect(),
        };
        Ok(Some(references))
    }
}

fn poisoned() -> EntityFinderError {
    EntityFinderError::Index("index lock poisoned".to_string())
}

impl EntityIndex for InMemoryEntityIndex {
    fn find(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Option<Vec<EntityReference>>, EntityFinderError> {
        Ok(self.matching(module, query)?.map(|references| query.page(references)))
    }

    fn count(&self, module: &Module, query: &FindQuery) -> Result<Option<usize>, EntityFinderError> {
        Ok(self.matching(module, query)?.map(|references| references.len()))
    }

    fn index_state(&self, state: &EntityState) -> Result<(), EntityFinderError> {
        self.postings.write().map_err(|_| poisoned())?.insert(state);
        Ok(())
    }

    fn unindex(&self, identity: &Identity) -> Result<(), EntityFinderError> {
        self.postings.write().map_err(|_| poisoned())?.remove(identity);
        Ok(())
    }
}

/// Finder that consults an index first and scans the store when the index
/// declines.
pub struct IndexedEntityFinder<S, I> {
    scan: ScanEntityFinder<S>,
    index: I,
}

impl<S: EntityStore, I: EntityIndex> IndexedEntityFinder<S, I> {
    pub fn new(store: S, index: I) -> Self {
        Self {
            scan: ScanEntityFinder::new(store),
            index,
        }
    }
}

impl<S: EntityStore, I: EntityIndex> EntityFinder for IndexedEntityFinder<S, I> {
    fn find_entities(
        &self,
        module: &Module,
        query: &FindQuery,
    ) -> Result<Vec<EntityReference>, EntityFinderError> {
        match self.index.find(module, query)? {
            Some(references) => {
                tracing::debug!(
                    entity_type = %query.entity_type,
                    results = references.len(),
                    "query served by index"
                );
                Ok(references)
            }
            None => {
                tracing::debug!(entity_type = %query.entity_type, "index declined query; scanning store");
                self.scan.find_entities(module, query)
            }
        }
    }

    fn count_entities(&self, module: &Module, query: &FindQuery) -> Result<usize, EntityFinderError> {
        match self.index.count(module, query)? {
            Some(count) => Ok(count),
            None => self.scan.count_entities(module, query),
        }
    }
}

/// Adapter that keeps an index current after every successful change-set.
///
/// Commits through the adapter are serialized so index updates land in the
/// same order as the store applied them. Index maintenance failures are
/// logged, not returned: the change-set is already durable at that point and
/// `reindex` can repair the index.
pub struct IndexingEntityStore<S, I> {
    store: S,
    index: I,
    commit: Mutex<()>,
}

impl<S: EntityStore, I: EntityIndex> IndexingEntityStore<S, I> {
    pub fn new(store: S, index: I) -> Self {
        Self {
            store,
            index,
            commit: Mutex::new(()),
        }
    }

    pub fn index(&self) -> &I {
        &self.index
    }
}

impl<S: EntityStore, I: EntityIndex> EntityStore for IndexingEntityStore<S, I> {
    fn entity_state_of(&self, reference: &EntityReference) -> Result<EntityState, EntityStoreError> {
        self.store.entity_state_of(reference)
    }

    fn version_of(&self, identity: &Identity) -> Result<Option<EntityVersion>, EntityStoreError> {
        self.store.version_of(identity)
    }

    fn apply_changes(
        &self,
        changes: Vec<EntityChange>,
    ) -> Result<Vec<CommittedVersion>, EntityStoreError> {
        let pending: Vec<(Identity, Option<EntityState>)> = changes
            .iter()
            .map(|c| {
                let survivor = (!c.state.is_removed()).then(|| c.state.clone());
                (c.identity().clone(), survivor)
            })
            .collect();

        // Nothing is guarded but ordering, so a poisoned lock is still usable.
        let _commit = self.commit.lock().unwrap_or_else(PoisonError::into_inner);
        let committed = self.store.apply_changes(changes)?;

        for (identity, state) in pending {
            let version = committed.iter().find(|c| c.reference.identity() == &identity);
            let result = match (state, version) {
                (Some(state), Some(version)) => self
                    .index
                    .index_state(&state.into_committed(version.version, version.last_modified)),
                _ => self.index.unindex(&identity),
            };
            if let Err(err) = result {
                tracing::warn!(%identity, error = %err, "entity index update failed");
            }
        }
        Ok(committed)
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> EntityStates<'a> {
        self.store.entity_states(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::Utc;
    use serde_json::json;
    use strata_core::{EntityDescriptor, EntityTypeRegistry, OrderBy, Predicate};

    use crate::entity_store::InMemoryEntityStore;

    fn module() -> Module {
        let registry = EntityTypeRegistry::new()
            .with(EntityDescriptor::new("Car"))
            .unwrap()
            .with(EntityDescriptor::new("Person"))
            .unwrap();
        Module::new("fleet", Arc::new(registry))
    }

    fn car(identity: &str, color: JsonValue) -> EntityState {
        let mut state = EntityState::new(EntityReference::new("Car", identity), Utc::now());
        state.set_property("color", color).unwrap();
        state.set_property("doors", 4).unwrap();
        state
    }

    fn indexed_store() -> (
        IndexingEntityStore<Arc<InMemoryEntityStore>, Arc<InMemoryEntityIndex>>,
        Arc<InMemoryEntityStore>,
        Arc<InMemoryEntityIndex>,
    ) {
        let store = Arc::new(InMemoryEntityStore::new());
        let index = Arc::new(InMemoryEntityIndex::new());
        (
            IndexingEntityStore::new(store.clone(), index.clone()),
            store,
            index,
        )
    }

    #[test]
    fn indexing_store_keeps_index_current() {
        let (indexing, store, index) = indexed_store();
        let module = module();
        indexing
            .apply_changes(vec![
                EntityChange::for_state(car("a", json!("red"))),
                EntityChange::for_state(car("b", json!("blue"))),
            ])
            .unwrap();

        let red = FindQuery::new("Car").filter(Predicate::eq("color", "red"));
        assert_eq!(
            index.find(&module, &red).unwrap(),
            Some(vec![EntityReference::new("Car", "a")])
        );

        let mut a = store.entity_state_of(&EntityReference::new("Car", "a")).unwrap();
        a.set_property("color", "blue").unwrap();
        indexing.apply_changes(vec![EntityChange::for_state(a)]).unwrap();
        assert_eq!(index.count(&module, &red).unwrap(), Some(0));

        let mut b = store.entity_state_of(&EntityReference::new("Car", "b")).unwrap();
        b.remove();
        indexing.apply_changes(vec![EntityChange::for_state(b)]).unwrap();
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn index_declines_what_it_cannot_answer() {
        let index = InMemoryEntityIndex::new();
        let module = module();
        let ordered = FindQuery::new("Car").order_by(OrderBy::ascending("color"));
        let range = FindQuery::new("Car").filter(Predicate::gt("doors", 2));
        let null = FindQuery::new("Car").filter(Predicate::eq("color", JsonValue::Null));

        assert_eq!(index.find(&module, &ordered).unwrap(), None);
        assert_eq!(index.find(&module, &range).unwrap(), None);
        assert_eq!(index.find(&module, &null).unwrap(), None);
    }

    #[test]
    fn numeric_terms_ignore_representation() {
        let index = InMemoryEntityIndex::new();
        index.index_state(&car("a", json!("red"))).unwrap();
        let query = FindQuery::new("Car").filter(Predicate::eq("doors", 4.0));
        assert_eq!(index.count(&module(), &query).unwrap(), Some(1));
        let query = FindQuery::new("Car").filter(Predicate::eq("doors", "4"));
        assert_eq!(index.count(&module(), &query).unwrap(), Some(0));
    }

    #[test]
    fn indexed_finder_agrees_with_scan() {
        let (indexing, store, index) = indexed_store();
        let module = module();
        for (id, color) in [("a", "red"), ("b", "blue"), ("c", "red"), ("d", "green")] {
            indexing
                .apply_changes(vec![EntityChange::for_state(car(id, json!(color)))])
                .unwrap();
        }

        let indexed = IndexedEntityFinder::new(store.clone(), index.clone());
        let scan = ScanEntityFinder::new(store.clone());
        let queries = [
            FindQuery::new("Car").filter(Predicate::eq("color", "red")),
            FindQuery::new("Car").filter(Predicate::and([
                Predicate::eq("color", "red"),
                Predicate::eq("doors", 4),
            ])),
            FindQuery::new("Car").filter(Predicate::ne("color", "red")),
            FindQuery::new("Car").first(1).max(2),
            FindQuery::new("Person"),
        ];
        for query in &queries {
            assert_eq!(
                indexed.find_entities(&module, query).unwrap(),
                scan.find_entities(&module, query).unwrap()
            );
            assert_eq!(
                indexed.count_entities(&module, query).unwrap(),
                scan.count_entities(&module, query).unwrap()
            );
        }
    }

    fn tagged(identity: &str, tags: JsonValue) -> EntityState {
        let mut state = car(identity, json!("red"));
        state.set_property("tags", tags).unwrap();
        state
    }

    fn assert_agree(
        module: &Module,
        store: &Arc<InMemoryEntityStore>,
        index: &Arc<InMemoryEntityIndex>,
        query: &FindQuery,
    ) {
        let indexed = IndexedEntityFinder::new(store.clone(), index.clone());
        let scan = ScanEntityFinder::new(store.clone());
        assert_eq!(
            indexed.find_entities(module, query).unwrap(),
            scan.find_entities(module, query).unwrap(),
            "{query:?}"
        );
        assert_eq!(
            indexed.count_entities(module, query).unwrap(),
            scan.count_entities(module, query).unwrap(),
            "{query:?}"
        );
    }

    #[test]
    fn collection_queries_agree_with_scan() {
        let (indexing, store, index) = indexed_store();
        let module = module();
        indexing
            .apply_changes(vec![
                EntityChange::for_state(tagged("a", json!(["fast", "loud", 2]))),
                EntityChange::for_state(tagged("b", json!(["fast"]))),
                EntityChange::for_state(tagged("c", json!([]))),
                EntityChange::for_state(tagged("d", json!("fast"))),
                EntityChange::for_state(tagged("e", json!([["fast"], null, 2.0]))),
            ])
            .unwrap();

        let served = FindQuery::new("Car").filter(Predicate::contains("tags", "fast"));
        assert_eq!(
            index.find(&module, &served).unwrap(),
            Some(vec![EntityReference::new("Car", "a"), EntityReference::new("Car", "b")])
        );

        let queries = [
            served,
            FindQuery::new("Car").filter(Predicate::contains("tags", 2)),
            FindQuery::new("Car").filter(Predicate::contains("tags", json!(["fast"]))),
            FindQuery::new("Car").filter(Predicate::contains("tags", JsonValue::Null)),
            FindQuery::new("Car").filter(Predicate::contains_all("tags", ["fast", "loud"])),
            FindQuery::new("Car").filter(Predicate::contains_all("tags", Vec::<&str>::new())),
            FindQuery::new("Car").filter(Predicate::and([
                Predicate::eq("color", "red"),
                Predicate::contains("tags", "loud"),
            ])),
            FindQuery::new("Car").filter(Predicate::eq("tags", json!(["fast"]))),
            FindQuery::new("Car").filter(Predicate::eq("tags", "fast")),
        ];
        for query in &queries {
            assert_agree(&module, &store, &index, query);
        }
    }

    #[test]
    fn large_integers_agree_with_scan() {
        let (indexing, store, index) = indexed_store();
        let module = module();
        let big: i64 = (1 << 60) + 1;
        let mut exact = car("exact", json!("red"));
        exact.set_property("odometer", big).unwrap();
        let mut rounded = car("rounded", json!("red"));
        rounded.set_property("odometer", (1u64 << 60) as f64).unwrap();
        let mut edge = car("edge", json!("red"));
        edge.set_property("odometer", (1i64 << 53) + 1).unwrap();
        indexing
            .apply_changes(vec![
                EntityChange::for_state(exact),
                EntityChange::for_state(rounded),
                EntityChange::for_state(edge),
            ])
            .unwrap();

        let queries = [
            FindQuery::new("Car").filter(Predicate::eq("odometer", big)),
            FindQuery::new("Car").filter(Predicate::eq("odometer", (1u64 << 60) as f64)),
            FindQuery::new("Car").filter(Predicate::eq("odometer", (1u64 << 53) as f64)),
            FindQuery::new("Car").filter(Predicate::eq("odometer", (1i64 << 53) - 1)),
        ];
        for query in &queries {
            assert_agree(&module, &store, &index, query);
        }
        let scan = ScanEntityFinder::new(store.clone());
        assert_eq!(scan.count_entities(&module, &queries[0]).unwrap(), 2);
    }

    #[test]
    fn concurrent_commits_leave_index_matching_store() {
        let (indexing, store, index) = indexed_store();
        let indexing = Arc::new(indexing);
        let module = module();
        let reference = EntityReference::new("Car", "shared");
        indexing
            .apply_changes(vec![EntityChange::for_state(car("shared", json!("c-0")))])
            .unwrap();

        let handles: Vec<_> = (1..=8)
            .map(|writer| {
                let indexing = Arc::clone(&indexing);
                let reference = reference.clone();
                std::thread::spawn(move || {
                    for round in 0..20 {
                        loop {
                            let mut state = indexing.entity_state_of(&reference).unwrap();
                            state.set_property("color", format!("c-{writer}-{round}")).unwrap();
                            match indexing.apply_changes(vec![EntityChange::for_state(state)]) {
                                Ok(_) => break,
                                Err(EntityStoreError::Concurrency { .. }) => continue,
                                Err(err) => panic!("{err}"),
                            }
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = store.entity_state_of(&reference).unwrap();
        let color = stored.property("color").cloned().unwrap();
        let query = FindQuery::new("Car").filter(Predicate::eq("color", color));
        assert_eq!(index.find(&module, &query).unwrap(), Some(vec![reference]));
        assert_eq!(index.len().unwrap(), 1);
    }

    #[test]
    fn reindex_rebuilds_from_store() {
        let store = InMemoryEntityStore::new();
        store
            .apply_changes(vec![
                EntityChange::for_state(car("a", json!("red"))),
                EntityChange::for_state(car("b", json!("red"))),
            ])
            .unwrap();

        let index = InMemoryEntityIndex::new();
        assert!(index.is_empty().unwrap());
        assert_eq!(index.reindex(&store, &module()).unwrap(), 2);

        let query = FindQuery::new("Car").filter(Predicate::eq("color", "red"));
        assert_eq!(index.count(&module(), &query).unwrap(), Some(2));
    }
}
