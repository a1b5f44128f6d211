use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::RwLock;

use chrono::Utc;

use strata_core::{EntityReference, EntityState, EntityTypeName, EntityVersion, Identity, Module};

use super::r#trait::{CommittedVersion, EntityChange, EntityStates, EntityStore, EntityStoreError};
use super::record::EntityRecord;

#[derive(Debug, Clone)]
struct Slot {
    entity_type: EntityTypeName,
    version: EntityVersion,
    document: String,
}

/// In-memory entity store keeping one serialized JSON document per entity.
///
/// Intended for tests/dev. Every read deserializes a fresh copy, so states
/// handed to different units of work never share memory.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    records: RwLock<BTreeMap<Identity, Slot>>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities.
    pub fn len(&self) -> Result<usize, EntityStoreError> {
        Ok(self.records.read().map_err(|_| EntityStoreError::Poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, EntityStoreError> {
        Ok(self.len()? == 0)
    }
}

enum Staged {
    Write(Identity, Slot, CommittedVersion),
    Delete(Identity),
}

impl EntityStore for InMemoryEntityStore {
    fn entity_state_of(&self, reference: &EntityReference) -> Result<EntityState, EntityStoreError> {
        let records = self.records.read().map_err(|_| EntityStoreError::Poisoned)?;
        let slot = records
            .get(reference.identity())
            .ok_or_else(|| EntityStoreError::NotFound(reference.clone()))?;
        Ok(EntityRecord::decode(&slot.document)?.into_state())
    }

    fn version_of(&self, identity: &Identity) -> Result<Option<EntityVersion>, EntityStoreError> {
        let records = self.records.read().map_err(|_| EntityStoreError::Poisoned)?;
        Ok(records.get(identity).map(|slot| slot.version))
    }

    fn apply_changes(
        &self,
        changes: Vec<EntityChange>,
    ) -> Result<Vec<CommittedVersion>, EntityStoreError> {
        if changes.is_empty() {
            return Ok(vec![]);
        }

        // 0) One entry per identity; a second entry would bypass the version check.
        let mut seen = BTreeSet::new();
        let duplicates: Vec<EntityReference> = changes
            .iter()
            .filter(|c| !seen.insert(c.identity()))
            .map(|c| c.state.reference().clone())
            .collect();
        if !duplicates.is_empty() {
            tracing::warn!(duplicates = duplicates.len(), "change-set rejected: duplicate identities");
            return Err(EntityStoreError::DuplicateChange { duplicates });
        }

        let mut records = self.records.write().map_err(|_| EntityStoreError::Poisoned)?;

        // 1) Check every expectation before touching anything.
        let conflicts: Vec<EntityReference> = changes
            .iter()
            .filter(|c| !c.expected.matches(records.get(c.identity()).map(|s| s.version)))
            .map(|c| c.state.reference().clone())
            .collect();
        if !conflicts.is_empty() {
            tracing::warn!(conflicts = conflicts.len(), "change-set rejected by version check");
            return Err(EntityStoreError::Concurrency { conflicts });
        }

        // 2) Encode everything, so a codec failure cannot leave a partial write.
        let modified = Utc::now();
        let mut staged = Vec::with_capacity(changes.len());
        for change in &changes {
            let identity = change.identity().clone();
            if change.state.is_removed() {
                staged.push(Staged::Delete(identity));
                continue;
            }
            let current = records.get(&identity).map(|s| s.version);
            let version = current
                .unwrap_or(EntityVersion::UNVERSIONED)
                .next()
                .ok_or_else(|| EntityStoreError::VersionExhausted(change.state.reference().clone()))?;
            let document = EntityRecord::from_state(&change.state, version, modified).encode()?;
            let committed = CommittedVersion {
                reference: change.state.reference().clone(),
                version,
                last_modified: modified,
            };
            let slot = Slot {
                entity_type: change.state.entity_type().clone(),
                version,
                document,
            };
            staged.push(Staged::Write(identity, slot, committed));
        }

        // 3) Apply.
        let mut committed = Vec::with_capacity(staged.len());
        for step in staged {
            match step {
                Staged::Write(identity, slot, version) => {
                    records.insert(identity, slot);
                    committed.push(version);
                }
                Staged::Delete(identity) => {
                    records.remove(&identity);
                }
            }
        }

        tracing::debug!(
            changes = changes.len(),
            written = committed.len(),
            "change-set applied"
        );
        Ok(committed)
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> EntityStates<'a> {
        Box::new(EntityCursor {
            store: self,
            module,
            after: None,
            finished: false,
        })
    }
}

/// Walks the store in identity order, taking the read lock once per step.
struct EntityCursor<'a> {
    store: &'a InMemoryEntityStore,
    module: &'a Module,
    after: Option<Identity>,
    finished: bool,
}

impl Iterator for EntityCursor<'_> {
    type Item = Result<EntityState, EntityStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let records = match self.store.records.read() {
            Ok(records) => records,
            Err(_) => {
                self.finished = true;
                return Some(Err(EntityStoreError::Poisoned));
            }
        };

        let lower = match &self.after {
            Some(identity) => Bound::Excluded(identity),
            None => Bound::Unbounded,
        };
        let next = records
            .range::<Identity, _>((lower, Bound::Unbounded))
            .find(|(_, slot)| self.module.contains(&slot.entity_type));

        match next {
            Some((identity, slot)) => {
                let item = EntityRecord::decode(&slot.document).map(EntityRecord::into_state);
                self.after = Some(identity.clone());
                Some(item)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}
