//! Versioned, mutable snapshot of one entity as seen by a single unit of work.
//!
//! An `EntityState` is plain owned data. Each unit of work holds its own copy
//! (freshly deserialized by the store, or cloned from a cache), so mutations
//! are invisible elsewhere until the change-set is applied.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{StateError, StateResult};
use crate::id::{EntityTypeName, Identity, QualifiedName};
use crate::reference::EntityReference;
use crate::registry::EntityTypeRegistry;
use crate::version::EntityVersion;

/// Life-cycle status of an entity state inside one unit of work.
///
/// ```text
/// NEW ──(mutate)──▶ NEW
/// LOADED ──(mutate)──▶ UPDATED ──(mutate)──▶ UPDATED
/// any ──(remove)──▶ REMOVED   (terminal, further mutation is rejected)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityStatus {
    New,
    Loaded,
    Updated,
    Removed,
}

impl EntityStatus {
    /// Whether a state with this status belongs in a change-set.
    pub fn is_change(self) -> bool {
        !matches!(self, EntityStatus::Loaded)
    }
}

/// Properties and associations of an entity, independent of life-cycle data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityStateData {
    #[serde(default)]
    pub properties: BTreeMap<QualifiedName, JsonValue>,
    #[serde(default)]
    pub associations: BTreeMap<QualifiedName, Option<EntityReference>>,
    #[serde(default)]
    pub many_associations: BTreeMap<QualifiedName, Vec<EntityReference>>,
    #[serde(default)]
    pub named_associations: BTreeMap<QualifiedName, BTreeMap<String, EntityReference>>,
}

/// One entity's state as tracked by a unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    reference: EntityReference,
    version: EntityVersion,
    last_modified: DateTime<Utc>,
    status: EntityStatus,
    /// Never persisted. Cleared once a store has committed the state.
    transient: bool,
    data: EntityStateData,
}

impl EntityState {
    /// A state that has not been persisted yet (`NEW`).
    pub fn new(reference: EntityReference, created_at: DateTime<Utc>) -> Self {
        Self {
            reference,
            version: EntityVersion::UNVERSIONED,
            last_modified: created_at,
            status: EntityStatus::New,
            transient: true,
            data: EntityStateData::default(),
        }
    }

    /// A state read from durable storage (`LOADED`).
    pub fn loaded(
        reference: EntityReference,
        version: EntityVersion,
        last_modified: DateTime<Utc>,
        data: EntityStateData,
    ) -> Self {
        Self {
            reference,
            version,
            last_modified,
            status: EntityStatus::Loaded,
            transient: false,
            data,
        }
    }

    pub fn reference(&self) -> &EntityReference {
        &self.reference
    }

    pub fn identity(&self) -> &Identity {
        self.reference.identity()
    }

    /// Concrete type of the stored entity.
    pub fn entity_type(&self) -> &EntityTypeName {
        self.reference.entity_type()
    }

    pub fn version(&self) -> EntityVersion {
        self.version
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        self.last_modified
    }

    pub fn status(&self) -> EntityStatus {
        self.status
    }

    pub fn data(&self) -> &EntityStateData {
        &self.data
    }

    pub fn into_data(self) -> EntityStateData {
        self.data
    }

    /// Whether the state belongs in a change-set. A state created and
    /// removed before ever being persisted has nothing to write.
    pub fn has_changes(&self) -> bool {
        self.status.is_change() && !(self.transient && self.is_removed())
    }

    /// Whether the state has never been committed by a store.
    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn is_removed(&self) -> bool {
        self.status == EntityStatus::Removed
    }

    /// Whether this state may be viewed as `requested` under `registry`.
    pub fn is_assignable_to(&self, registry: &EntityTypeRegistry, requested: &EntityTypeName) -> bool {
        registry.is_assignable(self.entity_type(), requested)
    }

    /// Re-base this state on a freshly committed version (`LOADED`).
    pub fn into_committed(mut self, version: EntityVersion, last_modified: DateTime<Utc>) -> Self {
        self.version = version;
        self.last_modified = last_modified;
        self.status = EntityStatus::Loaded;
        self.transient = false;
        self
    }

    // ---- properties ----

    pub fn property(&self, name: &str) -> Option<&JsonValue> {
        self.data.properties.get(name)
    }

    pub fn properties(&self) -> &BTreeMap<QualifiedName, JsonValue> {
        &self.data.properties
    }

    pub fn set_property(
        &mut self,
        name: impl Into<QualifiedName>,
        value: impl Into<JsonValue>,
    ) -> StateResult<()> {
        self.touch()?;
        self.data.properties.insert(name.into(), value.into());
        Ok(())
    }

    // ---- single associations ----

    pub fn association(&self, name: &str) -> Option<&EntityReference> {
        self.data.associations.get(name).and_then(Option::as_ref)
    }

    pub fn associations(&self) -> &BTreeMap<QualifiedName, Option<EntityReference>> {
        &self.data.associations
    }

    pub fn set_association(
        &mut self,
        name: impl Into<QualifiedName>,
        reference: Option<EntityReference>,
    ) -> StateResult<()> {
        self.touch()?;
        self.data.associations.insert(name.into(), reference);
        Ok(())
    }

    // ---- many associations ----

    pub fn many_association(&self, name: &str) -> &[EntityReference] {
        self.data
            .many_associations
            .get(name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn many_associations(&self) -> &BTreeMap<QualifiedName, Vec<EntityReference>> {
        &self.data.many_associations
    }

    /// Append (or insert at `index`) a reference. Duplicates are ignored and
    /// reported as `false`.
    pub fn add_many_association(
        &mut self,
        name: impl Into<QualifiedName>,
        reference: EntityReference,
        index: Option<usize>,
    ) -> StateResult<bool> {
        self.ensure_not_removed()?;
        let name = name.into();
        if self.many_association(name.as_str()).contains(&reference) {
            return Ok(false);
        }
        self.touch()?;
        let list = self.data.many_associations.entry(name).or_default();
        match index {
            Some(i) if i < list.len() => list.insert(i, reference),
            _ => list.push(reference),
        }
        Ok(true)
    }

    pub fn remove_many_association(
        &mut self,
        name: &str,
        reference: &EntityReference,
    ) -> StateResult<bool> {
        self.ensure_not_removed()?;
        let Some(list) = self.data.many_associations.get(name) else {
            return Ok(false);
        };
        let Some(pos) = list.iter().position(|r| r == reference) else {
            return Ok(false);
        };
        self.touch()?;
        if let Some(list) = self.data.many_associations.get_mut(name) {
            list.remove(pos);
        }
        Ok(true)
    }

    // ---- named associations ----

    pub fn named_association(&self, name: &str) -> Option<&BTreeMap<String, EntityReference>> {
        self.data.named_associations.get(name)
    }

    pub fn named_associations(
        &self,
    ) -> &BTreeMap<QualifiedName, BTreeMap<String, EntityReference>> {
        &self.data.named_associations
    }

    /// Bind `key` to `reference`, returning the previous binding.
    pub fn put_named_association(
        &mut self,
        name: impl Into<QualifiedName>,
        key: impl Into<String>,
        reference: EntityReference,
    ) -> StateResult<Option<EntityReference>> {
        self.touch()?;
        Ok(self
            .data
            .named_associations
            .entry(name.into())
            .or_default()
            .insert(key.into(), reference))
    }

    pub fn remove_named_association(
        &mut self,
        name: &str,
        key: &str,
    ) -> StateResult<Option<EntityReference>> {
        self.ensure_not_removed()?;
        let present = self
            .data
            .named_associations
            .get(name)
            .is_some_and(|m| m.contains_key(key));
        if !present {
            return Ok(None);
        }
        self.touch()?;
        Ok(self
            .data
            .named_associations
            .get_mut(name)
            .and_then(|m| m.remove(key)))
    }

    // ---- life-cycle ----

    /// Mark for deletion. Any status becomes `REMOVED`; a transient state
    /// then drops out of the change-set.
    pub fn remove(&mut self) {
        self.status = EntityStatus::Removed;
    }

    fn ensure_not_removed(&self) -> StateResult<()> {
        if self.is_removed() {
            return Err(StateError::Removed(self.reference.clone()));
        }
        Ok(())
    }

    /// Apply the status transition for a write.
    fn touch(&mut self) -> StateResult<()> {
        match self.status {
            EntityStatus::Removed => Err(StateError::Removed(self.reference.clone())),
            EntityStatus::Loaded => {
                self.status = EntityStatus::Updated;
                Ok(())
            }
            EntityStatus::New | EntityStatus::Updated => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn loaded_car() -> EntityState {
        let mut data = EntityStateData::default();
        data.properties.insert("color".into(), json!("red"));
        EntityState::loaded(
            EntityReference::new("Car", "Ferrari"),
            EntityVersion::new(1),
            Utc::now(),
            data,
        )
    }

    #[test]
    fn new_state_stays_new_on_mutation() {
        let mut state = EntityState::new(EntityReference::new("Car", "Ferrari"), Utc::now());
        state.set_property("color", "red").unwrap();
        assert_eq!(state.status(), EntityStatus::New);
        assert_eq!(state.version(), EntityVersion::UNVERSIONED);
        assert_eq!(state.property("color"), Some(&json!("red")));
    }

    #[test]
    fn loaded_state_becomes_updated_on_write() {
        let mut state = loaded_car();
        assert!(!state.has_changes());
        state.set_property("color", "blue").unwrap();
        assert_eq!(state.status(), EntityStatus::Updated);
        assert!(state.has_changes());
    }

    #[test]
    fn removed_state_rejects_mutation() {
        let mut state = loaded_car();
        state.remove();
        assert_eq!(state.status(), EntityStatus::Removed);

        let err = state.set_property("color", "green").unwrap_err();
        assert_eq!(err, StateError::Removed(EntityReference::new("Car", "Ferrari")));
        assert!(state.set_association("owner", None).is_err());
        assert!(state
            .add_many_association("drivers", EntityReference::new("Person", "p1"), None)
            .is_err());
    }

    #[test]
    fn removing_a_new_state_leaves_nothing_to_write() {
        let mut state = EntityState::new(EntityReference::new("Car", "c-new"), Utc::now());
        state.set_property("color", "red").unwrap();
        assert!(state.has_changes());

        state.remove();
        assert!(state.is_removed());
        assert!(state.is_transient());
        assert!(!state.has_changes());

        let mut persisted = loaded_car();
        persisted.remove();
        assert!(!persisted.is_transient());
        assert!(persisted.has_changes());
    }

    #[test]
    fn many_association_ignores_duplicates_and_keeps_order() {
        let mut state = loaded_car();
        let a = EntityReference::new("Person", "a");
        let b = EntityReference::new("Person", "b");
        let c = EntityReference::new("Person", "c");

        assert!(state.add_many_association("drivers", a.clone(), None).unwrap());
        assert!(state.add_many_association("drivers", c.clone(), None).unwrap());
        assert!(state.add_many_association("drivers", b.clone(), Some(1)).unwrap());
        assert!(!state.add_many_association("drivers", a.clone(), None).unwrap());

        assert_eq!(state.many_association("drivers"), &[a.clone(), b.clone(), c]);
        assert!(state.remove_many_association("drivers", &b).unwrap());
        assert!(!state.remove_many_association("drivers", &b).unwrap());
        assert_eq!(state.status(), EntityStatus::Updated);
    }

    #[test]
    fn noop_removals_do_not_mark_updated() {
        let mut state = loaded_car();
        let a = EntityReference::new("Person", "a");
        assert!(!state.remove_many_association("drivers", &a).unwrap());
        assert_eq!(state.remove_named_association("keys", "spare").unwrap(), None);
        assert_eq!(state.status(), EntityStatus::Loaded);
    }

    #[test]
    fn named_association_put_returns_previous() {
        let mut state = loaded_car();
        let a = EntityReference::new("Person", "a");
        let b = EntityReference::new("Person", "b");

        assert_eq!(state.put_named_association("keys", "main", a.clone()).unwrap(), None);
        assert_eq!(
            state.put_named_association("keys", "main", b.clone()).unwrap(),
            Some(a)
        );
        assert_eq!(state.named_association("keys").unwrap().get("main"), Some(&b));
        assert_eq!(state.remove_named_association("keys", "main").unwrap(), Some(b));
    }

    #[test]
    fn optional_association_can_be_cleared() {
        let mut state = loaded_car();
        let owner = EntityReference::new("Person", "owner");
        state.set_association("owner", Some(owner.clone())).unwrap();
        assert_eq!(state.association("owner"), Some(&owner));
        state.set_association("owner", None).unwrap();
        assert_eq!(state.association("owner"), None);
        assert!(state.associations().contains_key("owner"));
    }

    #[test]
    fn into_committed_resets_status() {
        let mut state = EntityState::new(EntityReference::new("Car", "Ferrari"), Utc::now());
        state.set_property("color", "red").unwrap();
        let committed = state.into_committed(EntityVersion::new(1), Utc::now());
        assert_eq!(committed.status(), EntityStatus::Loaded);
        assert_eq!(committed.version(), EntityVersion::new(1));
    }
}
