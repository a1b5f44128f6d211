//! JSON document format of persisted entities.
//!
//! ```json
//! {
//!   "identity": "Ferrari",
//!   "type": "Car",
//!   "version": 3,
//!   "modified": "2024-05-01T10:00:00Z",
//!   "properties": { "color": "red" },
//!   "associations": { "owner": { "entity_type": "Person", "identity": "alice" } },
//!   "manyAssociations": { "drivers": [] },
//!   "namedAssociations": { "keys": {} }
//! }
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use strata_core::{
    EntityReference, EntityState, EntityStateData, EntityTypeName, EntityVersion, Identity,
    QualifiedName,
};

use super::r#trait::EntityStoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRecord {
    pub identity: Identity,
    #[serde(rename = "type")]
    pub entity_type: EntityTypeName,
    pub version: EntityVersion,
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub properties: BTreeMap<QualifiedName, JsonValue>,
    #[serde(default)]
    pub associations: BTreeMap<QualifiedName, Option<EntityReference>>,
    #[serde(default)]
    pub many_associations: BTreeMap<QualifiedName, Vec<EntityReference>>,
    #[serde(default)]
    pub named_associations: BTreeMap<QualifiedName, BTreeMap<String, EntityReference>>,
}

impl EntityRecord {
    /// Snapshot `state` as it will be stored at `version`.
    pub fn from_state(state: &EntityState, version: EntityVersion, modified: DateTime<Utc>) -> Self {
        let data = state.data().clone();
        Self {
            identity: state.identity().clone(),
            entity_type: state.entity_type().clone(),
            version,
            modified,
            properties: data.properties,
            associations: data.associations,
            many_associations: data.many_associations,
            named_associations: data.named_associations,
        }
    }

    /// Rebuild a `LOADED` state from the record.
    pub fn into_state(self) -> EntityState {
        let reference = EntityReference::new(self.entity_type, self.identity);
        let data = EntityStateData {
            properties: self.properties,
            associations: self.associations,
            many_associations: self.many_associations,
            named_associations: self.named_associations,
        };
        EntityState::loaded(reference, self.version, self.modified, data)
    }

    pub fn encode(&self) -> Result<String, EntityStoreError> {
        serde_json::to_string(self)
            .map_err(|e| EntityStoreError::Codec(format!("record serialization failed: {e}")))
    }

    pub fn decode(document: &str) -> Result<Self, EntityStoreError> {
        serde_json::from_str(document)
            .map_err(|e| EntityStoreError::Codec(format!("record deserialization failed: {e}")))
    }
}
