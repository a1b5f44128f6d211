//! Entity references: the only handle that survives unit-of-work boundaries.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::StateError;
use crate::id::{EntityTypeName, Identity};

const SEPARATOR: char = '#';

/// Immutable (type, identity) pair naming one entity.
///
/// The type is the type the reference was created for; a stored entity may be
/// of a subtype of it. The textual form is `Type#identity`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityReference {
    entity_type: EntityTypeName,
    identity: Identity,
}

impl EntityReference {
    pub fn new(entity_type: impl Into<EntityTypeName>, identity: impl Into<Identity>) -> Self {
        Self {
            entity_type: entity_type.into(),
            identity: identity.into(),
        }
    }

    pub fn entity_type(&self) -> &EntityTypeName {
        &self.entity_type
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Same identity, viewed as another type.
    pub fn with_type(&self, entity_type: impl Into<EntityTypeName>) -> Self {
        Self {
            entity_type: entity_type.into(),
            identity: self.identity.clone(),
        }
    }
}

impl core::fmt::Display for EntityReference {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}{SEPARATOR}{}", self.entity_type, self.identity)
    }
}

impl FromStr for EntityReference {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (entity_type, identity) = s
            .split_once(SEPARATOR)
            .ok_or_else(|| StateError::malformed(format!("missing '{SEPARATOR}' in '{s}'")))?;

        Ok(Self {
            entity_type: EntityTypeName::parse(entity_type)?,
            identity: Identity::parse(identity)?,
        })
    }
}
