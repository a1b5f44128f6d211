//! Strongly-typed names and identifiers used across the persistence layer.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StateError;

/// Unique identity string of an entity (stable across units of work).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

/// Name of a registered entity type (e.g. `"Car"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityTypeName(String);

/// Qualified name of a property or association (e.g. `"color"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualifiedName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Build from any non-empty string.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Validating constructor used at parsing boundaries.
            pub fn parse(value: impl Into<String>) -> Result<Self, StateError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(StateError::malformed(format!("{} cannot be empty", $name)));
                }
                Ok(Self(value))
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $t {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $t {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl core::borrow::Borrow<str> for $t {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

impl_string_newtype!(Identity, "Identity");
impl_string_newtype!(EntityTypeName, "EntityTypeName");
impl_string_newtype!(QualifiedName, "QualifiedName");

/// Identifier of a single unit of work.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitOfWorkId(Uuid);

impl UnitOfWorkId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered), so ids sort in creation order.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for UnitOfWorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for UnitOfWorkId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for UnitOfWorkId {
    type Err = StateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| StateError::malformed(format!("UnitOfWorkId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Produces identities for entities created without an explicit one.
pub trait IdentityGenerator: Send + Sync {
    fn generate(&self, entity_type: &EntityTypeName) -> Identity;
}

impl<F> IdentityGenerator for F
where
    F: Fn(&EntityTypeName) -> Identity + Send + Sync,
{
    fn generate(&self, entity_type: &EntityTypeName) -> Identity {
        self(entity_type)
    }
}

/// Default generator: time-ordered UUIDv7 strings.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidIdentityGenerator;

impl IdentityGenerator for UuidIdentityGenerator {
    fn generate(&self, _entity_type: &EntityTypeName) -> Identity {
        Identity(Uuid::now_v7().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_blank_names() {
        assert!(Identity::parse("  ").is_err());
        assert!(EntityTypeName::parse("").is_err());
        assert_eq!(QualifiedName::parse("color").unwrap().as_str(), "color");
    }

    #[test]
    fn uuid_generator_produces_distinct_identities() {
        let generator = UuidIdentityGenerator;
        let car = EntityTypeName::new("Car");
        let a = generator.generate(&car);
        let b = generator.generate(&car);
        assert_ne!(a, b);
        assert!(Uuid::from_str(a.as_str()).is_ok());
    }

    #[test]
    fn closures_act_as_generators() {
        let generator = |t: &EntityTypeName| Identity::new(format!("{t}-1"));
        assert_eq!(generator.generate(&"Car".into()).as_str(), "Car-1");
    }

    #[test]
    fn unit_of_work_id_round_trips_through_display() {
        let id = UnitOfWorkId::new();
        let parsed: UnitOfWorkId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }
}
