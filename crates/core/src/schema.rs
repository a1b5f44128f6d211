//! Declarative entity type descriptors.
//!
//! An entity type is a named capability set: the properties and associations
//! it may carry, the types it can be viewed as, and per-property validation
//! rules and defaults. States are checked against their descriptor by a
//! generic validator rather than by per-type code.

use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::error::StateError;
use crate::id::{EntityTypeName, QualifiedName};
use crate::state::EntityState;

/// A rule a property value must satisfy.
#[derive(Debug, Clone)]
pub enum ValidationRule {
    /// Strings and arrays must not be empty.
    NotEmpty,
    /// Maximum length of strings (in chars) and arrays.
    MaxLength(usize),
    /// Inclusive numeric range.
    Range { min: Option<f64>, max: Option<f64> },
    /// Strings must match the regular expression.
    Matches(Regex),
}

impl ValidationRule {
    pub fn matches(pattern: &str) -> Result<Self, StateError> {
        Regex::new(pattern)
            .map(ValidationRule::Matches)
            .map_err(|e| StateError::InvalidRule {
                property: "<pattern>".to_string(),
                reason: e.to_string(),
            })
    }

    fn describe(&self) -> String {
        match self {
            ValidationRule::NotEmpty => "not empty".to_string(),
            ValidationRule::MaxLength(n) => format!("max length {n}"),
            ValidationRule::Range { min, max } => format!("range {min:?}..={max:?}"),
            ValidationRule::Matches(re) => format!("matches /{}/", re.as_str()),
        }
    }

    /// Null values are governed by the optional flag, not by rules.
    fn check(&self, value: &JsonValue) -> bool {
        match (self, value) {
            (_, JsonValue::Null) => true,
            (ValidationRule::NotEmpty, JsonValue::String(s)) => !s.trim().is_empty(),
            (ValidationRule::NotEmpty, JsonValue::Array(a)) => !a.is_empty(),
            (ValidationRule::NotEmpty, JsonValue::Object(o)) => !o.is_empty(),
            (ValidationRule::MaxLength(n), JsonValue::String(s)) => s.chars().count() <= *n,
            (ValidationRule::MaxLength(n), JsonValue::Array(a)) => a.len() <= *n,
            (ValidationRule::Range { min, max }, JsonValue::Number(num)) => {
                let Some(x) = num.as_f64() else { return false };
                min.is_none_or(|m| x >= m) && max.is_none_or(|m| x <= m)
            }
            (ValidationRule::Matches(re), JsonValue::String(s)) => re.is_match(s),
            (ValidationRule::Range { .. }, _) | (ValidationRule::Matches(_), _) => false,
            (ValidationRule::NotEmpty, _) | (ValidationRule::MaxLength(_), _) => true,
        }
    }
}

/// Declared shape of one property.
#[derive(Debug, Clone, Default)]
pub struct PropertyDescriptor {
    pub optional: bool,
    pub default: Option<JsonValue>,
    pub rules: Vec<ValidationRule>,
}

impl PropertyDescriptor {
    pub fn required() -> Self {
        Self::default()
    }

    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Self::default()
        }
    }

    pub fn with_default(mut self, value: impl Into<JsonValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.rules.push(rule);
        self
    }
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub entity_type: EntityTypeName,
    pub name: String,
    pub message: String,
}

impl core::fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}.{}: {}", self.entity_type, self.name, self.message)
    }
}

/// All violations found for one or more states.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ConstraintViolations(pub Vec<ConstraintViolation>);

impl core::fmt::Display for ConstraintViolations {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} constraint violation(s)", self.0.len())?;
        for (i, v) in self.0.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{v}")?;
        }
        Ok(())
    }
}

impl ConstraintViolations {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn violations(&self) -> &[ConstraintViolation] {
        &self.0
    }
}

/// Capability set of an entity type.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    name: EntityTypeName,
    supertypes: BTreeSet<EntityTypeName>,
    properties: BTreeMap<QualifiedName, PropertyDescriptor>,
    associations: BTreeSet<QualifiedName>,
    many_associations: BTreeSet<QualifiedName>,
    named_associations: BTreeSet<QualifiedName>,
}

impl EntityDescriptor {
    pub fn new(name: impl Into<EntityTypeName>) -> Self {
        Self {
            name: name.into(),
            supertypes: BTreeSet::new(),
            properties: BTreeMap::new(),
            associations: BTreeSet::new(),
            many_associations: BTreeSet::new(),
            named_associations: BTreeSet::new(),
        }
    }

    pub fn extends(mut self, supertype: impl Into<EntityTypeName>) -> Self {
        self.supertypes.insert(supertype.into());
        self
    }

    pub fn property(mut self, name: impl Into<QualifiedName>, descriptor: PropertyDescriptor) -> Self {
        self.properties.insert(name.into(), descriptor);
        self
    }

    pub fn association(mut self, name: impl Into<QualifiedName>) -> Self {
        self.associations.insert(name.into());
        self
    }

    pub fn many_association(mut self, name: impl Into<QualifiedName>) -> Self {
        self.many_associations.insert(name.into());
        self
    }

    pub fn named_association(mut self, name: impl Into<QualifiedName>) -> Self {
        self.named_associations.insert(name.into());
        self
    }

    pub fn name(&self) -> &EntityTypeName {
        &self.name
    }

    pub fn supertypes(&self) -> impl Iterator<Item = &EntityTypeName> {
        self.supertypes.iter()
    }

    pub fn properties(&self) -> impl Iterator<Item = (&QualifiedName, &PropertyDescriptor)> {
        self.properties.iter()
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn has_association(&self, name: &str) -> bool {
        self.associations.contains(name)
    }

    pub fn has_many_association(&self, name: &str) -> bool {
        self.many_associations.contains(name)
    }

    pub fn has_named_association(&self, name: &str) -> bool {
        self.named_associations.contains(name)
    }

    /// Write declared defaults into a freshly created state.
    pub fn apply_defaults(&self, state: &mut EntityState) -> Result<(), StateError> {
        for (name, property) in &self.properties {
            if state.property(name.as_str()).is_some() {
                continue;
            }
            match &property.default {
                Some(value) => state.set_property(name.clone(), value.clone())?,
                None if property.optional => state.set_property(name.clone(), JsonValue::Null)?,
                None => {}
            }
        }
        Ok(())
    }

    /// Check a state against this capability set.
    pub fn validate(&self, state: &EntityState) -> Result<(), ConstraintViolations> {
        let mut violations = Vec::new();
        let mut violation = |name: &str, message: String| {
            violations.push(ConstraintViolation {
                entity_type: self.name.clone(),
                name: name.to_string(),
                message,
            })
        };

        for name in state.properties().keys() {
            if !self.has_property(name.as_str()) {
                violation(name.as_str(), "unknown property".to_string());
            }
        }
        for name in state.associations().keys() {
            if !self.has_association(name.as_str()) {
                violation(name.as_str(), "unknown association".to_string());
            }
        }
        for name in state.many_associations().keys() {
            if !self.has_many_association(name.as_str()) {
                violation(name.as_str(), "unknown many-association".to_string());
            }
        }
        for name in state.named_associations().keys() {
            if !self.has_named_association(name.as_str()) {
                violation(name.as_str(), "unknown named association".to_string());
            }
        }

        for (name, property) in &self.properties {
            let value = state.property(name.as_str()).unwrap_or(&JsonValue::Null);
            if value.is_null() {
                if !property.optional {
                    violation(name.as_str(), "value is required".to_string());
                }
                continue;
            }
            for rule in &property.rules {
                if !rule.check(value) {
                    violation(name.as_str(), format!("must satisfy {}", rule.describe()));
                }
            }
        }

        if violations.is_empty() {
            Ok(())
        } else {
            Err(ConstraintViolations(violations))
        }
    }
}
