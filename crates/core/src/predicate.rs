//! Data-driven query predicates over entity states.
//!
//! A `Predicate` is a serializable expression tree that index backends can
//! inspect and translate into their own query language. For in-process
//! evaluation it compiles into the generic specification engine, lifting each
//! property-level check to an entity-level one through `translate`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::id::{Identity, QualifiedName};
use crate::reference::EntityReference;
use crate::specification::{self, BoxedSpecification, SpecificationExt};
use crate::state::EntityState;

/// Values bound to named variables at query execution time.
pub type Variables = BTreeMap<String, JsonValue>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PredicateError {
    #[error("variable '{0}' is not bound")]
    UnboundVariable(String),

    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Right-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Literal(JsonValue),
    Variable(String),
}

impl Operand {
    pub fn resolve(&self, variables: &Variables) -> Result<JsonValue, PredicateError> {
        match self {
            Operand::Literal(v) => Ok(v.clone()),
            Operand::Variable(name) => variables
                .get(name)
                .cloned()
                .ok_or_else(|| PredicateError::UnboundVariable(name.clone())),
        }
    }
}

macro_rules! literal_operand {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Operand {
                fn from(value: $t) -> Self {
                    Operand::Literal(value.into())
                }
            }
        )*
    };
}

literal_operand!(JsonValue, &str, String, bool, i32, i64, u32, u64, f64);

/// Shorthand for a variable operand.
pub fn variable(name: impl Into<String>) -> Operand {
    Operand::Variable(name.into())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ComparisonOp {
    fn accepts(self, a: &JsonValue, b: &JsonValue) -> bool {
        let ordering = compare_values(a, b);
        match self {
            ComparisonOp::Eq => ordering == Some(Ordering::Equal),
            ComparisonOp::Ne => ordering != Some(Ordering::Equal),
            ComparisonOp::Gt => ordering == Some(Ordering::Greater),
            ComparisonOp::Ge => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            ComparisonOp::Lt => ordering == Some(Ordering::Less),
            ComparisonOp::Le => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        }
    }
}

/// Boolean expression over one entity's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        property: QualifiedName,
        op: ComparisonOp,
        operand: Operand,
    },
    In {
        property: QualifiedName,
        operands: Vec<Operand>,
    },
    IsNull(QualifiedName),
    IsNotNull(QualifiedName),
    /// Regular-expression match on a string property.
    Matches {
        property: QualifiedName,
        pattern: Operand,
    },
    /// Single association points at the entity with this identity
    /// (`None` matches an empty association).
    AssociationEq {
        association: QualifiedName,
        target: Option<Identity>,
    },
    /// Many-association contains the entity with this identity.
    ContainsAssociation {
        association: QualifiedName,
        target: Identity,
    },
    /// Many-association contains every listed entity.
    ContainsAllAssociations {
        association: QualifiedName,
        targets: Vec<Identity>,
    },
    /// Named association has an entry under this name.
    ContainsName {
        association: QualifiedName,
        name: String,
    },
    /// Named association maps some name to the entity with this identity.
    NamedAssociationContains {
        association: QualifiedName,
        target: Identity,
    },
    /// Array-valued property has an element equal to the operand.
    Contains {
        property: QualifiedName,
        operand: Operand,
    },
    /// Array-valued property has an element equal to each operand.
    ContainsAll {
        property: QualifiedName,
        operands: Vec<Operand>,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    fn compare(property: impl Into<QualifiedName>, op: ComparisonOp, operand: impl Into<Operand>) -> Self {
        Predicate::Compare {
            property: property.into(),
            op,
            operand: operand.into(),
        }
    }

    pub fn eq(property: impl Into<QualifiedName>, operand: impl Into<Operand>) -> Self {
        Self::compare(property, ComparisonOp::Eq, operand)
    }

    pub fn ne(property: impl Into<QualifiedName>, operand: impl Into<Operand>) -> Self {
        Self::compare(property, ComparisonOp::Ne, operand)
    }

    pub fn gt(property: impl Into<QualifiedName>, operand: impl Into<Operand>) -> Self {
        Self::compare(property, ComparisonOp::Gt, operand)
    }

    pub fn ge(property: impl Into<QualifiedName>, operand: impl Into<Operand>) -> Self {
        Self::compare(property, ComparisonOp::Ge, operand)
    }

    pub fn lt(property: impl Into<QualifiedName>, operand: impl Into<Operand>) -> Self {
        Self::compare(property, ComparisonOp::Lt, operand)
    }

    pub fn le(property: impl Into<QualifiedName>, operand: impl Into<Operand>) -> Self {
        Self::compare(property, ComparisonOp::Le, operand)
    }

    pub fn is_in<O: Into<Operand>>(
        property: impl Into<QualifiedName>,
        operands: impl IntoIterator<Item = O>,
    ) -> Self {
        Predicate::In {
            property: property.into(),
            operands: operands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_null(property: impl Into<QualifiedName>) -> Self {
        Predicate::IsNull(property.into())
    }

    pub fn is_not_null(property: impl Into<QualifiedName>) -> Self {
        Predicate::IsNotNull(property.into())
    }

    pub fn matches(property: impl Into<QualifiedName>, pattern: impl Into<Operand>) -> Self {
        Predicate::Matches {
            property: property.into(),
            pattern: pattern.into(),
        }
    }

    pub fn association_eq(association: impl Into<QualifiedName>, target: Option<&EntityReference>) -> Self {
        Predicate::AssociationEq {
            association: association.into(),
            target: target.map(|r| r.identity().clone()),
        }
    }

    pub fn contains_association(association: impl Into<QualifiedName>, target: &EntityReference) -> Self {
        Predicate::ContainsAssociation {
            association: association.into(),
            target: target.identity().clone(),
        }
    }

    pub fn contains_all_associations<'a>(
        association: impl Into<QualifiedName>,
        targets: impl IntoIterator<Item = &'a EntityReference>,
    ) -> Self {
        Predicate::ContainsAllAssociations {
            association: association.into(),
            targets: targets.into_iter().map(|r| r.identity().clone()).collect(),
        }
    }

    pub fn contains_name(association: impl Into<QualifiedName>, name: impl Into<String>) -> Self {
        Predicate::ContainsName {
            association: association.into(),
            name: name.into(),
        }
    }

    pub fn named_association_contains(
        association: impl Into<QualifiedName>,
        target: &EntityReference,
    ) -> Self {
        Predicate::NamedAssociationContains {
            association: association.into(),
            target: target.identity().clone(),
        }
    }

    pub fn contains(property: impl Into<QualifiedName>, operand: impl Into<Operand>) -> Self {
        Predicate::Contains {
            property: property.into(),
            operand: operand.into(),
        }
    }

    pub fn contains_all<O: Into<Operand>>(
        property: impl Into<QualifiedName>,
        operands: impl IntoIterator<Item = O>,
    ) -> Self {
        Predicate::ContainsAll {
            property: property.into(),
            operands: operands.into_iter().map(Into::into).collect(),
        }
    }

    pub fn and(operands: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::And(operands.into_iter().collect())
    }

    pub fn or(operands: impl IntoIterator<Item = Predicate>) -> Self {
        Predicate::Or(operands.into_iter().collect())
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(operand: Predicate) -> Self {
        Predicate::Not(Box::new(operand))
    }

    /// Compile into an entity-level specification with variables bound.
    pub fn to_specification(
        &self,
        variables: &Variables,
    ) -> Result<BoxedSpecification<EntityState>, PredicateError> {
        let spec: BoxedSpecification<EntityState> = match self {
            Predicate::Compare { property, op, operand } => {
                let expected = operand.resolve(variables)?;
                let op = *op;
                lift(property, move |v: &JsonValue| op.accepts(v, &expected))
            }
            Predicate::In { property, operands } => {
                let values = operands
                    .iter()
                    .map(|o| o.resolve(variables))
                    .collect::<Result<Vec<_>, _>>()?;
                lift(property, move |v: &JsonValue| {
                    values.iter().any(|candidate| ComparisonOp::Eq.accepts(v, candidate))
                })
            }
            Predicate::IsNull(property) => lift(property, specification::not(specification::not_null())),
            Predicate::IsNotNull(property) => lift(property, specification::not_null()),
            Predicate::Matches { property, pattern } => {
                let pattern = pattern.resolve(variables)?;
                let pattern = pattern.as_str().ok_or_else(|| PredicateError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: "pattern must be a string".to_string(),
                })?;
                let regex = Regex::new(pattern).map_err(|e| PredicateError::InvalidPattern {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
                lift(property, move |v: &JsonValue| v.as_str().is_some_and(|s| regex.is_match(s)))
            }
            Predicate::AssociationEq { association, target } => {
                let association = association.clone();
                let target = target.clone();
                Box::new(specification::translate(
                    move |s: &EntityState| s.association(association.as_str()).map(|r| r.identity().clone()),
                    move |actual: &Option<Identity>| *actual == target,
                ))
            }
            Predicate::ContainsAssociation { association, target } => {
                let association = association.clone();
                let target = target.clone();
                Box::new(move |s: &EntityState| {
                    s.many_association(association.as_str())
                        .iter()
                        .any(|r| r.identity() == &target)
                })
            }
            Predicate::ContainsAllAssociations { association, targets } => {
                let association = association.clone();
                let targets = targets.clone();
                Box::new(move |s: &EntityState| {
                    let present = s.many_association(association.as_str());
                    targets
                        .iter()
                        .all(|target| present.iter().any(|r| r.identity() == target))
                })
            }
            Predicate::ContainsName { association, name } => {
                let association = association.clone();
                let name = name.clone();
                Box::new(move |s: &EntityState| {
                    s.named_association(association.as_str())
                        .is_some_and(|entries| entries.contains_key(&name))
                })
            }
            Predicate::NamedAssociationContains { association, target } => {
                let association = association.clone();
                let target = target.clone();
                Box::new(move |s: &EntityState| {
                    s.named_association(association.as_str())
                        .is_some_and(|entries| entries.values().any(|r| r.identity() == &target))
                })
            }
            Predicate::Contains { property, operand } => {
                let expected = operand.resolve(variables)?;
                lift(property, move |v: &JsonValue| array_contains(v, &expected))
            }
            Predicate::ContainsAll { property, operands } => {
                let expected = operands
                    .iter()
                    .map(|o| o.resolve(variables))
                    .collect::<Result<Vec<_>, _>>()?;
                lift(property, move |v: &JsonValue| {
                    v.is_array() && expected.iter().all(|e| array_contains(v, e))
                })
            }
            Predicate::And(operands) => specification::and(compile_all(operands, variables)?).boxed(),
            Predicate::Or(operands) => specification::or(compile_all(operands, variables)?).boxed(),
            Predicate::Not(operand) => specification::not(operand.to_specification(variables)?).boxed(),
        };
        Ok(spec)
    }

    /// Flatten into index terms when the predicate is an equality, an array
    /// membership test, or a conjunction of those. Index backends use this to
    /// decide whether they can serve a query directly.
    pub fn index_terms(&self, variables: &Variables) -> Option<Vec<IndexTerm>> {
        let term = |property: &QualifiedName, kind, operand: &Operand| {
            Some(IndexTerm {
                property: property.clone(),
                kind,
                value: operand.resolve(variables).ok()?,
            })
        };
        match self {
            Predicate::Compare {
                property,
                op: ComparisonOp::Eq,
                operand,
            } => Some(vec![term(property, TermKind::Equals, operand)?]),
            Predicate::Contains { property, operand } => {
                Some(vec![term(property, TermKind::Element, operand)?])
            }
            // Empty lists still require an array value, which postings cannot express.
            Predicate::ContainsAll { property, operands } if !operands.is_empty() => operands
                .iter()
                .map(|operand| term(property, TermKind::Element, operand))
                .collect(),
            Predicate::And(operands) if !operands.is_empty() => {
                let mut terms = Vec::new();
                for operand in operands {
                    terms.extend(operand.index_terms(variables)?);
                }
                Some(terms)
            }
            _ => None,
        }
    }
}

/// How an index term constrains a property value.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TermKind {
    /// The whole value equals the term value.
    Equals,
    /// The value is an array with an element equal to the term value.
    Element,
}

/// One conjunct of an index-servable predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexTerm {
    pub property: QualifiedName,
    pub kind: TermKind,
    pub value: JsonValue,
}

fn array_contains(value: &JsonValue, expected: &JsonValue) -> bool {
    value
        .as_array()
        .is_some_and(|items| items.iter().any(|item| ComparisonOp::Eq.accepts(item, expected)))
}

fn compile_all(
    operands: &[Predicate],
    variables: &Variables,
) -> Result<Vec<BoxedSpecification<EntityState>>, PredicateError> {
    operands.iter().map(|p| p.to_specification(variables)).collect()
}

/// Lift a specification over a property value to one over the whole state.
/// Missing properties read as `null`.
fn lift<S>(property: &QualifiedName, inner: S) -> BoxedSpecification<EntityState>
where
    S: specification::Specification<JsonValue> + 'static,
{
    let property = property.clone();
    Box::new(specification::translate(
        move |s: &EntityState| s.property(property.as_str()).cloned().unwrap_or(JsonValue::Null),
        inner,
    ))
}

/// Total-enough ordering for JSON scalars: numbers numerically, strings
/// lexicographically, booleans false < true, null equal to null. Values of
/// different kinds (and composite values) are incomparable.
pub fn compare_values(a: &JsonValue, b: &JsonValue) -> Option<Ordering> {
    match (a, b) {
        (JsonValue::Null, JsonValue::Null) => Some(Ordering::Equal),
        (JsonValue::Number(x), JsonValue::Number(y)) => {
            if let (Some(x), Some(y)) = (x.as_i64(), y.as_i64()) {
                return Some(x.cmp(&y));
            }
            x.as_f64()?.partial_cmp(&y.as_f64()?)
        }
        (JsonValue::String(x), JsonValue::String(y)) => Some(x.cmp(y)),
        (JsonValue::Bool(x), JsonValue::Bool(y)) => Some(x.cmp(y)),
        (JsonValue::Array(_), JsonValue::Array(_)) | (JsonValue::Object(_), JsonValue::Object(_)) => {
            (a == b).then_some(Ordering::Equal)
        }
        _ => None,
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

/// One sort key of a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBy {
    pub property: QualifiedName,
    pub direction: Direction,
}

impl OrderBy {
    pub fn ascending(property: impl Into<QualifiedName>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn descending(property: impl Into<QualifiedName>) -> Self {
        Self {
            property: property.into(),
            direction: Direction::Descending,
        }
    }
}

/// Compare two states by a list of sort keys.
///
/// Nulls sort before any value when ascending. Incomparable values compare
/// equal so a stable sort keeps the store's iteration order for them.
pub fn compare_states(a: &EntityState, b: &EntityState, order: &[OrderBy]) -> Ordering {
    for key in order {
        let x = a.property(key.property.as_str()).unwrap_or(&JsonValue::Null);
        let y = b.property(key.property.as_str()).unwrap_or(&JsonValue::Null);
        let ordering = match (x.is_null(), y.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => compare_values(x, y).unwrap_or(Ordering::Equal),
        };
        let ordering = match key.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
