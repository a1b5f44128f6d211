//! `strata-core`: entity state model and query building blocks.
//!
//! This crate contains the **pure** persistence primitives: identities and
//! references, versioned entity state, type descriptors and the
//! specification engine. Storage, caching and units of work live in
//! `strata-infra`.

pub mod error;
pub mod id;
pub mod predicate;
pub mod reference;
pub mod registry;
pub mod schema;
pub mod specification;
pub mod state;
pub mod version;

pub use error::{StateError, StateResult};
pub use id::{
    EntityTypeName, Identity, IdentityGenerator, QualifiedName, UnitOfWorkId, UuidIdentityGenerator,
};
pub use predicate::{
    compare_states, compare_values, variable, ComparisonOp, Direction, IndexTerm, Operand, OrderBy,
    Predicate, PredicateError, TermKind, Variables,
};
pub use reference::EntityReference;
pub use registry::{EntityTypeRegistry, Module};
pub use schema::{
    ConstraintViolation, ConstraintViolations, EntityDescriptor, PropertyDescriptor, ValidationRule,
};
pub use specification::{BoxedSpecification, Specification, SpecificationExt};
pub use state::{EntityState, EntityStateData, EntityStatus};
pub use version::{EntityVersion, ExpectedVersion};
