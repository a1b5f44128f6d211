//! Static assembly information: which types are entities, grouped per module.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::StateError;
use crate::id::EntityTypeName;
use crate::schema::EntityDescriptor;

/// Lookup table of registered entity types.
///
/// Built once at assembly time and shared read-only afterwards.
#[derive(Debug, Default, Clone)]
pub struct EntityTypeRegistry {
    descriptors: BTreeMap<EntityTypeName, Arc<EntityDescriptor>>,
}

impl EntityTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type. Supertypes need not be entity types
    /// themselves (they may be pure capability names), so they are not
    /// required to be registered.
    pub fn register(&mut self, descriptor: EntityDescriptor) -> Result<(), StateError> {
        if self.descriptors.contains_key(descriptor.name()) {
            return Err(StateError::DuplicateType(descriptor.name().to_string()));
        }
        tracing::debug!(entity_type = %descriptor.name(), "registered entity type");
        self.descriptors
            .insert(descriptor.name().clone(), Arc::new(descriptor));
        Ok(())
    }

    /// Builder-style registration for assembly code.
    pub fn with(mut self, descriptor: EntityDescriptor) -> Result<Self, StateError> {
        self.register(descriptor)?;
        Ok(self)
    }

    pub fn descriptor(&self, name: &EntityTypeName) -> Option<&Arc<EntityDescriptor>> {
        self.descriptors.get(name)
    }

    pub fn is_registered(&self, name: &EntityTypeName) -> bool {
        self.descriptors.contains_key(name)
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &EntityTypeName> {
        self.descriptors.keys()
    }

    /// Whether an entity stored as `stored` may be viewed as `requested`,
    /// following declared supertypes transitively.
    pub fn is_assignable(&self, stored: &EntityTypeName, requested: &EntityTypeName) -> bool {
        if stored == requested {
            return true;
        }

        let mut seen = BTreeSet::new();
        let mut pending = vec![stored.clone()];
        while let Some(current) = pending.pop() {
            if !seen.insert(current.clone()) {
                continue;
            }
            let Some(descriptor) = self.descriptors.get(&current) else {
                continue;
            };
            for supertype in descriptor.supertypes() {
                if supertype == requested {
                    return true;
                }
                pending.push(supertype.clone());
            }
        }
        false
    }
}

/// A named group of entity types backed by one entity store.
///
/// Passed to stores and finders as the "module hint" that scopes bulk reads.
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    registry: Arc<EntityTypeRegistry>,
}

impl Module {
    pub fn new(name: impl Into<String>, registry: Arc<EntityTypeRegistry>) -> Self {
        Self {
            name: name.into(),
            registry,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn registry(&self) -> &Arc<EntityTypeRegistry> {
        &self.registry
    }

    /// Whether states of this type belong to the module.
    pub fn contains(&self, entity_type: &EntityTypeName) -> bool {
        self.registry.is_registered(entity_type)
    }
}
