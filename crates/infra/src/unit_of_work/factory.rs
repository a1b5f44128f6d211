use std::sync::Arc;

use strata_core::{IdentityGenerator, Module, UuidIdentityGenerator};

use super::instance::{Binding, UnitOfWork, Usecase};
use crate::config::PersistenceConfig;
use crate::entity_store::EntityStore;
use crate::finder::{EntityFinder, ScanEntityFinder};

/// Opens units of work bound to one store and module.
///
/// ## Generic Parameters
///
/// - `S`: entity store implementation. Wrap it in `CachingEntityStore` to
///   serve loads from a cache pool, or `IndexingEntityStore` to keep an index
///   current.
///
/// By default queries scan the store; `with_finder` plugs in an indexed
/// finder.
pub struct UnitOfWorkFactory<S> {
    binding: Binding<S>,
}

impl<S: EntityStore + 'static> UnitOfWorkFactory<S> {
    pub fn new(store: S, module: Module) -> Self {
        Self::from_shared(Arc::new(store), module)
    }

    pub fn from_shared(store: Arc<S>, module: Module) -> Self {
        let finder: Arc<dyn EntityFinder> = Arc::new(ScanEntityFinder::new(Arc::clone(&store)));
        Self {
            binding: Binding {
                store,
                module,
                identities: Arc::new(UuidIdentityGenerator),
                finder,
                config: PersistenceConfig::default(),
            },
        }
    }

    pub fn with_identity_generator(mut self, generator: impl IdentityGenerator + 'static) -> Self {
        self.binding.identities = Arc::new(generator);
        self
    }

    pub fn with_finder(mut self, finder: Arc<dyn EntityFinder>) -> Self {
        self.binding.finder = finder;
        self
    }

    pub fn with_config(mut self, config: PersistenceConfig) -> Self {
        self.binding.config = config;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.binding.store
    }

    pub fn module(&self) -> &Module {
        &self.binding.module
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.binding.config
    }

    pub fn new_unit_of_work(&self, usecase: Usecase) -> UnitOfWork<S> {
        UnitOfWork::open(self.binding.clone(), usecase)
    }
}
