//! Persistence layer: entity stores, cache pools, finders and units of work.

pub mod cache;
pub mod config;
pub mod entity_store;
pub mod finder;
pub mod unit_of_work;


pub use cache::{Cache, CacheError, CacheHandle, CacheOptions, CachePool, InMemoryCachePool};
pub use config::PersistenceConfig;
pub use entity_store::{
    CachingEntityStore, CommittedVersion, EntityChange, EntityStore, EntityStoreError,
    InMemoryEntityStore,
};
pub use finder::{
    EntityFinder, EntityFinderError, EntityIndex, FindQuery, InMemoryEntityIndex,
    IndexedEntityFinder, IndexingEntityStore, ScanEntityFinder,
};
pub use unit_of_work::{
    UnitOfWork, UnitOfWorkContext, UnitOfWorkError, UnitOfWorkFactory, UnitOfWorkStatus, Usecase,
};
