//! Entity store boundary.
//!
//! This module defines the persistence SPI used by units of work, an
//! in-memory reference implementation, and a caching decorator.

pub mod in_memory;
pub mod record;
pub mod r#trait;

pub use in_memory::InMemoryEntityStore;
pub use record::EntityRecord;
pub use r#trait::{CommittedVersion, EntityChange, EntityStates, EntityStore, EntityStoreError};

use strata_core::{EntityReference, EntityState, EntityStatus, EntityVersion, Identity, Module};

use crate::cache::{CacheError, CacheHandle, CacheOptions, CachePool};

/// Adapter that serves loads from a pooled cache before hitting the store.
///
/// Cache hits hand out clones, so units of work never share a state. The
/// cache is only updated after a change-set has been applied; a rejected
/// change-set evicts the conflicting entries since they are known stale.
/// The cache handle is returned to the pool when the adapter is dropped.
pub struct CachingEntityStore<S, P: CachePool> {
    store: S,
    pool: P,
    cache: Option<CacheHandle<EntityState>>,
    options: CacheOptions,
}

impl<S, P: CachePool> CachingEntityStore<S, P> {
    pub fn new(store: S, pool: P, cache_name: &str, options: CacheOptions) -> Result<Self, CacheError> {
        let cache = pool.fetch_cache::<EntityState>(cache_name)?;
        Ok(Self {
            store,
            pool,
            cache: Some(cache),
            options,
        })
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    fn cached(&self, identity: &Identity) -> Option<EntityState> {
        let cache = self.cache.as_ref()?;
        match cache.get(identity.as_str()) {
            Ok(hit) => hit,
            Err(err) => {
                tracing::warn!(%identity, error = %err, "entity cache read failed");
                None
            }
        }
    }

    /// Cache `state` unless the cache already holds the same or a later
    /// version, which happens when a load races a commit.
    fn remember(&self, state: EntityState) {
        let Some(cache) = &self.cache else { return };
        let identity = state.identity().clone();
        let version = state.version();
        let newer = |cached: &EntityState, fresh: &EntityState| cached.version() >= fresh.version();
        match cache.put_unless(identity.as_str(), state, &newer) {
            Ok(true) => {}
            Ok(false) => tracing::debug!(%identity, %version, "cache already holds a later version"),
            Err(err) => tracing::warn!(%identity, error = %err, "entity cache write failed"),
        }
    }

    fn forget(&self, identity: &Identity) {
        let Some(cache) = &self.cache else { return };
        if let Err(err) = cache.remove(identity.as_str()) {
            tracing::warn!(%identity, error = %err, "entity cache eviction failed");
        }
    }
}

impl<S, P: CachePool> Drop for CachingEntityStore<S, P> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.take() {
            if let Err(err) = self.pool.return_cache(cache) {
                tracing::warn!(error = %err, "failed to return entity cache");
            }
        }
    }
}

impl<S, P> EntityStore for CachingEntityStore<S, P>
where
    S: EntityStore,
    P: CachePool,
{
    fn entity_state_of(&self, reference: &EntityReference) -> Result<EntityState, EntityStoreError> {
        if self.options.cache_on_read {
            if let Some(state) = self.cached(reference.identity()) {
                tracing::debug!(%reference, version = %state.version(), "entity cache hit");
                return Ok(state);
            }
        }

        let state = self.store.entity_state_of(reference)?;
        tracing::debug!(%reference, version = %state.version(), "entity loaded from store");
        if self.options.cache_on_read {
            self.remember(state.clone());
        }
        Ok(state)
    }

    fn version_of(&self, identity: &Identity) -> Result<Option<EntityVersion>, EntityStoreError> {
        self.store.version_of(identity)
    }

    fn apply_changes(
        &self,
        changes: Vec<EntityChange>,
    ) -> Result<Vec<CommittedVersion>, EntityStoreError> {
        // Keep what the cache needs before ownership moves to the store.
        let pending: Vec<(Identity, Option<EntityState>)> = changes
            .iter()
            .map(|change| {
                let keep = match change.state.status() {
                    EntityStatus::New => self.options.cache_on_new,
                    EntityStatus::Updated => self.options.cache_on_write,
                    EntityStatus::Loaded | EntityStatus::Removed => false,
                };
                (change.identity().clone(), keep.then(|| change.state.clone()))
            })
            .collect();

        let committed = match self.store.apply_changes(changes) {
            Ok(committed) => committed,
            Err(err) => {
                if let EntityStoreError::Concurrency { conflicts } = &err {
                    for reference in conflicts {
                        self.forget(reference.identity());
                    }
                }
                return Err(err);
            }
        };

        for (identity, state) in pending {
            let version = committed.iter().find(|c| c.reference.identity() == &identity);
            match (state, version) {
                (Some(state), Some(version)) => {
                    self.remember(state.into_committed(version.version, version.last_modified))
                }
                // Removed, or written without caching: any cached copy is stale.
                _ => self.forget(&identity),
            }
        }
        Ok(committed)
    }

    fn entity_states<'a>(&'a self, module: &'a Module) -> EntityStates<'a> {
        self.store.entity_states(module)
    }
}
