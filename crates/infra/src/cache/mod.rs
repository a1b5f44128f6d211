//! Named, typed object caches shared across units of work.
//!
//! A `CachePool` hands out caches keyed by `(name, value type)`. Fetching the
//! same pair while it is checked out yields the same cache; once every
//! checkout has been returned the pool may drop the contents, so callers
//! must treat an empty cache after a return/refetch cycle as normal.

pub mod in_memory;

pub use in_memory::{InMemoryCache, InMemoryCachePool, NullCache, NullCachePool};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cache lock poisoned")]
    Poisoned,
}

/// Plain key/value cache. `get` returns an owned copy so callers never share
/// a cached value.
pub trait Cache<V>: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<V>, CacheError>;

    fn put(&self, key: &str, value: V) -> Result<(), CacheError>;

    /// Store `value` unless `keep(current, &value)` holds for the entry
    /// already present. The check and the write happen atomically. Returns
    /// whether `value` was stored.
    fn put_unless(
        &self,
        key: &str,
        value: V,
        keep: &dyn Fn(&V, &V) -> bool,
    ) -> Result<bool, CacheError>;

    /// Drop the entry, returning the previous value.
    fn remove(&self, key: &str) -> Result<Option<V>, CacheError>;
}

/// Shared handle to a pooled cache.
pub type CacheHandle<V> = Arc<dyn Cache<V>>;

/// Source of named caches.
pub trait CachePool: Send + Sync {
    /// Fetch (creating if absent) the cache bound to `name` and `V`.
    ///
    /// Fails with `CacheError::InvalidArgument` when `name` is blank.
    fn fetch_cache<V>(&self, name: &str) -> Result<CacheHandle<V>, CacheError>
    where
        V: Clone + Send + Sync + 'static;

    /// Release interest in a cache obtained from `fetch_cache`.
    fn return_cache<V>(&self, cache: CacheHandle<V>) -> Result<(), CacheError>
    where
        V: Clone + Send + Sync + 'static;
}

impl<P: CachePool> CachePool for Arc<P> {
    fn fetch_cache<V>(&self, name: &str) -> Result<CacheHandle<V>, CacheError>
    where
        V: Clone + Send + Sync + 'static,
    {
        (**self).fetch_cache(name)
    }

    fn return_cache<V>(&self, cache: CacheHandle<V>) -> Result<(), CacheError>
    where
        V: Clone + Send + Sync + 'static,
    {
        (**self).return_cache(cache)
    }
}

/// When the entity cache is populated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Cache states loaded from the store.
    pub cache_on_read: bool,
    /// Cache states inserted by a successful change-set.
    pub cache_on_new: bool,
    /// Cache states updated by a successful change-set.
    pub cache_on_write: bool,
}

impl CacheOptions {
    pub const NEVER: CacheOptions = CacheOptions {
        cache_on_read: false,
        cache_on_new: false,
        cache_on_write: false,
    };
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            cache_on_read: true,
            cache_on_new: true,
            cache_on_write: true,
        }
    }
}

fn validate_name(name: &str) -> Result<(), CacheError> {
    if name.trim().is_empty() {
        return Err(CacheError::InvalidArgument(
            "cache name must not be empty".to_string(),
        ));
    }
    Ok(())
}
