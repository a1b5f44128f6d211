use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, RwLock};

use super::{validate_name, Cache, CacheError, CacheHandle, CachePool};

/// Map-backed cache.
#[derive(Debug)]
pub struct InMemoryCache<V> {
    name: String,
    entries: RwLock<HashMap<String, V>>,
}

impl<V> InMemoryCache<V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        Ok(self.entries.read().map_err(|_| CacheError::Poisoned)?.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

impl<V> Cache<V> for InMemoryCache<V>
where
    V: Clone + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Result<Option<V>, CacheError> {
        let entries = self.entries.read().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: V) -> Result<(), CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    fn put_unless(
        &self,
        key: &str,
        value: V,
        keep: &dyn Fn(&V, &V) -> bool,
    ) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        if entries.get(key).is_some_and(|current| keep(current, &value)) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value);
        Ok(true)
    }

    fn remove(&self, key: &str) -> Result<Option<V>, CacheError> {
        let mut entries = self.entries.write().map_err(|_| CacheError::Poisoned)?;
        Ok(entries.remove(key))
    }
}

struct Checkout {
    cache: Arc<dyn Any + Send + Sync>,
    count: usize,
}

/// Reference-counting pool of `InMemoryCache`s.
///
/// A cache lives while at least one handle is checked out. The last
/// `return_cache` evicts it together with its contents.
#[derive(Default)]
pub struct InMemoryCachePool {
    caches: Mutex<HashMap<(String, TypeId), Checkout>>,
}

impl InMemoryCachePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of caches currently checked out.
    pub fn active_caches(&self) -> Result<usize, CacheError> {
        Ok(self.caches.lock().map_err(|_| CacheError::Poisoned)?.len())
    }
}

impl core::fmt::Debug for InMemoryCachePool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryCachePool").finish_non_exhaustive()
    }
}

impl CachePool for InMemoryCachePool {
    fn fetch_cache<V>(&self, name: &str) -> Result<CacheHandle<V>, CacheError>
    where
        V: Clone + Send + Sync + 'static,
    {
        validate_name(name)?;
        let mut caches = self.caches.lock().map_err(|_| CacheError::Poisoned)?;
        let checkout = caches
            .entry((name.to_string(), TypeId::of::<V>()))
            .or_insert_with(|| {
                tracing::debug!(cache = name, "cache created");
                Checkout {
                    cache: Arc::new(InMemoryCache::<V>::new(name)),
                    count: 0,
                }
            });

        let cache = Arc::clone(&checkout.cache)
            .downcast::<InMemoryCache<V>>()
            .map_err(|_| CacheError::InvalidArgument(format!("cache '{name}' has another value type")))?;
        checkout.count += 1;
        Ok(cache)
    }

    fn return_cache<V>(&self, cache: CacheHandle<V>) -> Result<(), CacheError>
    where
        V: Clone + Send + Sync + 'static,
    {
        let key = (cache.name().to_string(), TypeId::of::<V>());
        let mut caches = self.caches.lock().map_err(|_| CacheError::Poisoned)?;
        let Some(checkout) = caches.get_mut(&key) else {
            return Err(CacheError::InvalidArgument(format!(
                "cache '{}' is not checked out",
                key.0
            )));
        };

        checkout.count -= 1;
        if checkout.count == 0 {
            caches.remove(&key);
            tracing::debug!(cache = %key.0, "cache evicted");
        }
        Ok(())
    }
}

/// Cache that never retains anything.
#[derive(Debug)]
pub struct NullCache<V> {
    name: String,
    _values: PhantomData<fn() -> V>,
}

impl<V> NullCache<V> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            _values: PhantomData,
        }
    }
}

impl<V> Cache<V> for NullCache<V> {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, _key: &str) -> Result<Option<V>, CacheError> {
        Ok(None)
    }

    fn put(&self, _key: &str, _value: V) -> Result<(), CacheError> {
        Ok(())
    }

    fn put_unless(
        &self,
        _key: &str,
        _value: V,
        _keep: &dyn Fn(&V, &V) -> bool,
    ) -> Result<bool, CacheError> {
        Ok(false)
    }

    fn remove(&self, _key: &str) -> Result<Option<V>, CacheError> {
        Ok(None)
    }
}

/// Pool handing out `NullCache`s, for deployments without caching.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullCachePool;

impl CachePool for NullCachePool {
    fn fetch_cache<V>(&self, name: &str) -> Result<CacheHandle<V>, CacheError>
    where
        V: Clone + Send + Sync + 'static,
    {
        validate_name(name)?;
        Ok(Arc::new(NullCache::new(name)))
    }

    fn return_cache<V>(&self, _cache: CacheHandle<V>) -> Result<(), CacheError>
    where
        V: Clone + Send + Sync + 'static,
    {
        Ok(())
    }
}
