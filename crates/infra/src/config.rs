//! Persistence configuration.

use serde::{Deserialize, Serialize};

use crate::cache::CacheOptions;

pub const DEFAULT_ENTITY_CACHE: &str = "entities";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub cache: CacheOptions,
    /// Pool name of the entity state cache.
    pub entity_cache_name: String,
    /// Drop unmodified `LOADED` states when a unit of work is paused.
    pub prune_on_pause: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            cache: CacheOptions::default(),
            entity_cache_name: DEFAULT_ENTITY_CACHE.to_string(),
            prune_on_pause: false,
        }
    }
}

impl PersistenceConfig {
    /// Read overrides from `STRATA_*` environment variables.
    ///
    /// Unset variables keep their defaults; unparsable ones are logged and
    /// ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        let flag = |key: &str, current: bool| -> bool {
            match lookup(key) {
                None => current,
                Some(raw) => match raw.trim().to_ascii_lowercase().parse::<bool>() {
                    Ok(value) => value,
                    Err(_) => {
                        tracing::warn!(key, value = %raw, "ignoring unparsable boolean setting");
                        current
                    }
                },
            }
        };

        config.cache.cache_on_read = flag("STRATA_CACHE_ON_READ", config.cache.cache_on_read);
        config.cache.cache_on_new = flag("STRATA_CACHE_ON_NEW", config.cache.cache_on_new);
        config.cache.cache_on_write = flag("STRATA_CACHE_ON_WRITE", config.cache.cache_on_write);
        config.prune_on_pause = flag("STRATA_PRUNE_ON_PAUSE", config.prune_on_pause);

        match lookup("STRATA_ENTITY_CACHE") {
            Some(name) if !name.trim().is_empty() => config.entity_cache_name = name,
            Some(_) => tracing::warn!("STRATA_ENTITY_CACHE is blank, using default cache name"),
            None => {}
        }
        config
    }
}
