//! LRU caching decorator for materialization stores.
//!
//! Sticky lookups repeat for the same units across resolves. The decorator
//! answers them from an LRU cache keyed by `(unit, materialization)` and only
//! forwards misses to the wrapped store. Pairs the backend does not know are
//! cached as the empty [`MaterializationInfo`], which callers treat the same
//! as an absent record.
//!
//! Stores go to the backend first and then invalidate the written pairs, so
//! the next load observes the merged record. Every store also advances a
//! write generation. A load that started before a store finished may have
//! read the old record, so it returns what it read but leaves the cache alone.

use async_trait::async_trait;
use lru::LruCache;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::types::MaterializationInfo;
use super::{MaterializationStore, StoreError};

/// Configuration for the materialization cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_entries: usize,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            enabled: true,
        }
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy)]
pub struct CacheStats {
    /// Current number of entries in the cache.
    pub len: usize,
    /// Maximum capacity of the cache.
    pub cap: usize,
}

type CacheKey = (String, String);

struct CacheState {
    entries: LruCache<CacheKey, MaterializationInfo>,
    /// Number of stores that have invalidated entries so far.
    generation: u64,
}

/// Store wrapper that caches loads.
pub struct CachedMaterializationStore<S> {
    inner: S,
    cache: Option<Arc<RwLock<CacheState>>>,
}

impl<S: MaterializationStore> CachedMaterializationStore<S> {
    /// Wrap `inner` with a cache configured by `config`.
    pub fn new(inner: S, config: CacheConfig) -> Self {
        let cache = if config.enabled {
            let size = NonZeroUsize::new(config.max_entries).unwrap_or(NonZeroUsize::MIN);
            Some(Arc::new(RwLock::new(CacheState {
                entries: LruCache::new(size),
                generation: 0,
            })))
        } else {
            None
        };
        Self { inner, cache }
    }

    /// The wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Get cache statistics.
    ///
    /// Returns `None` if caching is disabled.
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| {
            let cache = cache.read();
            CacheStats {
                len: cache.entries.len(),
                cap: cache.entries.cap().get(),
            }
        })
    }

    /// Clear the cache.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            cache.write().entries.clear();
        }
    }
}

#[async_trait]
impl<S: MaterializationStore + 'static> MaterializationStore for CachedMaterializationStore<S> {
    async fn load_materialized_assignments_for_unit(
        &self,
        unit: &str,
        rule_materializations: &HashMap<String, String>,
    ) -> Result<HashMap<String, MaterializationInfo>, StoreError> {
        let cache = match &self.cache {
            Some(cache) => cache,
            None => {
                return self
                    .inner
                    .load_materialized_assignments_for_unit(unit, rule_materializations)
                    .await
            }
        };

        let mut found = HashMap::new();
        let mut misses = HashMap::new();
        let generation = {
            let cache = cache.read();
            for (rule, materialization) in rule_materializations {
                match cache.entries.peek(&(unit.to_string(), materialization.clone())) {
                    Some(info) => {
                        found.insert(materialization.clone(), info.clone());
                    }
                    None => {
                        misses.insert(rule.clone(), materialization.clone());
                    }
                }
            }
            cache.generation
        };
        if misses.is_empty() {
            return Ok(found);
        }

        let loaded = self
            .inner
            .load_materialized_assignments_for_unit(unit, &misses)
            .await?;
        let mut cache = cache.write();
        let current = cache.generation == generation;
        if !current {
            tracing::debug!(unit = %unit, "store raced a load, not caching its result");
        }
        for materialization in misses.values() {
            let info = loaded.get(materialization).cloned().unwrap_or_default();
            if current {
                cache.entries.put((unit.to_string(), materialization.clone()), info.clone());
            }
            found.insert(materialization.clone(), info);
        }
        Ok(found)
    }

    async fn store_assignment(
        &self,
        unit: &str,
        assignments: HashMap<String, MaterializationInfo>,
    ) -> Result<(), StoreError> {
        let keys: Vec<CacheKey> = assignments
            .keys()
            .map(|m| (unit.to_string(), m.clone()))
            .collect();
        let result = self.inner.store_assignment(unit, assignments).await;
        if let Some(cache) = &self.cache {
            let mut cache = cache.write();
            cache.generation += 1;
            for key in &keys {
                cache.entries.pop(key);
            }
        }
        result
    }
}
