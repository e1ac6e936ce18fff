use std::hash::Hash;
use std::sync::Arc;

use moka::sync::Cache;

use crate::binding::{BindingContext, ContextKey};
use crate::error::Result;
use crate::libxml2::CompiledSchema;

/// Process-lifetime cache for values that are expensive to build and never change.
///
/// Built on `moka`'s synchronous cache without capacity or TTL, so entries are
/// never evicted. Population goes through `try_get_with`, an atomic
/// compute-if-absent: concurrent first requests for one key share a single
/// factory run, every caller observes the same published value, and a failed
/// factory leaves the key absent so the next call starts clean.
pub struct ProcessCache<K, V> {
    name: &'static str,
    cache: Cache<K, V>,
}

impl<K, V> ProcessCache<K, V>
where
    K: Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str) -> Self {
        let cache = Cache::builder().name(name).build();

        Self { name, cache }
    }

    /// Return the cached value for `key`, building and publishing it on first use.
    pub fn get_or_try_insert_with<F>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.cache
            .try_get_with(key, || {
                tracing::debug!(cache = self.name, "cache miss, building entry");
                factory()
            })
            .map_err(|e| (*e).clone()) // Unwrap the Arc<BinderError> from moka
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.cache.contains_key(key)
    }

    /// Approximate number of entries; moka updates this lazily.
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Binding contexts keyed by their normalized type set
pub type ContextCache = ProcessCache<ContextKey, Arc<BindingContext>>;

/// Compiled schemas keyed by resource path
pub type SchemaCache = ProcessCache<String, CompiledSchema>;
