//! Explicit per-id cache owned by the collaborator that needs it.
//!
//! Entries are created on first access and invalidated individually or all
//! at once; there is no implicit shared subscription state.

use std::future::Future;
use std::hash::Hash;

use dashmap::DashMap;
use tracing::trace;

/// Concurrent map of cached values keyed by identifier.
///
/// Values are cloned out on read, so store cheap-to-clone values (or `Arc`s).
#[derive(Debug)]
pub struct CacheManager<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, V>,
}

impl<K, V> Default for CacheManager<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> CacheManager<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached value for `key`.
    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stores `value`, returning the previous value for `key`.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Drops the entry for `key`, returning it.
    pub fn invalidate(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Drops every entry.
    pub fn invalidate_all(&self) {
        trace!(entries = self.entries.len(), "cache cleared");
        self.entries.clear();
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the cached value or loads, stores and returns a new one.
    ///
    /// Concurrent misses for the same key may each run `load`; the last
    /// stored value wins. No lock is held while `load` runs.
    ///
    /// # Errors
    ///
    /// Propagates the loader's error; nothing is cached in that case.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: K, load: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }
        let value = load().await?;
        self.entries.insert(key, value.clone());
        Ok(value)
    }
}
