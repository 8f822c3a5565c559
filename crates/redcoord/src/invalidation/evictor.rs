//! The in-process caches that invalidation messages evict from.

use std::hash::Hash;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Removes a key from an in-process cache. Called from subscriber tasks, so
/// implementations must tolerate concurrent readers. Evicting an absent key
/// is a no-op.
pub trait LocalCacheEvictor: Send + Sync {
    fn evict(&self, key: &str);
}

/// Adapts a closure into an evictor.
pub struct EvictFn<F>(pub F);

impl<F> LocalCacheEvictor for EvictFn<F>
where
    F: Fn(&str) + Send + Sync,
{
    fn evict(&self, key: &str) {
        (self.0)(key)
    }
}

impl<V> LocalCacheEvictor for moka::sync::Cache<String, V>
where
    V: Clone + Send + Sync + 'static,
{
    fn evict(&self, key: &str) {
        self.invalidate(key);
    }
}

/// A cached value with its own TTL.
#[derive(Clone, Debug)]
pub struct CachedEntry<V> {
    pub value: V,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl<V> CachedEntry<V> {
    pub fn new(value: V, ttl: Duration) -> Self {
        Self {
            value,
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() > self.ttl
    }
}

/// A concurrent TTL map for per-process caching.
///
/// Expired entries are dropped lazily on lookup.
pub struct LocalCache<K, V> {
    entries: DashMap<K, CachedEntry<V>>,
}

impl<K, V> std::fmt::Debug for LocalCache<K, V>
where
    K: Eq + Hash + std::fmt::Debug,
    V: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalCache")
            .field("entries", &self.entries)
            .finish()
    }
}

impl<K, V> Default for LocalCache<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> LocalCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        self.entries.insert(key, CachedEntry::new(value, ttl));
    }

    pub fn remove<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key).is_some()
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: std::borrow::Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl<V> LocalCacheEvictor for LocalCache<String, V>
where
    V: Clone + Send + Sync,
{
    fn evict(&self, key: &str) {
        self.remove(key);
    }
}

impl<T: LocalCacheEvictor + ?Sized> LocalCacheEvictor for Arc<T> {
    fn evict(&self, key: &str) {
        (**self).evict(key)
    }
}
