//! Namespaced result cache with TTL expiration.

use std::num::NonZeroUsize;
use std::time::Duration;

use dashmap::DashMap;
use lru::LruCache;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub key: String,
    pub value: T,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Time-bounded memoization of search responses.
///
/// Each namespace is an independent LRU map, unbounded unless
/// `max_entries_per_namespace` is set. Expired entries read as absent and are
/// swept from a namespace the next time something is written to it.
pub struct ResultCache<T> {
    namespaces: DashMap<String, LruCache<String, CacheEntry<T>>>,
    max_entries: Option<NonZeroUsize>,
}

impl<T: Clone> ResultCache<T> {
    pub fn new(max_entries_per_namespace: Option<usize>) -> Self {
        Self {
            namespaces: DashMap::new(),
            max_entries: max_entries_per_namespace.and_then(NonZeroUsize::new),
        }
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<T> {
        let mut entries = self.namespaces.get_mut(namespace)?;
        let entry = entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            return None;
        }
        Some(entry.value.clone())
    }

    pub fn set(&self, namespace: &str, key: &str, value: T, ttl: Duration) {
        let mut entries = self
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| match self.max_entries {
                Some(cap) => LruCache::new(cap),
                None => LruCache::unbounded(),
            });

        let now = Instant::now();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        for stale in &expired {
            entries.pop(stale);
        }
        if !expired.is_empty() {
            log::debug!("evicted {} expired entries from {namespace}", expired.len());
        }

        entries.put(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                expires_at: now + ttl,
            },
        );
    }

    pub fn remove(&self, namespace: &str, key: &str) -> Option<T> {
        let mut entries = self.namespaces.get_mut(namespace)?;
        entries.pop(key).map(|entry| entry.value)
    }

    pub fn clear(&self, namespace: &str) {
        self.namespaces.remove(namespace);
    }

    pub fn clear_all(&self) {
        self.namespaces.clear();
    }

    /// Number of stored entries in `namespace`, expired ones included until
    /// the next write sweeps them.
    pub fn len(&self, namespace: &str) -> usize {
        self.namespaces
            .get(namespace)
            .map(|entries| entries.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }
}

impl<T: Clone> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new(None)
    }
}
