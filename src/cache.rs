//! Path-keyed LRU caches with prefix invalidation.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;

use crate::path;

/// Strict LRU cache keyed by normalized paths.
///
/// `get` promotes, `put` evicts the least-recently used entry past
/// capacity, and `remove_by_prefix` drops a whole subtree. Every
/// operation is one short critical section.
pub struct PathCache<V> {
    inner: Mutex<LruCache<String, V>>,
}

impl<V: Clone> PathCache<V> {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("capacity is at least one");
        Self { inner: Mutex::new(LruCache::new(capacity)) }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.inner.lock().expect("cache mutex poisoned").get(key).cloned()
    }

    pub fn put(&self, key: String, value: V) {
        self.inner.lock().expect("cache mutex poisoned").put(key, value);
    }

    pub fn remove(&self, key: &str) {
        self.inner.lock().expect("cache mutex poisoned").pop(key);
    }

    /// Removes the key and every key inside its subtree.
    pub fn remove_by_prefix(&self, prefix: &str) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let doomed: Vec<String> = inner
            .iter()
            .filter(|(key, _)| path::is_within(key, prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            inner.pop(&key);
        }
    }

    pub fn clear(&self) {
        self.inner.lock().expect("cache mutex poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
