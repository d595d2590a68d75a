//! Keyed caches with construction on miss.
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::hash::Hash;
use std::sync::Arc;

/// A map from keys to shared values, where each value is built at most once.
///
/// Lookups of existing entries only take a read lock. A missing entry is first inserted as an
/// empty slot under the write lock; the value itself is then built outside the map lock, so
/// builds of different keys run concurrently while concurrent requests for the same key wait
/// for a single build. A failed build leaves the slot empty, and a later request retries it.
#[derive(Debug)]
pub struct KeyedCache<K, V> {
    entries: RwLock<FxHashMap<K, Arc<OnceCell<Arc<V>>>>>,
}

impl<K, V> Default for KeyedCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(FxHashMap::default()),
        }
    }
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Arc<OnceCell<Arc<V>>> {
        if let Some(slot) = self.entries.read().get(key) {
            return Arc::clone(slot);
        }
        let mut entries = self.entries.write();
        Arc::clone(entries.entry(key.clone()).or_default())
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        self.entries
            .read()
            .get(key)
            .and_then(|slot| slot.get().cloned())
    }

    pub fn get_or_try_insert_with<E>(&self, key: &K, build: impl FnOnce() -> Result<V, E>) -> Result<Arc<V>, E> {
        let slot = self.slot(key);
        slot.get_or_try_init(|| build().map(Arc::new)).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Number of built entries.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|slot| slot.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry whose key satisfies `predicate`.
    ///
    /// Values already handed out stay alive as long as they are referenced.
    pub fn remove_where(&self, mut predicate: impl FnMut(&K) -> bool) {
        self.entries.write().retain(|key, _| !predicate(key));
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
