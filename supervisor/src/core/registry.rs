//! Keyed registry of live recordings
//!
//! The registry is the single owner of pipeline handles and ad-hoc entries.
//! It does no locking of its own: owners wrap it in a `tokio::sync::Mutex`
//! and must complete each check-then-insert / check-then-remove decision
//! inside one critical section, never across an `.await` that yields.

use std::collections::HashMap;
use std::hash::Hash;

#[derive(Debug)]
pub struct Registry<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> Default for Registry<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K, V> Registry<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Insert `value` unless `key` is already registered.
    ///
    /// A rejected value is handed back to the caller untouched.
    pub fn put(&mut self, key: K, value: V) -> Result<(), V> {
        if self.entries.contains_key(&key) {
            return Err(value);
        }
        self.entries.insert(key, value);
        Ok(())
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key)
    }

    /// Remove `key` only if its current value satisfies `predicate`
    pub fn remove_if<F>(&mut self, key: &K, predicate: F) -> Option<V>
    where
        F: FnOnce(&V) -> bool,
    {
        match self.entries.get(key) {
            Some(value) if predicate(value) => self.entries.remove(key),
            _ => None,
        }
    }

    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
