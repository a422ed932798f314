//! Caching subsystem.
//!
//! Three cooperating pieces:
//!
//! - `Index` — an internally-locked map used for the three consistent
//!   indices over function-service records (by function key, by pod
//!   address, by function UID). Insertion never overwrites; the
//!   existing value wins.
//!
//! - the pool cache — per-function groups of addressable instances
//!   with concurrency accounting and a FIFO wait-queue for
//!   specialization. Its module docs cover the admission algorithm.
//!
//! - [`service::FunctionServiceCache`] — the public surface tying the
//!   indices and the pool together, plus the serializer task that
//!   single-threads atime updates and scan-style reads.

pub(crate) mod pool;
pub mod service;
pub mod snapshot;

pub use service::{AddOutcome, FunctionServiceCache};
pub use snapshot::DumpConfig;

use std::collections::HashMap;
use std::sync::RwLock;

/// Thread-safe string-keyed map with no-overwrite insertion.
///
/// Entries are cloned on read to avoid holding locks across async
/// boundaries. Atime refreshes go through [`update`](Index::update) so
/// the mutation happens atomically under the write lock.
pub(crate) struct Index<V> {
    entries: RwLock<HashMap<String, V>>,
}

impl<V: Clone> Index<V> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Insert `value` under `key` unless the key is already bound.
    ///
    /// Returns the existing value on conflict, leaving the map
    /// unchanged — the caller decides whether the collision is an
    /// error.
    pub fn insert(&self, key: &str, value: V) -> Option<V> {
        let mut entries = self.entries.write().expect("index lock poisoned");
        if let Some(existing) = entries.get(key) {
            return Some(existing.clone());
        }
        entries.insert(key.to_string(), value);
        None
    }

    /// Look up a value. Clones the entry to release the read lock
    /// immediately.
    pub fn get(&self, key: &str) -> Option<V> {
        self.entries
            .read()
            .expect("index lock poisoned")
            .get(key)
            .cloned()
    }

    /// Apply `f` to the value under `key` while holding the write lock,
    /// returning a clone of the updated value.
    pub fn update<F>(&self, key: &str, f: F) -> Option<V>
    where
        F: FnOnce(&mut V),
    {
        let mut entries = self.entries.write().expect("index lock poisoned");
        let value = entries.get_mut(key)?;
        f(value);
        Some(value.clone())
    }

    /// Remove the value under `key`, returning it if present.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.entries
            .write()
            .expect("index lock poisoned")
            .remove(key)
    }

    /// Clone the full contents.
    pub fn snapshot(&self) -> Vec<(String, V)> {
        self.entries
            .read()
            .expect("index lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl<V: Clone> Default for Index<V> {
    fn default() -> Self {
        Self::new()
    }
}
