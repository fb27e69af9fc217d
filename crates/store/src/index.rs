//! Process-wide in-memory datapack index.

use crate::{DatapackKey, DatapackMetadata};
use geochart_layout::Namespace;
use std::collections::HashMap;
use std::sync::RwLock;

/// A cache of every known datapack's metadata, keyed by
/// `(namespace, title)`.
///
/// Populated by a directory scan at startup and mutated synchronously with
/// every create, update, and delete — always *after* the corresponding
/// filesystem write has succeeded, so the index never claims a datapack
/// the filesystem does not have.
///
/// The lock is only ever held for the duration of a map operation, never
/// across an await point.
#[derive(Debug, Default)]
pub struct DatapackIndex {
    entries: RwLock<HashMap<DatapackKey, DatapackMetadata>>,
}

impl DatapackIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry.
    pub fn insert(&self, metadata: DatapackMetadata) {
        self.entries
            .write()
            .expect("datapack index lock poisoned")
            .insert(metadata.key(), metadata);
    }

    /// Removes an entry, returning it if present.
    pub fn remove(&self, key: &DatapackKey) -> Option<DatapackMetadata> {
        self.entries
            .write()
            .expect("datapack index lock poisoned")
            .remove(key)
    }

    /// Removes every entry owned by `namespace`, returning how many were
    /// dropped.
    pub fn remove_namespace(&self, namespace: &Namespace) -> usize {
        let mut entries = self.entries.write().expect("datapack index lock poisoned");
        let before = entries.len();
        entries.retain(|key, _| &key.namespace != namespace);
        before - entries.len()
    }

    /// Looks up an entry by key.
    pub fn get(&self, key: &DatapackKey) -> Option<DatapackMetadata> {
        self.entries
            .read()
            .expect("datapack index lock poisoned")
            .get(key)
            .cloned()
    }

    /// Returns whether an entry exists for `key`.
    pub fn contains(&self, key: &DatapackKey) -> bool {
        self.entries
            .read()
            .expect("datapack index lock poisoned")
            .contains_key(key)
    }

    /// Returns every entry owned by `namespace`, sorted by title.
    pub fn list_namespace(&self, namespace: &Namespace) -> Vec<DatapackMetadata> {
        let mut result: Vec<DatapackMetadata> = self
            .entries
            .read()
            .expect("datapack index lock poisoned")
            .values()
            .filter(|metadata| &metadata.uuid == namespace)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.title.cmp(&b.title));
        result
    }

    /// Number of entries in the index.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .expect("datapack index lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
