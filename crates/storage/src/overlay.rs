//! Buffered writes of an open write transaction
//!
//! Backends stage puts and deletes here until commit. Reads issued through
//! the write transaction consult the overlay first so that a transaction
//! observes its own writes, then fall back to the backend's snapshot.

use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::{KvPair, StorageNamespace};

/// A staged write: `Some` for a put, `None` for a delete
pub type StagedValue = Option<Bytes>;

/// Pending writes grouped by namespace, ordered by key
#[derive(Debug, Default)]
pub struct WriteOverlay {
    namespaces: HashMap<StorageNamespace, BTreeMap<Bytes, StagedValue>>,
}

impl WriteOverlay {
    /// Create an empty overlay
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a put
    pub fn put(&mut self, namespace: &StorageNamespace, key: &[u8], value: Bytes) {
        self.table_mut(namespace)
            .insert(Bytes::copy_from_slice(key), Some(value));
    }

    /// Stage a delete
    pub fn delete(&mut self, namespace: &StorageNamespace, key: &[u8]) {
        self.table_mut(namespace)
            .insert(Bytes::copy_from_slice(key), None);
    }

    /// Look up a staged write.
    ///
    /// `None` means the overlay has no opinion and the caller must read the
    /// base snapshot. `Some(None)` means the key was deleted in this
    /// transaction.
    pub fn get(&self, namespace: &StorageNamespace, key: &[u8]) -> Option<StagedValue> {
        self.namespaces
            .get(namespace)
            .and_then(|table| table.get(key))
            .cloned()
    }

    /// Merge staged writes under `prefix` into `base`, a prefix scan of the
    /// snapshot in ascending key order. The result is also in ascending order.
    pub fn merge_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
        base: Vec<KvPair>,
    ) -> Vec<KvPair> {
        let Some(table) = self.namespaces.get(namespace) else {
            return base;
        };

        let mut merged: BTreeMap<Bytes, Bytes> = base.into_iter().collect();
        let staged = table
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix));

        for (key, value) in staged {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        merged.into_iter().collect()
    }

    /// Number of staged writes across all namespaces
    pub fn len(&self) -> usize {
        self.namespaces.values().map(BTreeMap::len).sum()
    }

    /// Whether nothing has been staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Consume the overlay, yielding every staged write
    pub fn into_writes(self) -> impl Iterator<Item = (StorageNamespace, Bytes, StagedValue)> {
        self.namespaces.into_iter().flat_map(|(namespace, table)| {
            table
                .into_iter()
                .map(move |(key, value)| (namespace.clone(), key, value))
        })
    }

    fn table_mut(&mut self, namespace: &StorageNamespace) -> &mut BTreeMap<Bytes, StagedValue> {
        self.namespaces.entry(namespace.clone()).or_default()
    }
}
