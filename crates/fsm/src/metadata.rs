//! Latest applied position
//!
//! The position is stored in the reserved config namespace under two keys:
//! `latest_indexes` holds the index and term, `latest_config` the cluster
//! configuration. Updates are only ever staged into a caller's write
//! transaction; the cached copy is replaced after that transaction commits.

use parking_lot::RwLock;
use replikv_storage::{ReadTransaction, StorageNamespace, WriteTransaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::configuration::ClusterConfiguration;
use crate::error::{Error, FsmResult};
use crate::types::LatestState;

const LATEST_INDEXES_KEY: &[u8] = b"latest_indexes";
const LATEST_CONFIG_KEY: &[u8] = b"latest_config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct IndexValue {
    term: u64,
    index: u64,
}

/// Persists and caches the latest applied position
#[derive(Debug)]
pub(crate) struct MetadataTracker {
    namespace: StorageNamespace,
    latest: RwLock<LatestState>,
}

impl MetadataTracker {
    /// Load the persisted position, or start from zero on an empty store
    pub(crate) fn load<R: ReadTransaction>(
        txn: &R,
        namespace: StorageNamespace,
    ) -> FsmResult<Self> {
        let mut latest = LatestState::default();

        if let Some(raw) = txn.get(&namespace, LATEST_INDEXES_KEY)? {
            let value: IndexValue = ciborium::de::from_reader(raw.as_ref())
                .map_err(|e| Error::Decode(format!("Failed to decode latest indexes: {e}")))?;
            latest.index = value.index;
            latest.term = value.term;
        }

        if let Some(raw) = txn.get(&namespace, LATEST_CONFIG_KEY)? {
            latest.configuration = Some(ClusterConfiguration::decode(&raw)?);
        }

        debug!(
            "Loaded latest state: index {}, term {}, configuration present: {}",
            latest.index,
            latest.term,
            latest.configuration.is_some()
        );

        Ok(Self {
            namespace,
            latest: RwLock::new(latest),
        })
    }

    /// Last committed position
    pub(crate) fn get(&self) -> LatestState {
        self.latest.read().clone()
    }

    /// Stage a position update into `txn`. The configuration is only
    /// replaced when one is given.
    pub(crate) fn set<W: WriteTransaction>(
        &self,
        txn: &mut W,
        index: u64,
        term: u64,
        configuration: Option<&ClusterConfiguration>,
    ) -> FsmResult<()> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&IndexValue { term, index }, &mut buf)
            .map_err(|e| Error::Encode(format!("Failed to encode latest indexes: {e}")))?;
        txn.put(&self.namespace, LATEST_INDEXES_KEY, buf.into())?;

        if let Some(configuration) = configuration {
            txn.put(&self.namespace, LATEST_CONFIG_KEY, configuration.encode()?)?;
        }

        Ok(())
    }

    /// Make a committed position visible to readers
    pub(crate) fn publish(
        &self,
        index: u64,
        term: u64,
        configuration: Option<ClusterConfiguration>,
    ) {
        let mut latest = self.latest.write();
        latest.index = index;
        latest.term = term;
        if configuration.is_some() {
            latest.configuration = configuration;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::Server;
    use replikv_storage::KvStore;
    use replikv_storage_memory::MemoryStorage;

    fn namespace() -> StorageNamespace {
        StorageNamespace::new(crate::CONFIG_NAMESPACE)
    }

    fn load(storage: &MemoryStorage) -> MetadataTracker {
        let txn = storage.begin_read().unwrap();
        MetadataTracker::load(&txn, namespace()).unwrap()
    }

    #[test]
    fn test_empty_store_starts_at_zero() {
        let storage = MemoryStorage::new();
        assert_eq!(load(&storage).get(), LatestState::default());
    }

    #[test]
    fn test_set_is_only_visible_after_commit_and_publish() {
        let storage = MemoryStorage::new();
        let tracker = load(&storage);
        let config = ClusterConfiguration::new(vec![Server::voter("a", "127.0.0.1:1")]);

        let mut txn = storage.begin_write().unwrap();
        tracker.set(&mut txn, 7, 2, Some(&config)).unwrap();
        assert_eq!(tracker.get().index, 0);
        txn.commit().unwrap();

        // Cache is untouched until published
        assert_eq!(tracker.get().index, 0);
        tracker.publish(7, 2, Some(config.clone()));
        assert_eq!(tracker.get().index, 7);

        // A fresh load sees the persisted record
        let reloaded = load(&storage);
        assert_eq!(
            reloaded.get(),
            LatestState {
                index: 7,
                term: 2,
                configuration: Some(config),
            }
        );
    }

    #[test]
    fn test_set_without_configuration_keeps_previous() {
        let storage = MemoryStorage::new();
        let tracker = load(&storage);
        let config = ClusterConfiguration::new(vec![Server::voter("a", "127.0.0.1:1")]);

        let mut txn = storage.begin_write().unwrap();
        tracker.set(&mut txn, 1, 1, Some(&config)).unwrap();
        tracker.set(&mut txn, 2, 1, None).unwrap();
        txn.commit().unwrap();
        tracker.publish(2, 1, None);

        let reloaded = load(&storage);
        assert_eq!(reloaded.get().index, 2);
        assert_eq!(reloaded.get().configuration, Some(config));
    }

    #[test]
    fn test_corrupt_record_fails_to_load() {
        let storage = MemoryStorage::new();
        let mut txn = storage.begin_write().unwrap();
        txn.put(&namespace(), LATEST_INDEXES_KEY, "garbage".into())
            .unwrap();
        txn.commit().unwrap();

        let read = storage.begin_read().unwrap();
        assert!(matches!(
            MetadataTracker::load(&read, namespace()),
            Err(Error::Decode(_))
        ));
    }
}
