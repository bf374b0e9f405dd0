//! The state machine facade

use bytes::Bytes;
use parking_lot::RwLock;
use replikv_storage::{KvStore, ReadTransaction, StorageNamespace, WriteTransaction};
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::apply::{already_applied, stage_entries, validate_batch};
use crate::config::FsmConfig;
use crate::error::{Error, FsmResult};
use crate::list::list_children;
use crate::metadata::MetadataTracker;
use crate::txn;
use crate::types::{ApplyResponse, LatestState, LogEntry, TxnEntry};
use crate::{CONFIG_NAMESPACE, DATA_NAMESPACE};

/// Replicated key-value state machine over a [`KvStore`]
///
/// `apply_batch` must be driven by a single apply pipeline. Reads, direct
/// writes and transactions may be issued concurrently from any thread; all
/// writes are serialized by the store's single-writer transaction.
pub struct Fsm<S: KvStore> {
    store: S,
    data: StorageNamespace,
    metadata: MetadataTracker,
    config: FsmConfig,
    closed: RwLock<bool>,
}

impl<S: KvStore> Fsm<S> {
    /// Open the state machine over `store`, loading the persisted position
    pub fn new(store: S, config: FsmConfig) -> FsmResult<Self> {
        let metadata = {
            let txn = store.begin_read()?;
            MetadataTracker::load(&txn, StorageNamespace::new(CONFIG_NAMESPACE))?
        };

        let latest = metadata.get();
        info!(
            "Opened FSM at index {}, term {}",
            latest.index, latest.term
        );

        Ok(Self {
            store,
            data: StorageNamespace::new(DATA_NAMESPACE),
            metadata,
            config,
            closed: RwLock::new(false),
        })
    }

    /// Apply a batch of committed entries.
    ///
    /// Returns one response per entry in input order. Data and position for
    /// the whole batch are committed together; if that fails every response
    /// carries the error and nothing from the batch is visible.
    ///
    /// With validation on, leading entries at or below the applied index are
    /// answered with success and not applied again. A batch that would leave a
    /// gap after the applied index is rejected.
    pub fn apply_batch(&self, entries: &[LogEntry]) -> Vec<ApplyResponse> {
        if entries.is_empty() {
            return Vec::new();
        }

        // Held until the batch is committed so `close` cannot flush under it
        let closed = self.closed.read();
        if *closed {
            return fail_all(entries, Error::Closed);
        }

        let mut skipped = 0;
        if self.config.validate_batches {
            let latest = self.metadata.get();
            match validate_batch(entries).and_then(|()| already_applied(&latest, entries)) {
                Ok(applied) => skipped = applied,
                Err(e) => {
                    error!("Rejecting batch of {} entries: {}", entries.len(), e);
                    return fail_all(entries, e);
                }
            }
        }

        let (stale, entries) = entries.split_at(skipped);
        let mut responses: Vec<ApplyResponse> = stale
            .iter()
            .map(|entry| ApplyResponse::success(entry.index))
            .collect();

        let Some(last) = entries.last() else {
            debug!("Skipped {} already applied entries", stale.len());
            return responses;
        };
        if !stale.is_empty() {
            debug!(
                "Skipping {} already applied entries before index {}",
                stale.len(),
                entries[0].index
            );
        }

        let start = Instant::now();

        let mut txn = match self.store.begin_write() {
            Ok(txn) => txn,
            Err(e) => {
                error!("Failed to begin apply transaction: {}", e);
                return fail_all_with(stale, entries, e.into());
            }
        };

        let staged = match stage_entries(&mut txn, &self.data, &self.metadata, entries) {
            Ok(staged) => staged,
            Err(e) => {
                txn.rollback();
                error!(
                    "Failed to apply batch ending at index {}: {}",
                    last.index, e
                );
                return fail_all_with(stale, entries, e);
            }
        };

        if let Err(e) = txn.commit() {
            error!(
                "Failed to commit batch ending at index {}: {}",
                last.index, e
            );
            return fail_all_with(stale, entries, e.into());
        }

        self.metadata
            .publish(last.index, last.term, staged.configuration);

        let elapsed = start.elapsed();
        if elapsed >= self.config.slow_apply_threshold {
            warn!(
                "Slow apply: {} entries ending at index {} took {:?}",
                entries.len(),
                last.index,
                elapsed
            );
        } else {
            debug!(
                "Applied {} entries up to index {} in {:?}",
                entries.len(),
                last.index,
                elapsed
            );
        }

        responses.extend(staged.responses);
        responses
    }

    /// Apply a single committed entry
    pub fn apply(&self, entry: LogEntry) -> ApplyResponse {
        let index = entry.index;
        self.apply_batch(std::slice::from_ref(&entry))
            .pop()
            .unwrap_or_else(|| {
                ApplyResponse::failure(index, Error::Storage("no response".to_string()))
            })
    }

    /// Last applied position
    pub fn latest_state(&self) -> LatestState {
        self.metadata.get()
    }

    /// Read a single key
    pub fn get(&self, key: &str) -> FsmResult<Option<Bytes>> {
        self.view()?.get(key)
    }

    /// Immediate children of `prefix`, directories suffixed with `/`
    pub fn list(&self, prefix: &str) -> FsmResult<Vec<String>> {
        self.view()?.list(prefix)
    }

    /// A consistent read-only view of the current state
    pub fn view(&self) -> FsmResult<FsmView<'_, S>> {
        self.ensure_open()?;
        Ok(FsmView {
            txn: self.store.begin_read()?,
            data: &self.data,
        })
    }

    /// Write a key outside the log
    pub fn put(&self, key: &str, value: impl Into<Bytes>) -> FsmResult<()> {
        self.write(|write_txn, data| Ok(write_txn.put(data, key.as_bytes(), value.into())?))
    }

    /// Remove a key outside the log
    pub fn delete(&self, key: &str) -> FsmResult<()> {
        self.write(|write_txn, data| Ok(write_txn.delete(data, key.as_bytes())?))
    }

    /// Remove every key starting with `prefix`. Returns how many were removed.
    pub fn delete_prefix(&self, prefix: &str) -> FsmResult<usize> {
        self.write(|write_txn, data| {
            let keys = write_txn.keys_with_prefix(data, prefix.as_bytes())?;
            for key in &keys {
                write_txn.delete(data, key)?;
            }
            Ok(keys.len())
        })
    }

    /// Run `ops` atomically.
    ///
    /// Gets are filled in place with the values as they were before any put or
    /// delete in `ops` took effect. Either every write lands or none does.
    pub fn transaction(&self, ops: &mut [TxnEntry]) -> FsmResult<()> {
        self.write(|write_txn, data| txn::execute(write_txn, data, ops))
    }

    /// Flush the store and refuse any further operations.
    ///
    /// Waits for in-flight writes. If the flush fails the FSM stays open and
    /// `close` can be retried.
    pub fn close(&self) -> FsmResult<()> {
        let mut closed = self.closed.write();
        if *closed {
            return Ok(());
        }
        self.store.shutdown()?;
        *closed = true;
        info!("Closed FSM at index {}", self.metadata.get().index);
        Ok(())
    }

    /// Whether `close` has completed
    pub fn is_closed(&self) -> bool {
        *self.closed.read()
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Backend statistics
    pub fn stats(&self) -> FsmResult<String> {
        Ok(self.store.stats()?)
    }

    fn ensure_open(&self) -> FsmResult<()> {
        if self.is_closed() {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    fn write<'a, T>(
        &'a self,
        f: impl FnOnce(&mut S::WriteTxn<'a>, &StorageNamespace) -> FsmResult<T>,
    ) -> FsmResult<T> {
        let closed = self.closed.read();
        if *closed {
            return Err(Error::Closed);
        }
        let mut txn = self.store.begin_write()?;
        match f(&mut txn, &self.data) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                txn.rollback();
                Err(e)
            }
        }
    }
}

impl<S: KvStore> std::fmt::Debug for Fsm<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fsm")
            .field("store", &self.store)
            .field("latest", &self.metadata.get())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A read-only snapshot of the FSM's data
pub struct FsmView<'a, S: KvStore + 'a> {
    txn: S::ReadTxn<'a>,
    data: &'a StorageNamespace,
}

impl<'a, S: KvStore + 'a> FsmView<'a, S> {
    /// Read a single key
    pub fn get(&self, key: &str) -> FsmResult<Option<Bytes>> {
        Ok(self.txn.get(self.data, key.as_bytes())?)
    }

    /// Immediate children of `prefix`, directories suffixed with `/`
    pub fn list(&self, prefix: &str) -> FsmResult<Vec<String>> {
        let keys = self.txn.keys_with_prefix(self.data, prefix.as_bytes())?;
        Ok(list_children(prefix, keys))
    }

    /// Every key starting with `prefix`, in ascending order
    pub fn keys_with_prefix(&self, prefix: &str) -> FsmResult<Vec<String>> {
        Ok(self
            .txn
            .keys_with_prefix(self.data, prefix.as_bytes())?
            .iter()
            .map(|key| String::from_utf8_lossy(key).into_owned())
            .collect())
    }
}

fn fail_all(entries: &[LogEntry], error: Error) -> Vec<ApplyResponse> {
    entries
        .iter()
        .map(|entry| ApplyResponse::failure(entry.index, error.clone()))
        .collect()
}

/// Failure for every entry of `entries`, after success for the skipped ones
fn fail_all_with(stale: &[LogEntry], entries: &[LogEntry], error: Error) -> Vec<ApplyResponse> {
    stale
        .iter()
        .map(|entry| ApplyResponse::success(entry.index))
        .chain(fail_all(entries, error))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FsmConfigBuilder;
    use crate::types::{EntryPayload, LogData, LogOperation};
    use replikv_storage_memory::MemoryStorage;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn put_entry(index: u64, key: &str) -> LogEntry {
        LogEntry::command(index, 1, &LogData::new(vec![LogOperation::put(key, "v")])).unwrap()
    }

    #[traced_test]
    #[test]
    fn test_slow_apply_is_logged() {
        let config = FsmConfigBuilder::new()
            .slow_apply_threshold(Duration::ZERO)
            .build();
        let fsm = Fsm::new(MemoryStorage::new(), config).unwrap();

        let responses = fsm.apply_batch(&[put_entry(1, "a"), put_entry(2, "b")]);
        assert!(responses.iter().all(ApplyResponse::is_success));
        assert!(logs_contain("Slow apply: 2 entries ending at index 2"));
    }

    #[traced_test]
    #[test]
    fn test_decode_failure_is_logged() {
        let fsm = Fsm::new(MemoryStorage::new(), FsmConfig::default()).unwrap();

        let bad = LogEntry::new(1, 1, EntryPayload::Command(Bytes::from_static(b"\xff")));
        let response = fsm.apply(bad);
        assert!(matches!(response.error, Some(Error::Decode(_))));
        assert!(logs_contain("Failed to decode command at index 1"));
    }

    #[traced_test]
    #[test]
    fn test_rejected_batch_is_logged() {
        let fsm = Fsm::new(MemoryStorage::new(), FsmConfig::default()).unwrap();

        let responses = fsm.apply_batch(&[put_entry(1, "a"), put_entry(3, "b")]);
        assert!(
            responses
                .iter()
                .all(|r| matches!(r.error, Some(Error::InvalidBatch(_))))
        );
        assert!(logs_contain("Rejecting batch of 2 entries"));
    }

    #[traced_test]
    #[test]
    fn test_commit_failure_is_logged() {
        let storage = MemoryStorage::new();
        let fsm = Fsm::new(storage.clone(), FsmConfig::default()).unwrap();

        storage.fail_next_commit();
        let response = fsm.apply(put_entry(1, "a"));
        assert!(matches!(response.error, Some(Error::Storage(_))));
        assert!(logs_contain("Failed to commit batch ending at index 1"));
    }

    #[test]
    fn test_empty_batch() {
        let fsm = Fsm::new(MemoryStorage::new(), FsmConfig::default()).unwrap();
        assert!(fsm.apply_batch(&[]).is_empty());
        assert_eq!(fsm.latest_state(), LatestState::default());
    }
}
