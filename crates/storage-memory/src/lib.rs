//! In-memory transactional key-value storage implementation
//!
//! Committed state is an immutable map behind an `Arc`. A read transaction
//! holds its own clone of that `Arc`, so it keeps seeing the state as of its
//! start no matter how many commits land afterwards. A write transaction holds
//! the writer mutex and publishes a fresh map on commit. Namespaces are shared
//! between versions, so a commit only copies the namespaces it writes to.

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard, RwLock};
use replikv_storage::{
    KvPair, KvStore, ReadTransaction, StorageError, StorageNamespace, StorageResult,
    WriteOverlay, WriteTransaction,
};
use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tracing::{debug, warn};

/// Committed key space: namespace -> (key -> value)
type Tables = HashMap<StorageNamespace, Arc<BTreeMap<Bytes, Bytes>>>;

/// In-memory storage implementation using BTreeMap for ordering
#[derive(Clone, Default)]
pub struct MemoryStorage {
    /// Latest committed tables
    committed: Arc<RwLock<Arc<Tables>>>,
    /// Single-writer gate
    writer: Arc<Mutex<()>>,
    /// When set, the next commit fails and is rolled back
    fail_next_commit: Arc<AtomicBool>,
    /// When set, the next shutdown fails
    fail_next_shutdown: Arc<AtomicBool>,
    /// Number of successful commits
    commits: Arc<AtomicU64>,
}

impl MemoryStorage {
    /// Create a new in-memory storage instance
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail as if the backend had hit a disk error.
    ///
    /// The failing transaction is rolled back; the flag clears itself.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make the next shutdown fail; the flag clears itself
    pub fn fail_next_shutdown(&self) {
        self.fail_next_shutdown.store(true, Ordering::SeqCst);
    }

    /// Number of write transactions committed so far
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Arc<Tables> {
        self.committed.read().clone()
    }
}

impl KvStore for MemoryStorage {
    type ReadTxn<'a>
        = MemoryReadTxn
    where
        Self: 'a;
    type WriteTxn<'a>
        = MemoryWriteTxn<'a>
    where
        Self: 'a;

    fn begin_read(&self) -> StorageResult<Self::ReadTxn<'_>> {
        Ok(MemoryReadTxn {
            tables: self.snapshot(),
        })
    }

    fn begin_write(&self) -> StorageResult<Self::WriteTxn<'_>> {
        let guard = self.writer.lock();
        // Taken under the writer lock, so it stays the latest state until commit
        let base = self.snapshot();

        Ok(MemoryWriteTxn {
            storage: self,
            _guard: guard,
            base,
            overlay: WriteOverlay::new(),
        })
    }

    fn shutdown(&self) -> StorageResult<()> {
        // Wait for any in-flight writer
        let _guard = self.writer.lock();

        if self.fail_next_shutdown.swap(false, Ordering::SeqCst) {
            warn!("Injected shutdown failure");
            return Err(StorageError::Backend(
                "injected shutdown failure".to_string(),
            ));
        }

        debug!("Memory storage shut down after {} commits", self.commit_count());
        Ok(())
    }

    fn stats(&self) -> StorageResult<String> {
        let tables = self.snapshot();
        let keys: usize = tables.values().map(|table| table.len()).sum();
        Ok(format!(
            "namespaces: {}, keys: {}, commits: {}",
            tables.len(),
            keys,
            self.commit_count()
        ))
    }
}

/// Read-only view of the tables as of `begin_read`
pub struct MemoryReadTxn {
    tables: Arc<Tables>,
}

impl ReadTransaction for MemoryReadTxn {
    fn get(&self, namespace: &StorageNamespace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(lookup(&self.tables, namespace, key))
    }

    fn scan_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<KvPair>> {
        Ok(scan(&self.tables, namespace, prefix))
    }
}

/// Exclusive write transaction holding the writer lock
pub struct MemoryWriteTxn<'a> {
    storage: &'a MemoryStorage,
    _guard: MutexGuard<'a, ()>,
    base: Arc<Tables>,
    overlay: WriteOverlay,
}

impl ReadTransaction for MemoryWriteTxn<'_> {
    fn get(&self, namespace: &StorageNamespace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        match self.overlay.get(namespace, key) {
            Some(staged) => Ok(staged),
            None => Ok(lookup(&self.base, namespace, key)),
        }
    }

    fn scan_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<KvPair>> {
        let base = scan(&self.base, namespace, prefix);
        Ok(self.overlay.merge_prefix(namespace, prefix, base))
    }
}

impl WriteTransaction for MemoryWriteTxn<'_> {
    fn put(
        &mut self,
        namespace: &StorageNamespace,
        key: &[u8],
        value: Bytes,
    ) -> StorageResult<()> {
        self.overlay.put(namespace, key, value);
        Ok(())
    }

    fn delete(&mut self, namespace: &StorageNamespace, key: &[u8]) -> StorageResult<()> {
        self.overlay.delete(namespace, key);
        Ok(())
    }

    fn commit(self) -> StorageResult<()> {
        let Self {
            storage,
            _guard,
            base,
            overlay,
        } = self;

        if storage.fail_next_commit.swap(false, Ordering::SeqCst) {
            warn!(
                "Injected commit failure, discarding {} staged writes",
                overlay.len()
            );
            return Err(StorageError::CommitFailed(
                "injected commit failure".to_string(),
            ));
        }

        if overlay.is_empty() {
            return Ok(());
        }

        let writes = overlay.len();
        let mut tables = Tables::clone(&base);
        drop(base);

        for (namespace, key, value) in overlay.into_writes() {
            let table = Arc::make_mut(tables.entry(namespace).or_default());
            match value {
                Some(value) => {
                    table.insert(key, value);
                }
                None => {
                    table.remove(&key);
                }
            }
        }

        *storage.committed.write() = Arc::new(tables);
        storage.commits.fetch_add(1, Ordering::SeqCst);
        debug!("Committed {} writes to memory storage", writes);

        Ok(())
    }

    fn rollback(self) {
        debug!(
            "Rolling back memory transaction with {} staged writes",
            self.overlay.len()
        );
    }
}

fn lookup(tables: &Tables, namespace: &StorageNamespace, key: &[u8]) -> Option<Bytes> {
    tables
        .get(namespace)
        .and_then(|table| table.get(key))
        .cloned()
}

fn scan(tables: &Tables, namespace: &StorageNamespace, prefix: &[u8]) -> Vec<KvPair> {
    let Some(table) = tables.get(namespace) else {
        return Vec::new();
    };

    table
        .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(|(key, _)| key.starts_with(prefix))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("committed", &"<locked>")
            .field("commits", &self.commit_count())
            .finish()
    }
}
