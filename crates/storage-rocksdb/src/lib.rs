//! RocksDB transactional key-value storage implementation
//!
//! Each storage namespace maps to a column family. Read transactions are
//! RocksDB snapshots. Write transactions hold the writer mutex, buffer writes
//! in an overlay over a snapshot, and commit them as a single `WriteBatch`.
//! The batch is atomic across column families, so data and metadata written in
//! one transaction always land together.

pub mod config;

pub use config::{CompressionType, RocksDbConfig};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use replikv_storage::{
    KvPair, KvStore, ReadTransaction, StorageError, StorageNamespace, StorageResult,
    WriteOverlay, WriteTransaction,
};
use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction,
    IteratorMode, MultiThreaded, Options, SnapshotWithThreadMode, WriteBatch, WriteOptions,
};
use std::sync::Arc;
use tracing::{debug, error, info};

type Db = DBWithThreadMode<MultiThreaded>;

/// RocksDB key-value storage
#[derive(Clone)]
pub struct RocksDbStorage {
    /// The RocksDB instance
    db: Arc<Db>,
    /// Single-writer gate
    writer: Arc<Mutex<()>>,
    /// Configuration used to open the database
    config: RocksDbConfig,
}

impl RocksDbStorage {
    /// Open (or create) a RocksDB storage instance at `path` with defaults
    pub fn new(path: impl Into<std::path::PathBuf>) -> StorageResult<Self> {
        Self::open(RocksDbConfig::new(path))
    }

    /// Open (or create) a RocksDB storage instance
    pub fn open(config: RocksDbConfig) -> StorageResult<Self> {
        let path_str = config
            .path
            .to_str()
            .ok_or_else(|| StorageError::Backend("Invalid path".to_string()))?;

        let mut db_opts = Self::cf_options(&config);
        db_opts.create_if_missing(config.create_if_missing);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);

        // List existing column families if database exists
        let cf_names = match Db::list_cf(&db_opts, path_str) {
            Ok(existing) if !existing.is_empty() => existing,
            // Database doesn't exist yet, start with default
            _ => vec!["default".to_string()],
        };

        let cfs: Vec<ColumnFamilyDescriptor> = cf_names
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Self::cf_options(&config)))
            .collect();

        let db = Db::open_cf_descriptors(&db_opts, path_str, cfs)
            .map_err(|e| StorageError::Backend(format!("Failed to open RocksDB: {e}")))?;

        info!("Opened RocksDB storage at {}", config.path.display());

        Ok(Self {
            db: Arc::new(db),
            writer: Arc::new(Mutex::new(())),
            config,
        })
    }

    /// Configuration this instance was opened with
    pub fn config(&self) -> &RocksDbConfig {
        &self.config
    }

    fn cf_options(config: &RocksDbConfig) -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(config::to_rocksdb_compression(config.compression));
        opts.set_write_buffer_size(config.write_buffer_size);

        if config.bloom_filter_bits > 0 {
            let mut block_opts = BlockBasedOptions::default();
            block_opts.set_bloom_filter(f64::from(config.bloom_filter_bits), false);
            opts.set_block_based_table_factory(&block_opts);
        }

        opts
    }

    /// Get the column family for a namespace if it has ever been written
    fn cf(&self, namespace: &StorageNamespace) -> Option<Arc<BoundColumnFamily<'_>>> {
        self.db.cf_handle(namespace.as_str())
    }

    /// Get or create a column family for a namespace
    fn get_or_create_cf(
        &self,
        namespace: &StorageNamespace,
    ) -> StorageResult<Arc<BoundColumnFamily<'_>>> {
        let cf_name = namespace.as_str();

        // Try to get existing column family
        if let Some(cf) = self.db.cf_handle(cf_name) {
            return Ok(cf);
        }

        debug!("Creating column family {}", cf_name);
        self.db
            .create_cf(cf_name, &Self::cf_options(&self.config))
            .map_err(|e| StorageError::Backend(format!("Failed to create column family: {e}")))?;

        self.db.cf_handle(cf_name).ok_or_else(|| {
            StorageError::Backend("Failed to get column family after creation".to_string())
        })
    }

    fn snapshot_get(
        &self,
        snapshot: &SnapshotWithThreadMode<'_, Db>,
        namespace: &StorageNamespace,
        key: &[u8],
    ) -> StorageResult<Option<Bytes>> {
        let Some(cf) = self.cf(namespace) else {
            return Ok(None);
        };

        snapshot
            .get_cf(&cf, key)
            .map(|value| value.map(Bytes::from))
            .map_err(|e| StorageError::Backend(format!("Failed to read key: {e}")))
    }

    fn snapshot_scan(
        &self,
        snapshot: &SnapshotWithThreadMode<'_, Db>,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<KvPair>> {
        let Some(cf) = self.cf(namespace) else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        let iter = snapshot.iterator_cf(&cf, IteratorMode::From(prefix, Direction::Forward));

        for result in iter {
            let (key, value) =
                result.map_err(|e| StorageError::Backend(format!("Iterator error: {e}")))?;

            if !key.starts_with(prefix) {
                break;
            }

            entries.push((Bytes::from(key.into_vec()), Bytes::from(value.into_vec())));
        }

        Ok(entries)
    }
}

impl KvStore for RocksDbStorage {
    type ReadTxn<'a>
        = RocksDbReadTxn<'a>
    where
        Self: 'a;
    type WriteTxn<'a>
        = RocksDbWriteTxn<'a>
    where
        Self: 'a;

    fn begin_read(&self) -> StorageResult<Self::ReadTxn<'_>> {
        Ok(RocksDbReadTxn {
            storage: self,
            snapshot: self.db.snapshot(),
        })
    }

    fn begin_write(&self) -> StorageResult<Self::WriteTxn<'_>> {
        let guard = self.writer.lock();
        // Taken under the writer lock, so it stays the latest state until commit
        let snapshot = self.db.snapshot();

        Ok(RocksDbWriteTxn {
            storage: self,
            _guard: guard,
            snapshot,
            overlay: WriteOverlay::new(),
        })
    }

    fn shutdown(&self) -> StorageResult<()> {
        info!(
            "Shutting down RocksDB storage, current Arc strong count: {}",
            Arc::strong_count(&self.db)
        );

        // Wait for any in-flight writer before flushing
        let _guard = self.writer.lock();

        self.db
            .flush_wal(true)
            .map_err(|e| StorageError::Backend(format!("Failed to flush WAL: {e}")))?;
        self.db
            .flush()
            .map_err(|e| StorageError::Backend(format!("Failed to flush database: {e}")))?;

        info!("RocksDB storage shutdown complete");
        Ok(())
    }

    fn stats(&self) -> StorageResult<String> {
        let stats = self
            .db
            .property_value("rocksdb.stats")
            .map_err(|e| StorageError::Backend(format!("Failed to read stats: {e}")))?;

        Ok(stats.unwrap_or_else(|| "No statistics available".to_string()))
    }
}

/// Snapshot-backed read transaction
pub struct RocksDbReadTxn<'a> {
    storage: &'a RocksDbStorage,
    snapshot: SnapshotWithThreadMode<'a, Db>,
}

impl ReadTransaction for RocksDbReadTxn<'_> {
    fn get(&self, namespace: &StorageNamespace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        self.storage.snapshot_get(&self.snapshot, namespace, key)
    }

    fn scan_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<KvPair>> {
        self.storage.snapshot_scan(&self.snapshot, namespace, prefix)
    }
}

/// Exclusive write transaction; writes are buffered until commit
pub struct RocksDbWriteTxn<'a> {
    storage: &'a RocksDbStorage,
    _guard: MutexGuard<'a, ()>,
    snapshot: SnapshotWithThreadMode<'a, Db>,
    overlay: WriteOverlay,
}

impl ReadTransaction for RocksDbWriteTxn<'_> {
    fn get(&self, namespace: &StorageNamespace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        match self.overlay.get(namespace, key) {
            Some(staged) => Ok(staged),
            None => self.storage.snapshot_get(&self.snapshot, namespace, key),
        }
    }

    fn scan_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<KvPair>> {
        let base = self
            .storage
            .snapshot_scan(&self.snapshot, namespace, prefix)?;
        Ok(self.overlay.merge_prefix(namespace, prefix, base))
    }
}

impl WriteTransaction for RocksDbWriteTxn<'_> {
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
            snapshot,
            overlay,
        } = self;
        drop(snapshot);

        if overlay.is_empty() {
            return Ok(());
        }

        let writes = overlay.len();
        let mut batch = WriteBatch::default();

        for (namespace, key, value) in overlay.into_writes() {
            let cf = storage.get_or_create_cf(&namespace)?;
            match value {
                Some(value) => batch.put_cf(&cf, &key, &value),
                None => batch.delete_cf(&cf, &key),
            }
        }

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(storage.config.sync_writes);

        storage.db.write_opt(batch, &write_opts).map_err(|e| {
            error!("Failed to commit write batch of {} writes: {}", writes, e);
            StorageError::CommitFailed(format!("Failed to write batch: {e}"))
        })?;

        debug!("Committed {} writes to RocksDB", writes);
        Ok(())
    }

    fn rollback(self) {
        debug!(
            "Rolling back RocksDB transaction with {} staged writes",
            self.overlay.len()
        );
    }
}

impl std::fmt::Debug for RocksDbStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RocksDbStorage({})", self.config.path.display())
    }
}

impl Drop for RocksDbStorage {
    fn drop(&mut self) {
        // Arc::strong_count is 1 when this is the last reference being dropped
        if Arc::strong_count(&self.db) == 1 {
            debug!("RocksDbStorage being dropped - this is the last reference");
        }
    }
}
