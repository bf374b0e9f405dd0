//! Storage adaptor trait for implementing storage backends
//!
//! A backend hands out read and write transactions over its key space. The
//! single-writer discipline is the backend's responsibility: `begin_write`
//! blocks until any other write transaction has committed or rolled back.

use std::fmt::Debug;

use crate::{ReadTransaction, StorageResult, WriteTransaction};

/// Abstract interface for transactional key-value backends
pub trait KvStore: Debug + Send + Sync + 'static {
    /// Snapshot-isolated read-only transaction
    type ReadTxn<'a>: ReadTransaction
    where
        Self: 'a;

    /// Exclusive read-write transaction
    type WriteTxn<'a>: WriteTransaction
    where
        Self: 'a;

    /// Begin a read-only transaction over the latest committed state
    fn begin_read(&self) -> StorageResult<Self::ReadTxn<'_>>;

    /// Begin the read-write transaction, waiting for any in-flight writer
    fn begin_write(&self) -> StorageResult<Self::WriteTxn<'_>>;

    /// Gracefully shutdown the storage, ensuring all data is persisted
    /// Default implementation does nothing
    fn shutdown(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Get storage statistics (optional operation)
    /// Returns implementation-specific statistics about the storage
    fn stats(&self) -> StorageResult<String> {
        Ok("No statistics available".to_string())
    }
}
