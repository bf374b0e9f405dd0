//! Namespaced key-value transaction abstraction
//!
//! Storage is split into namespaces (column families in RocksDB), each an
//! ordered map from byte keys to byte values. All access goes through a
//! transaction:
//!
//! - Read transactions observe a consistent snapshot taken when they begin.
//! - Write transactions are exclusive: a backend admits at most one at a time.
//!   Writes are buffered and become visible atomically on commit, or are
//!   discarded on rollback/drop.

use bytes::Bytes;
use std::fmt::Display;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A key and its value as returned by prefix scans
pub type KvPair = (Bytes, Bytes);

/// Errors that can occur in storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Storage backend error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Commit of a write transaction failed; none of its writes are visible
    #[error("Commit failed: {0}")]
    CommitFailed(String),

    /// Invalid key format
    #[error("Invalid key format: {0}")]
    InvalidKey(String),

    /// Invalid value format
    #[error("Invalid value format: {0}")]
    InvalidValue(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Namespace not found
    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    /// Operation not supported
    #[error("Operation not supported: {0}")]
    NotSupported(String),
}

/// A namespace for organizing data
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageNamespace(String);

impl StorageNamespace {
    /// Create a new storage namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the namespace as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StorageNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read access to a consistent view of the store
pub trait ReadTransaction {
    /// Get the value stored under `key`, if any
    fn get(&self, namespace: &StorageNamespace, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// All entries whose key starts with `prefix`, in ascending key order
    fn scan_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<KvPair>>;

    /// Keys starting with `prefix`, in ascending order
    fn keys_with_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<Bytes>> {
        Ok(self
            .scan_prefix(namespace, prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }
}

/// Exclusive read-write transaction
///
/// Reads through a write transaction observe its own uncommitted writes.
/// Dropping a write transaction without committing rolls it back.
pub trait WriteTransaction: ReadTransaction {
    /// Stage a write of `value` under `key`
    fn put(&mut self, namespace: &StorageNamespace, key: &[u8], value: Bytes)
    -> StorageResult<()>;

    /// Stage removal of `key`; removing an absent key is not an error
    fn delete(&mut self, namespace: &StorageNamespace, key: &[u8]) -> StorageResult<()>;

    /// Atomically and durably apply every staged write
    fn commit(self) -> StorageResult<()>
    where
        Self: Sized;

    /// Discard every staged write
    fn rollback(self)
    where
        Self: Sized;
}

impl<T: ReadTransaction + ?Sized> ReadTransaction for &T {
    fn get(&self, namespace: &StorageNamespace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        (**self).get(namespace, key)
    }

    fn scan_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<KvPair>> {
        (**self).scan_prefix(namespace, prefix)
    }

    fn keys_with_prefix(
        &self,
        namespace: &StorageNamespace,
        prefix: &[u8],
    ) -> StorageResult<Vec<Bytes>> {
        (**self).keys_with_prefix(namespace, prefix)
    }
}
