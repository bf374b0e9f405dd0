//! Transactional key-value storage traits for the replikv state machine
//!
//! This crate defines the contract every storage backend provides: an ordered,
//! namespaced key space with single-writer read-write transactions and
//! snapshot-isolated read-only transactions. Backends live in their own crates.

pub mod adaptor;
pub mod kv;
pub mod overlay;

// Re-export the essential types
pub use adaptor::KvStore;
pub use kv::{
    KvPair, ReadTransaction, StorageError, StorageNamespace, StorageResult, WriteTransaction,
};
pub use overlay::WriteOverlay;
