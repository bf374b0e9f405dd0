//! Error types for the state machine

use replikv_storage::StorageError;
use thiserror::Error;

/// Result type for FSM operations
pub type FsmResult<T> = Result<T, Error>;

/// Main FSM error type
///
/// `Clone` so a single storage failure can be reported on every entry of the
/// batch it aborted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A command or configuration payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// A value could not be encoded
    #[error("Encode error: {0}")]
    Encode(String),

    /// Storage read, write or commit failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Batch indices were not contiguous and strictly increasing
    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    /// The FSM has been closed
    #[error("FSM is closed")]
    Closed,
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Error::Storage(err.to_string())
    }
}
