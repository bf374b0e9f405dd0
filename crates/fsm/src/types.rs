//! Log entry, operation and result types
//!
//! Command payloads are CBOR-encoded [`LogData`]. The consensus engine
//! replicates them verbatim, so the encoding must be identical on every node.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::configuration::ClusterConfiguration;
use crate::error::{Error, FsmResult};

/// A committed log entry handed over by the consensus engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position of the entry in the log
    pub index: u64,
    /// Term in which the entry was created
    pub term: u64,
    /// What the entry carries
    pub payload: EntryPayload,
}

/// Payload of a log entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// Encoded [`LogData`]
    Command(Bytes),
    /// Encoded [`ClusterConfiguration`]
    ConfigurationChange(Bytes),
}

impl LogEntry {
    /// Create an entry from an already encoded payload
    pub fn new(index: u64, term: u64, payload: EntryPayload) -> Self {
        Self {
            index,
            term,
            payload,
        }
    }

    /// Create a command entry carrying `data`
    pub fn command(index: u64, term: u64, data: &LogData) -> FsmResult<Self> {
        Ok(Self::new(index, term, EntryPayload::Command(data.encode()?)))
    }

    /// Create a configuration change entry carrying `configuration`
    pub fn configuration(
        index: u64,
        term: u64,
        configuration: &ClusterConfiguration,
    ) -> FsmResult<Self> {
        Ok(Self::new(
            index,
            term,
            EntryPayload::ConfigurationChange(configuration.encode()?),
        ))
    }

    /// Whether this entry changes the cluster configuration
    pub fn is_configuration(&self) -> bool {
        matches!(self.payload, EntryPayload::ConfigurationChange(_))
    }
}

/// Kind of a log operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpType {
    /// Write a value
    Put,
    /// Remove a key
    Delete,
}

/// A single key mutation inside a command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogOperation {
    /// Operation kind
    pub op_type: OpType,
    /// Target key
    pub key: String,
    /// Value for puts; empty for deletes
    #[serde(default)]
    pub value: Bytes,
}

impl LogOperation {
    /// A put of `value` under `key`
    pub fn put(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            op_type: OpType::Put,
            key: key.into(),
            value: value.into(),
        }
    }

    /// A delete of `key`
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            op_type: OpType::Delete,
            key: key.into(),
            value: Bytes::new(),
        }
    }
}

/// The ordered operations carried by one command entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogData {
    /// Operations, applied in order
    pub operations: Vec<LogOperation>,
}

impl LogData {
    /// Create log data from a list of operations
    pub fn new(operations: Vec<LogOperation>) -> Self {
        Self { operations }
    }

    /// Encode as CBOR
    pub fn encode(&self) -> FsmResult<Bytes> {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(self, &mut buf)
            .map_err(|e| Error::Encode(format!("Failed to encode log data: {e}")))?;
        Ok(Bytes::from(buf))
    }

    /// Decode from CBOR
    pub fn decode(bytes: &[u8]) -> FsmResult<Self> {
        ciborium::de::from_reader(bytes)
            .map_err(|e| Error::Decode(format!("Failed to decode log data: {e}")))
    }
}

/// Outcome of applying one log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyResponse {
    /// Index of the entry this response belongs to
    pub index: u64,
    /// Set when the entry was not applied
    pub error: Option<Error>,
}

impl ApplyResponse {
    /// A successful response
    pub fn success(index: u64) -> Self {
        Self { index, error: None }
    }

    /// A failed response
    pub fn failure(index: u64, error: Error) -> Self {
        Self {
            index,
            error: Some(error),
        }
    }

    /// Whether the entry was applied
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// The latest applied position
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatestState {
    /// Index of the last applied entry
    pub index: u64,
    /// Term of the last applied entry
    pub term: u64,
    /// Most recently applied cluster configuration
    pub configuration: Option<ClusterConfiguration>,
}

/// Kind of a transaction entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnOperation {
    /// Read the key; the value is filled in by the transaction
    Get,
    /// Write the entry's value
    Put,
    /// Remove the key
    Delete,
}

/// One slot of a caller-owned transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxnEntry {
    /// Operation kind
    pub operation: TxnOperation,
    /// Target key
    pub key: String,
    /// Input for puts, output for gets
    pub value: Option<Bytes>,
}

impl TxnEntry {
    /// A read of `key`
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            operation: TxnOperation::Get,
            key: key.into(),
            value: None,
        }
    }

    /// A write of `value` under `key`
    pub fn put(key: impl Into<String>, value: impl Into<Bytes>) -> Self {
        Self {
            operation: TxnOperation::Put,
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// A removal of `key`
    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            operation: TxnOperation::Delete,
            key: key.into(),
            value: None,
        }
    }
}
