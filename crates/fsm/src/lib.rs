//! Replicated key-value state machine
//!
//! The FSM applies committed log entries, delivered in order by an external
//! consensus engine, to a transactional key-value store. Every batch is
//! committed together with the latest applied position (index, term and
//! cluster configuration), so stored data and stored position never diverge.
//!
//! Besides the apply path the FSM answers point reads, hierarchical prefix
//! listings and atomic read/write transactions against the same store.
#![warn(missing_docs)]
#![warn(clippy::all)]

mod apply;
pub mod config;
pub mod configuration;
pub mod error;
mod fsm;
pub mod list;
mod metadata;
mod txn;
pub mod types;

pub use config::{FsmConfig, FsmConfigBuilder};
pub use configuration::{ClusterConfiguration, Server, Suffrage};
pub use error::{Error, FsmResult};
pub use fsm::{Fsm, FsmView};
pub use types::{
    ApplyResponse, EntryPayload, LatestState, LogData, LogEntry, LogOperation, OpType,
    TxnEntry, TxnOperation,
};

/// Namespace holding user keys
pub const DATA_NAMESPACE: &str = "data";

/// Namespace reserved for applied-position metadata
pub const CONFIG_NAMESPACE: &str = "config";
