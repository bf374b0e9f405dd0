//! Staging of committed log entries
//!
//! A batch is staged entry by entry into one write transaction together with
//! the position updates for it. The caller owns the transaction and decides
//! whether it commits.

use replikv_storage::{StorageNamespace, WriteTransaction};
use tracing::{debug, warn};

use crate::configuration::ClusterConfiguration;
use crate::error::{Error, FsmResult};
use crate::metadata::MetadataTracker;
use crate::types::{
    ApplyResponse, EntryPayload, LatestState, LogData, LogEntry, LogOperation, OpType,
};

/// Result of staging a batch that has not been committed yet
#[derive(Debug)]
pub(crate) struct StagedBatch {
    /// One response per entry, in order
    pub responses: Vec<ApplyResponse>,
    /// Last configuration staged by the batch
    pub configuration: Option<ClusterConfiguration>,
}

/// Check that indices in `entries` are strictly increasing with no gaps
pub(crate) fn validate_batch(entries: &[LogEntry]) -> FsmResult<()> {
    for pair in entries.windows(2) {
        let (prev, next) = (&pair[0], &pair[1]);
        if prev.index.checked_add(1) != Some(next.index) {
            return Err(Error::InvalidBatch(format!(
                "entry {} follows entry {}",
                next.index, prev.index
            )));
        }
        if next.term < prev.term {
            return Err(Error::InvalidBatch(format!(
                "term went backwards from {} to {} at entry {}",
                prev.term, next.term, next.index
            )));
        }
    }
    Ok(())
}

/// Number of leading entries at or below the applied position.
///
/// Those entries were already applied and must be skipped. The first entry
/// after them has to continue the applied log directly. An empty store accepts
/// any starting index.
pub(crate) fn already_applied(latest: &LatestState, entries: &[LogEntry]) -> FsmResult<usize> {
    if latest.index == 0 {
        return Ok(0);
    }

    let applied = entries
        .iter()
        .take_while(|entry| entry.index <= latest.index)
        .count();

    if let Some(next) = entries.get(applied) {
        if latest.index.checked_add(1) != Some(next.index) {
            return Err(Error::InvalidBatch(format!(
                "entry {} does not follow applied index {}",
                next.index, latest.index
            )));
        }
        if next.term < latest.term {
            return Err(Error::InvalidBatch(format!(
                "entry {} has term {} below applied term {}",
                next.index, next.term, latest.term
            )));
        }
    }

    Ok(applied)
}

/// Stage every entry of `entries` into `txn`.
///
/// A payload that fails to decode is reported on its own response and does
/// not stop the batch; its position still counts as applied. A storage error
/// aborts staging and is returned, leaving `txn` to be rolled back.
pub(crate) fn stage_entries<W: WriteTransaction>(
    txn: &mut W,
    data: &StorageNamespace,
    metadata: &MetadataTracker,
    entries: &[LogEntry],
) -> FsmResult<StagedBatch> {
    let mut responses = Vec::with_capacity(entries.len());
    let mut configuration = None;

    for entry in entries {
        debug!("Applying log entry at index {}", entry.index);

        match &entry.payload {
            EntryPayload::ConfigurationChange(payload) => {
                match ClusterConfiguration::decode(payload) {
                    Ok(mut decoded) => {
                        decoded.index = entry.index;
                        metadata.set(txn, entry.index, entry.term, Some(&decoded))?;
                        configuration = Some(decoded);
                        responses.push(ApplyResponse::success(entry.index));
                    }
                    Err(e) => {
                        warn!("Failed to decode configuration at index {}: {}", entry.index, e);
                        responses.push(ApplyResponse::failure(entry.index, e));
                    }
                }
            }
            EntryPayload::Command(payload) => match LogData::decode(payload) {
                Ok(command) => {
                    apply_operations(txn, data, &command.operations)?;
                    responses.push(ApplyResponse::success(entry.index));
                }
                Err(e) => {
                    warn!("Failed to decode command at index {}: {}", entry.index, e);
                    responses.push(ApplyResponse::failure(entry.index, e));
                }
            },
        }
    }

    if let Some(last) = entries.last() {
        metadata.set(txn, last.index, last.term, None)?;
    }

    Ok(StagedBatch {
        responses,
        configuration,
    })
}

fn apply_operations<W: WriteTransaction>(
    txn: &mut W,
    data: &StorageNamespace,
    operations: &[LogOperation],
) -> FsmResult<()> {
    for op in operations {
        match op.op_type {
            OpType::Put => txn.put(data, op.key.as_bytes(), op.value.clone())?,
            OpType::Delete => txn.delete(data, op.key.as_bytes())?,
        }
    }
    Ok(())
}
