//! Atomic read/write sets outside the log path

use replikv_storage::{StorageNamespace, WriteTransaction};

use crate::error::FsmResult;
use crate::types::{TxnEntry, TxnOperation};

/// Run `ops` inside `txn`.
///
/// Every get is served before any write is staged, so gets observe the state
/// as of the start of the transaction no matter where they sit in `ops`.
pub(crate) fn execute<W: WriteTransaction>(
    txn: &mut W,
    namespace: &StorageNamespace,
    ops: &mut [TxnEntry],
) -> FsmResult<()> {
    for op in ops
        .iter_mut()
        .filter(|op| op.operation == TxnOperation::Get)
    {
        op.value = txn.get(namespace, op.key.as_bytes())?;
    }

    for op in ops.iter() {
        match op.operation {
            TxnOperation::Get => {}
            TxnOperation::Put => {
                let value = op.value.clone().unwrap_or_default();
                txn.put(namespace, op.key.as_bytes(), value)?;
            }
            TxnOperation::Delete => txn.delete(namespace, op.key.as_bytes())?,
        }
    }

    Ok(())
}
