use serde::{Deserialize, Serialize};

use timegate_core::operation::{OperationRecord, OperationState};
use timegate_core::types::{Address, Timestamp};

/// A stored operation together with its state at query time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcOperation {
    pub record: OperationRecord,
    pub state: OperationState,
    /// Seconds until the ready time; zero once reached.
    pub ready_in: i64,
}

impl RpcOperation {
    pub fn new(record: OperationRecord, now: Timestamp) -> Self {
        let state = record.state(now);
        let ready_in = (record.ready_at - now).max(0);
        Self { record, state, ready_in }
    }
}

/// Node identity returned by `timegate_getNodeInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNodeInfo {
    pub version: String,
    pub authority: Address,
    pub now: Timestamp,
    pub operations: usize,
}
