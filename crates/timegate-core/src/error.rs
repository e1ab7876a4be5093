use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authority::Role;
use crate::operation::OperationState;
use crate::types::{Address, OperationId, Timestamp};

/// Every failure a timegate component can surface.
///
/// Serializable so the ledger can ship the typed error inside a JSON-RPC
/// error object and the client can rebuild it verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TimegateError {
    // ── Configuration ────────────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Configuration(String),

    // ── Scheduler preconditions ──────────────────────────────────────────────
    #[error("operation {id} is already known to the authority ({state})")]
    AlreadyScheduled { id: OperationId, state: OperationState },

    #[error("delay too short: {delay}s is below the minimum of {min_delay}s")]
    DelayTooShort { delay: u64, min_delay: u64 },

    #[error("predecessor {predecessor} has not been executed")]
    UnmetPredecessor { predecessor: OperationId },

    #[error("operation {id} is not ready (state: {state}, ready at: {ready_at:?})")]
    NotReady { id: OperationId, state: OperationState, ready_at: Option<Timestamp> },

    #[error("operation {id} cannot be cancelled in state {state}")]
    NotCancellable { id: OperationId, state: OperationState },

    #[error("operation not found: {0}")]
    OperationNotFound(OperationId),

    // ── Gated call ───────────────────────────────────────────────────────────
    #[error("gated call of operation {id} reverted: {reason}")]
    CallReverted { id: OperationId, reason: String },

    // ── Upgrade pre-flight ───────────────────────────────────────────────────
    #[error("storage layout incompatible: {}", diagnostics.join("; "))]
    StorageLayoutIncompatible { diagnostics: Vec<String> },

    #[error("unknown deployed unit: {0}")]
    UnknownUnit(Address),

    #[error("unknown implementation unit: {0}")]
    UnknownImplementation(Address),

    #[error("invalid logic artifact: {0}")]
    InvalidArtifact(String),

    // ── Caller authentication ────────────────────────────────────────────────
    #[error("account {account} lacks the {role} role")]
    Unauthorized { account: Address, role: Role },

    #[error("invalid nonce: expected {expected}, got {got}")]
    InvalidNonce { expected: u64, got: u64 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("authority has not been created on this ledger")]
    AuthorityNotInitialized,

    // ── Serialization / storage / transport ──────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("{0}")]
    Other(String),
}

impl TimegateError {
    /// Transport failures are the only class an idempotent read may retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TimegateError::Transport(_))
    }

    /// The operation stays scheduled and may be executed again later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TimegateError::CallReverted { .. })
    }

    /// Stable JSON-RPC error code for this variant.
    pub fn rpc_code(&self) -> i32 {
        match self {
            TimegateError::Configuration(_) => -32001,
            TimegateError::AlreadyScheduled { .. } => -32010,
            TimegateError::DelayTooShort { .. } => -32011,
            TimegateError::UnmetPredecessor { .. } => -32012,
            TimegateError::NotReady { .. } => -32013,
            TimegateError::NotCancellable { .. } => -32014,
            TimegateError::OperationNotFound(_) => -32015,
            TimegateError::CallReverted { .. } => -32020,
            TimegateError::StorageLayoutIncompatible { .. } => -32030,
            TimegateError::UnknownUnit(_) => -32031,
            TimegateError::UnknownImplementation(_) => -32032,
            TimegateError::InvalidArtifact(_) => -32033,
            TimegateError::Unauthorized { .. } => -32040,
            TimegateError::InvalidNonce { .. } => -32041,
            TimegateError::InvalidSignature => -32042,
            TimegateError::AuthorityNotInitialized => -32043,
            TimegateError::Serialization(_) => -32602,
            TimegateError::Storage(_) => -32603,
            TimegateError::Transport(_) => -32050,
            TimegateError::Other(_) => -32099,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::H256;

    #[test]
    fn only_transport_is_retryable() {
        assert!(TimegateError::Transport("reset".into()).is_retryable());
        assert!(!TimegateError::AlreadyScheduled {
            id: H256::ZERO,
            state: OperationState::Scheduled
        }
        .is_retryable());
        assert!(TimegateError::CallReverted { id: H256::ZERO, reason: "x".into() }.is_recoverable());
    }

    #[test]
    fn survives_json_round_trip() {
        let err = TimegateError::NotReady {
            id: H256([3u8; 32]),
            state: OperationState::Scheduled,
            ready_at: Some(1_120),
        };
        let json = serde_json::to_value(&err).unwrap();
        let back: TimegateError = serde_json::from_value(json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn layout_diagnostics_are_joined() {
        let err = TimegateError::StorageLayoutIncompatible {
            diagnostics: vec!["slot 0 renamed".into(), "slot 1 removed".into()],
        };
        assert_eq!(
            err.to_string(),
            "storage layout incompatible: slot 0 renamed; slot 1 removed"
        );
    }
}
