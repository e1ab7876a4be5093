use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TimegateError;
use crate::types::{Address, OperationId, Salt, Timestamp, Value};

// ── Operation ─────────────────────────────────────────────────────────────────

/// A single gated call. Its id is the keccak256 digest of the canonical ABI
/// encoding of all five fields (see `timegate_crypto::operation_id`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub target: Address,
    pub value: Value,
    pub payload: Vec<u8>,
    /// Operation that must be `Executed` first, or `H256::ZERO` for none.
    pub predecessor: OperationId,
    pub salt: Salt,
}

impl Operation {
    pub fn has_predecessor(&self) -> bool {
        !self.predecessor.is_zero()
    }
}

// ── Stored status ─────────────────────────────────────────────────────────────

/// What the authority persists for a known id. `Ready` is never stored: it
/// is derived from `Scheduled` and the clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Scheduled,
    Executed { executed_at: Timestamp },
    Cancelled { cancelled_at: Timestamp },
}

/// The authority's bookkeeping entry for one operation id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: OperationId,
    pub operation: Operation,
    pub proposer: Address,
    pub scheduled_at: Timestamp,
    pub ready_at: Timestamp,
    pub status: OperationStatus,
}

impl OperationRecord {
    pub fn state(&self, now: Timestamp) -> OperationState {
        match self.status {
            OperationStatus::Scheduled if now >= self.ready_at => OperationState::Ready,
            OperationStatus::Scheduled => OperationState::Scheduled,
            OperationStatus::Executed { .. } => OperationState::Executed,
            OperationStatus::Cancelled { .. } => OperationState::Cancelled,
        }
    }
}

// ── Observable state ──────────────────────────────────────────────────────────

/// Lifecycle: `Unscheduled → Scheduled → Ready → Executed`, plus terminal
/// `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationState {
    Unscheduled,
    Scheduled,
    Ready,
    Executed,
    Cancelled,
}

impl OperationState {
    pub fn of(record: Option<&OperationRecord>, now: Timestamp) -> Self {
        record.map_or(OperationState::Unscheduled, |r| r.state(now))
    }

    /// Scheduled or Ready: still eligible to execute or cancel.
    pub fn is_pending(&self) -> bool {
        matches!(self, OperationState::Scheduled | OperationState::Ready)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Unscheduled => "unscheduled",
            OperationState::Scheduled => "scheduled",
            OperationState::Ready => "ready",
            OperationState::Executed => "executed",
            OperationState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = TimegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unscheduled" => Ok(OperationState::Unscheduled),
            "scheduled" => Ok(OperationState::Scheduled),
            "ready" => Ok(OperationState::Ready),
            "executed" => Ok(OperationState::Executed),
            "cancelled" => Ok(OperationState::Cancelled),
            other => Err(TimegateError::Serialization(format!("unknown operation state: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::H256;

    fn record(status: OperationStatus) -> OperationRecord {
        OperationRecord {
            id: H256([1u8; 32]),
            operation: Operation {
                target: Address([2u8; 20]),
                value: 0,
                payload: vec![],
                predecessor: H256::ZERO,
                salt: H256::ZERO,
            },
            proposer: Address::ZERO,
            scheduled_at: 1_000,
            ready_at: 1_120,
            status,
        }
    }

    #[test]
    fn ready_is_derived_from_clock() {
        let r = record(OperationStatus::Scheduled);
        assert_eq!(r.state(1_000), OperationState::Scheduled);
        assert_eq!(r.state(1_119), OperationState::Scheduled);
        assert_eq!(r.state(1_120), OperationState::Ready);
        assert_eq!(OperationState::of(None, 5_000), OperationState::Unscheduled);
    }

    #[test]
    fn terminal_states_ignore_clock() {
        let done = record(OperationStatus::Executed { executed_at: 1_200 });
        assert_eq!(done.state(0), OperationState::Executed);
        let gone = record(OperationStatus::Cancelled { cancelled_at: 1_050 });
        assert_eq!(gone.state(9_999), OperationState::Cancelled);
        assert!(!OperationState::Cancelled.is_pending());
    }

    #[test]
    fn state_string_round_trip() {
        for s in ["unscheduled", "scheduled", "ready", "executed", "cancelled"] {
            assert_eq!(s.parse::<OperationState>().unwrap().as_str(), s);
        }
        assert!("pending".parse::<OperationState>().is_err());
    }
}
