use serde::{Deserialize, Serialize};

use crate::error::TimegateError;
use crate::operation::Operation;
use crate::types::{
    Address, DilithiumPublicKey, DilithiumSignature, Nonce, OperationId, Timestamp,
};
use crate::unit::{LogicArtifact, UnitKind};

/// A state-changing request to the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallBody {
    /// Register `operation` with the authority, ready after `delay` seconds.
    Schedule { operation: Operation, delay: u64 },
    /// Run a ready operation's gated call.
    Execute { operation: Operation },
    /// Withdraw a pending operation.
    Cancel { id: OperationId },
    /// Deploy a logic unit. No initializer is run.
    DeployImplementation { artifact: LogicArtifact },
    /// Deploy a proxy over an existing implementation, upgradeable only
    /// through the authority.
    DeployProxy { kind: UnitKind, implementation: Address },
}

impl CallBody {
    pub fn name(&self) -> &'static str {
        match self {
            CallBody::Schedule { .. } => "schedule",
            CallBody::Execute { .. } => "execute",
            CallBody::Cancel { .. } => "cancel",
            CallBody::DeployImplementation { .. } => "deploy_implementation",
            CallBody::DeployProxy { .. } => "deploy_proxy",
        }
    }
}

/// A call body bound to its caller's key and nonce, plus a Dilithium2
/// signature over `signing_bytes`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCall {
    pub caller: DilithiumPublicKey,
    pub nonce: Nonce,
    pub body: CallBody,
    pub signature: DilithiumSignature,
}

impl SignedCall {
    /// Canonical bytes covered by the signature.
    pub fn signing_bytes(
        caller: &DilithiumPublicKey,
        nonce: Nonce,
        body: &CallBody,
    ) -> Result<Vec<u8>, TimegateError> {
        bincode::serialize(&(caller, nonce, body))
            .map_err(|e| TimegateError::Serialization(e.to_string()))
    }

    pub fn body_bytes(&self) -> Result<Vec<u8>, TimegateError> {
        Self::signing_bytes(&self.caller, self.nonce, &self.body)
    }

    /// Hex of the bincode encoding, the wire form of `timegate_submitCall`.
    pub fn to_hex(&self) -> Result<String, TimegateError> {
        bincode::serialize(self)
            .map(hex::encode)
            .map_err(|e| TimegateError::Serialization(e.to_string()))
    }

    pub fn from_hex(s: &str) -> Result<Self, TimegateError> {
        let bytes = hex::decode(s).map_err(|e| TimegateError::Serialization(e.to_string()))?;
        bincode::deserialize(&bytes).map_err(|e| TimegateError::Serialization(e.to_string()))
    }
}

/// What a committed call did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallOutcome {
    Scheduled { id: OperationId, ready_at: Timestamp },
    Executed { id: OperationId, executed_at: Timestamp },
    Cancelled { id: OperationId, cancelled_at: Timestamp },
    Deployed { address: Address },
}

/// Durable confirmation of a call: returned only after the state change is
/// flushed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub caller: Address,
    pub nonce: Nonce,
    pub outcome: CallOutcome,
    pub committed_at: Timestamp,
}
