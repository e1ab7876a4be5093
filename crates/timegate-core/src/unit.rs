use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::abi;
use crate::error::TimegateError;
use crate::types::{Address, Timestamp, H256};

// ── UnitKind ──────────────────────────────────────────────────────────────────

/// The closed set of upgradeable unit kinds this deployment manages.
///
/// Each kind fixes its artifact name, the environment prefix its addresses
/// are configured under, and how an upgrade call is encoded for it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    /// Deposit ledger for user funds.
    Deposit,
    /// Vault pooling deposits under a strategy.
    Vault,
}

impl UnitKind {
    pub const ALL: [UnitKind; 2] = [UnitKind::Deposit, UnitKind::Vault];

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitKind::Deposit => "deposit",
            UnitKind::Vault => "vault",
        }
    }

    /// Contract name expected in the logic artifact.
    pub fn contract_name(&self) -> &'static str {
        match self {
            UnitKind::Deposit => "DepositUnit",
            UnitKind::Vault => "VaultUnit",
        }
    }

    fn env_prefix(&self) -> &'static str {
        match self {
            UnitKind::Deposit => "DEPOSIT",
            UnitKind::Vault => "VAULT",
        }
    }

    /// Environment variable holding this kind's proxy address.
    pub fn proxy_env_var(&self) -> String {
        format!("TIMEGATE_{}_PROXY_ADDRESS", self.env_prefix())
    }

    /// Environment variable holding the prepared implementation address.
    pub fn new_impl_env_var(&self) -> String {
        format!("TIMEGATE_{}_IMPL_NEW_ADDRESS", self.env_prefix())
    }

    /// Call data that switches a proxy of this kind to `new_implementation`
    /// with no follow-up initialization call.
    pub fn encode_upgrade(&self, new_implementation: &Address) -> Vec<u8> {
        match self {
            // UUPS: the implementation itself carries the upgrade entry point.
            UnitKind::Deposit | UnitKind::Vault => {
                abi::encode_upgrade_to_and_call(new_implementation, &[])
            }
        }
    }
}

impl fmt::Display for UnitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = TimegateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UnitKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| TimegateError::Configuration(format!("unknown unit kind: {s}")))
    }
}

// ── Storage layout ────────────────────────────────────────────────────────────

/// One persistent storage variable of a logic unit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSlot {
    pub label: String,
    pub slot: u64,
    #[serde(default)]
    pub offset: u8,
    #[serde(rename = "type")]
    pub type_label: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLayout(pub Vec<StorageSlot>);

impl StorageLayout {
    pub fn slots(&self) -> &[StorageSlot] {
        &self.0
    }
}

// ── Logic artifact ────────────────────────────────────────────────────────────

/// Build output describing a new logic unit (read from JSON).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicArtifact {
    pub contract_name: String,
    pub kind: UnitKind,
    /// Value the unit's version marker reports once it is live.
    pub version: u64,
    /// `0x`-prefixed creation bytecode.
    pub bytecode: String,
    pub storage_layout: StorageLayout,
    #[serde(default)]
    pub compiler_version: String,
    /// Flattened source submitted to the verification service.
    #[serde(default)]
    pub source: String,
}

impl LogicArtifact {
    pub fn code(&self) -> Result<Vec<u8>, TimegateError> {
        let s = self.bytecode.trim();
        hex::decode(s.strip_prefix("0x").unwrap_or(s))
            .map_err(|e| TimegateError::InvalidArtifact(format!("bytecode is not hex: {e}")))
    }
}

// ── Units on the ledger ───────────────────────────────────────────────────────

/// An immutable, deployed logic unit. Never mutated, never removed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationUnit {
    pub address: Address,
    pub kind: UnitKind,
    pub version: u64,
    pub code_hash: H256,
    pub layout: StorageLayout,
    pub deployer: Address,
    pub deployed_at: Timestamp,
}

/// A proxy: stable address and storage, swappable implementation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedUnit {
    pub address: Address,
    pub kind: UnitKind,
    pub implementation: Address,
    /// Version marker of the current implementation.
    pub version: u64,
    /// Only this account may switch the implementation.
    pub upgrade_admin: Address,
    pub deployed_at: Timestamp,
    pub upgraded_at: Option<Timestamp>,
}
