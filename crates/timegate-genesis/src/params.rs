use serde::{Deserialize, Serialize};

use timegate_core::authority::{CancelPolicy, PredecessorPolicy};
use timegate_core::constants::DEFAULT_MIN_DELAY_SECS;
use timegate_core::error::TimegateError;
use timegate_core::types::Address;

/// Founding parameters of the controlling authority.
///
/// Read from a JSON file by the node on first start. Accounts are
/// `0x`-prefixed hex addresses; an executor entry of the zero address opens
/// execution to anyone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityParams {
    #[serde(default = "default_min_delay")]
    pub min_delay: u64,
    pub proposers: Vec<Address>,
    pub executors: Vec<Address>,
    /// Optional extra account recorded under the admin role. The role grants
    /// nothing outside the timelock: roles and the delay change only by
    /// executing operations that target the authority itself.
    #[serde(default)]
    pub admin: Option<Address>,
    #[serde(default)]
    pub cancel_policy: CancelPolicy,
    #[serde(default)]
    pub predecessor_policy: PredecessorPolicy,
}

fn default_min_delay() -> u64 {
    DEFAULT_MIN_DELAY_SECS
}

impl AuthorityParams {
    pub fn new(min_delay: u64, proposers: &[Address], executors: &[Address]) -> Self {
        Self {
            min_delay,
            proposers: proposers.to_vec(),
            executors: executors.to_vec(),
            admin: None,
            cancel_policy: CancelPolicy::default(),
            predecessor_policy: PredecessorPolicy::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, TimegateError> {
        serde_json::from_str(json)
            .map_err(|e| TimegateError::Configuration(format!("genesis params: {e}")))
    }
}
