use serde::{Deserialize, Serialize};
use std::fmt;

use crate::abi::keccak256;
use crate::constants::{
    ADMIN_ROLE_LABEL, CANCELLER_ROLE_LABEL, EXECUTOR_ROLE_LABEL, PROPOSER_ROLE_LABEL,
};
use crate::types::{Address, RoleId, Timestamp, H256};

// ── Role ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// May schedule operations.
    Proposer,
    /// May execute ready operations.
    Executor,
    /// May cancel pending operations.
    Canceller,
    /// Held by the authority itself; grants and revokes the other roles.
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Proposer, Role::Executor, Role::Canceller, Role::Admin];

    pub fn label(&self) -> &'static str {
        match self {
            Role::Proposer => PROPOSER_ROLE_LABEL,
            Role::Executor => EXECUTOR_ROLE_LABEL,
            Role::Canceller => CANCELLER_ROLE_LABEL,
            Role::Admin => ADMIN_ROLE_LABEL,
        }
    }

    /// On-ledger role id: keccak256 of the label.
    pub fn id(&self) -> RoleId {
        H256(keccak256(self.label().as_bytes()))
    }

    pub fn from_id(id: &RoleId) -> Option<Role> {
        Role::ALL.into_iter().find(|r| r.id() == *id)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Policies ──────────────────────────────────────────────────────────────────

/// What happens to an id after its operation is cancelled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelPolicy {
    /// The id stays known forever; scheduling it again fails.
    #[default]
    BurnIds,
    /// The record is dropped; the same id may be scheduled again.
    AllowReuse,
}

/// When a predecessor dependency is checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PredecessorPolicy {
    /// Scheduling requires the predecessor to be executed already.
    #[default]
    RequireExecuted,
    /// Scheduling requires the predecessor to be known and not cancelled;
    /// the executed check happens only at execution.
    RequireKnown,
}

// ── AuthorityConfig ───────────────────────────────────────────────────────────

/// The controlling authority's delay and role table.
///
/// Changed after creation only by executing an operation that targets
/// `address` itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityConfig {
    pub address: Address,
    pub min_delay: u64,
    pub proposers: Vec<Address>,
    pub executors: Vec<Address>,
    pub cancellers: Vec<Address>,
    pub admins: Vec<Address>,
    pub cancel_policy: CancelPolicy,
    pub predecessor_policy: PredecessorPolicy,
    pub created_at: Timestamp,
}

impl AuthorityConfig {
    pub fn members(&self, role: Role) -> &[Address] {
        match role {
            Role::Proposer => &self.proposers,
            Role::Executor => &self.executors,
            Role::Canceller => &self.cancellers,
            Role::Admin => &self.admins,
        }
    }

    fn members_mut(&mut self, role: Role) -> &mut Vec<Address> {
        match role {
            Role::Proposer => &mut self.proposers,
            Role::Executor => &mut self.executors,
            Role::Canceller => &mut self.cancellers,
            Role::Admin => &mut self.admins,
        }
    }

    /// A zero address in the executor set opens execution to everyone.
    pub fn has_role(&self, role: Role, account: &Address) -> bool {
        let members = self.members(role);
        members.contains(account) || (role == Role::Executor && members.contains(&Address::ZERO))
    }

    /// Returns true if the membership changed.
    pub fn grant(&mut self, role: Role, account: Address) -> bool {
        let members = self.members_mut(role);
        if members.contains(&account) {
            return false;
        }
        members.push(account);
        true
    }

    /// Returns true if the membership changed.
    pub fn revoke(&mut self, role: Role, account: &Address) -> bool {
        let members = self.members_mut(role);
        let before = members.len();
        members.retain(|a| a != account);
        members.len() != before
    }
}
