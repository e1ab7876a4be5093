/// ─── Timegate Constants ─────────────────────────────────────────────────────
///
/// Timelocked upgrade governance for proxied deployed units.

// ── Authority defaults ───────────────────────────────────────────────────────

/// Minimum delay (seconds) the authority is created with when genesis
/// params do not override it.
pub const DEFAULT_MIN_DELAY_SECS: u64 = 120;

/// Label hashed into the default salt of upgrade operations.
pub const UPGRADE_SALT_LABEL: &str = "UPGRADE_ROLE";

/// Role labels. The on-ledger role id is keccak256 of the label.
pub const PROPOSER_ROLE_LABEL: &str = "PROPOSER_ROLE";
pub const EXECUTOR_ROLE_LABEL: &str = "EXECUTOR_ROLE";
pub const CANCELLER_ROLE_LABEL: &str = "CANCELLER_ROLE";
pub const ADMIN_ROLE_LABEL: &str = "TIMELOCK_ADMIN_ROLE";

// ── Gated call signatures ────────────────────────────────────────────────────

pub const UPGRADE_TO_AND_CALL_SIG: &str = "upgradeToAndCall(address,bytes)";
pub const UPDATE_DELAY_SIG: &str = "updateDelay(uint256)";
pub const GRANT_ROLE_SIG: &str = "grantRole(bytes32,address)";
pub const REVOKE_ROLE_SIG: &str = "revokeRole(bytes32,address)";

// ── Ledger limits ────────────────────────────────────────────────────────────

/// Maximum bytecode size accepted for a logic artifact (EIP-170 limit).
pub const MAX_CODE_BYTES: usize = 24_576;

/// Maximum payload size of a gated call.
pub const MAX_PAYLOAD_BYTES: usize = 4_096;

// ── Client behaviour ─────────────────────────────────────────────────────────

/// Attempts made for idempotent read calls before giving up.
pub const READ_RETRY_ATTEMPTS: u32 = 3;

/// Base backoff between read retries (milliseconds, doubled per attempt).
pub const READ_RETRY_BACKOFF_MS: u64 = 250;

/// Substring (lower-cased) an explorer returns for an already-verified unit.
pub const ALREADY_VERIFIED_MARKER: &str = "already verified";

/// Per-request timeout of the ledger RPC client (seconds).
pub const RPC_TIMEOUT_SECS: u64 = 30;
