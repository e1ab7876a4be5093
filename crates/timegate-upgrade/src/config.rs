use std::path::PathBuf;

use timegate_core::error::TimegateError;
use timegate_core::types::Address;
use timegate_core::unit::UnitKind;

pub const RPC_URL_VAR: &str = "TIMEGATE_RPC_URL";
pub const AUTHORITY_ADDRESS_VAR: &str = "TIMEGATE_AUTHORITY_ADDRESS";
pub const SIGNER_KEYFILE_VAR: &str = "TIMEGATE_SIGNER_KEYFILE";
pub const EXPLORER_API_URL_VAR: &str = "TIMEGATE_EXPLORER_API_URL";
pub const EXPLORER_API_KEY_VAR: &str = "TIMEGATE_EXPLORER_API_KEY";

/// Read a required parameter. Missing or blank is a configuration error;
/// there are no defaults.
pub fn ensure_env_var(name: &str) -> Result<String, TimegateError> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Ok(_) => Err(TimegateError::Configuration(format!("{name} is set but empty"))),
        Err(_) => Err(TimegateError::Configuration(format!("{name} is not set"))),
    }
}

/// Read a required parameter holding a `0x` address.
pub fn env_address(name: &str) -> Result<Address, TimegateError> {
    let raw = ensure_env_var(name)?;
    Address::from_hex(&raw)
        .map_err(|e| TimegateError::Configuration(format!("{name}='{raw}' is not an address: {e}")))
}

/// Parameters every upgrade workflow needs.
#[derive(Debug, Clone)]
pub struct UpgradeConfig {
    pub rpc_url: String,
    pub authority: Address,
    pub signer_keyfile: PathBuf,
}

impl UpgradeConfig {
    pub fn from_env() -> Result<Self, TimegateError> {
        Ok(Self {
            rpc_url: ensure_env_var(RPC_URL_VAR)?,
            authority: env_address(AUTHORITY_ADDRESS_VAR)?,
            signer_keyfile: PathBuf::from(ensure_env_var(SIGNER_KEYFILE_VAR)?),
        })
    }

    /// `TIMEGATE_<KIND>_PROXY_ADDRESS`
    pub fn proxy_address(kind: UnitKind) -> Result<Address, TimegateError> {
        env_address(&kind.proxy_env_var())
    }

    /// `TIMEGATE_<KIND>_IMPL_NEW_ADDRESS`
    pub fn new_implementation_address(kind: UnitKind) -> Result<Address, TimegateError> {
        env_address(&kind.new_impl_env_var())
    }
}

/// Explorer endpoint for source verification.
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub api_url: String,
    pub api_key: String,
}

impl ExplorerConfig {
    pub fn from_env() -> Result<Self, TimegateError> {
        Ok(Self {
            api_url: ensure_env_var(EXPLORER_API_URL_VAR)?,
            api_key: ensure_env_var(EXPLORER_API_KEY_VAR)?,
        })
    }
}
