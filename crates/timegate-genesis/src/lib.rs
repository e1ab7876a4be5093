//! timegate-genesis
//!
//! Creates the controlling authority on an empty ledger. This is the only
//! place the authority config is written outside a scheduled operation:
//! afterwards delay and role changes must go through the timelock.

pub mod params;

pub use params::AuthorityParams;

use timegate_core::abi::keccak256;
use timegate_core::authority::AuthorityConfig;
use timegate_core::error::TimegateError;
use timegate_core::types::{Address, Timestamp};
use timegate_state::AuthorityDb;
use tracing::info;

/// Write the authority described by `params` into `db`.
///
/// Proposers are also granted the canceller role. Fails with a
/// configuration error if an authority already exists or there is no
/// proposer.
pub fn apply_genesis(
    db: &AuthorityDb,
    params: &AuthorityParams,
    now: Timestamp,
) -> Result<AuthorityConfig, TimegateError> {
    if db.get_authority()?.is_some() {
        return Err(TimegateError::Configuration(
            "authority already exists on this ledger".into(),
        ));
    }

    if params.proposers.is_empty() {
        return Err(TimegateError::Configuration("at least one proposer is required".into()));
    }

    let address = authority_address(params)?;
    let mut admins = vec![address];
    admins.extend(params.admin);

    let config = AuthorityConfig {
        address,
        min_delay: params.min_delay,
        proposers: params.proposers.clone(),
        executors: params.executors.clone(),
        cancellers: params.proposers.clone(),
        admins,
        cancel_policy: params.cancel_policy,
        predecessor_policy: params.predecessor_policy,
        created_at: now,
    };
    db.put_authority(&config)?;
    db.flush()?;

    info!(
        authority = %address,
        min_delay = config.min_delay,
        proposers = config.proposers.len(),
        executors = config.executors.len(),
        "genesis: authority created"
    );
    Ok(config)
}

/// Deterministic authority address: last 20 bytes of
/// keccak256("timegate-authority" || bincode(params)).
pub fn authority_address(params: &AuthorityParams) -> Result<Address, TimegateError> {
    let mut input = b"timegate-authority".to_vec();
    input.extend(
        bincode::serialize(params).map_err(|e| TimegateError::Serialization(e.to_string()))?,
    );
    let hash = keccak256(&input);
    let mut out = [0u8; 20];
    out.copy_from_slice(&hash[12..]);
    Ok(Address(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use timegate_core::abi::encode_update_delay;
    use timegate_core::authority::Role;
    use timegate_core::call::CallBody;
    use timegate_core::operation::Operation;
    use timegate_core::types::H256;
    use timegate_crypto::KeyPair;
    use timegate_state::AuthorityEngine;

    fn temp_db(name: &str) -> AuthorityDb {
        let dir = std::env::temp_dir().join(format!("timegate_genesis_test_{}", name));
        let _ = std::fs::remove_dir_all(&dir);
        AuthorityDb::open(&dir).unwrap()
    }

    #[test]
    fn proposers_can_cancel() {
        let db = temp_db("roles");
        let deployer = KeyPair::generate();
        let params = AuthorityParams::new(120, &[deployer.address], &[deployer.address]);
        let config = apply_genesis(&db, &params, 1_000).unwrap();

        assert!(config.has_role(Role::Proposer, &deployer.address));
        assert!(config.has_role(Role::Executor, &deployer.address));
        assert!(config.has_role(Role::Canceller, &deployer.address));
        assert!(config.has_role(Role::Admin, &config.address));
        assert!(!config.has_role(Role::Admin, &deployer.address));
        assert_eq!(db.get_authority().unwrap(), Some(config));
    }

    #[test]
    fn admin_account_cannot_bypass_the_timelock() {
        let db = Arc::new(temp_db("admin_bypass"));
        let admin = KeyPair::generate();
        let proposer = KeyPair::generate();
        let mut params = AuthorityParams::new(120, &[proposer.address], &[proposer.address]);
        params.admin = Some(admin.address);
        let config = apply_genesis(&db, &params, 1_000).unwrap();
        assert!(config.has_role(Role::Admin, &admin.address));

        let engine = AuthorityEngine::new(db);
        let op = Operation {
            target: config.address,
            value: 0,
            payload: encode_update_delay(0),
            predecessor: H256::ZERO,
            salt: H256::ZERO,
        };
        let call = admin.sign_call(0, CallBody::Schedule { operation: op, delay: 120 }).unwrap();
        assert!(matches!(
            engine.apply(&call, 1_000),
            Err(TimegateError::Unauthorized { role: Role::Proposer, .. })
        ));
        assert_eq!(engine.min_delay().unwrap(), 120);
    }

    #[test]
    fn genesis_runs_once() {
        let db = temp_db("twice");
        let params = AuthorityParams::new(120, &[Address([1; 20])], &[Address::ZERO]);
        apply_genesis(&db, &params, 0).unwrap();
        assert!(matches!(
            apply_genesis(&db, &params, 1),
            Err(TimegateError::Configuration(_))
        ));
    }

    #[test]
    fn params_from_json_apply_defaults() {
        let json = r#"{
            "proposers": ["0x0101010101010101010101010101010101010101"],
            "executors": ["0x0000000000000000000000000000000000000000"]
        }"#;
        let params = AuthorityParams::from_json(json).unwrap();
        assert_eq!(params.min_delay, 120);

        let db = temp_db("json");
        let config = apply_genesis(&db, &params, 0).unwrap();
        // Zero-address executor opens execution.
        assert!(config.has_role(Role::Executor, &Address([7; 20])));
    }

    #[test]
    fn bad_address_is_a_configuration_error() {
        let json = r#"{ "proposers": ["0xnope"], "executors": [] }"#;
        assert!(matches!(
            AuthorityParams::from_json(json),
            Err(TimegateError::Configuration(_))
        ));
    }

    #[test]
    fn empty_proposer_list_rejected() {
        let db = temp_db("no_proposer");
        let params = AuthorityParams::new(120, &[], &[Address::ZERO]);
        assert!(matches!(
            apply_genesis(&db, &params, 0),
            Err(TimegateError::Configuration(_))
        ));
    }

    #[test]
    fn authority_address_is_deterministic() {
        let a = AuthorityParams::new(120, &[Address([1; 20])], &[Address([2; 20])]);
        let b = AuthorityParams::new(121, &[Address([1; 20])], &[Address([2; 20])]);
        assert_eq!(authority_address(&a).unwrap(), authority_address(&a).unwrap());
        assert_ne!(authority_address(&a).unwrap(), authority_address(&b).unwrap());
    }
}
