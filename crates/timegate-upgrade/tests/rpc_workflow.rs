//! Full upgrade workflow against an in-process JSON-RPC ledger.
//!
//! The server runs on a free loopback port with a manual clock so the
//! timelock delay can be stepped over without sleeping.

use std::net::SocketAddr;
use std::sync::Arc;

use timegate_core::call::CallBody;
use timegate_core::clock::ManualClock;
use timegate_core::error::TimegateError;
use timegate_core::operation::OperationState;
use timegate_core::unit::{LogicArtifact, StorageLayout, StorageSlot, UnitKind};
use timegate_crypto::KeyPair;
use timegate_genesis::{apply_genesis, AuthorityParams};
use timegate_rpc::{RpcServer, RpcServerState};
use timegate_state::{AuthorityDb, AuthorityEngine};
use timegate_upgrade::{Ledger, OperationOptions, Orchestrator, RetryPolicy, RpcLedger};

const START: i64 = 1_700_000_000;

fn vault(version: u64, labels: &[&str]) -> LogicArtifact {
    LogicArtifact {
        contract_name: UnitKind::Vault.contract_name().into(),
        kind: UnitKind::Vault,
        version,
        bytecode: format!("0x60806040{:04x}", version),
        storage_layout: StorageLayout(
            labels
                .iter()
                .enumerate()
                .map(|(i, l)| StorageSlot {
                    label: l.to_string(),
                    slot: i as u64,
                    offset: 0,
                    type_label: "uint256".into(),
                })
                .collect(),
        ),
        compiler_version: "v0.8.24+commit.e11b9ed9".into(),
        source: "contract Vault {}".into(),
    }
}

#[tokio::test]
async fn prepare_wait_execute_over_rpc() {
    let dir = std::env::temp_dir().join("timegate_upgrade_rpc_workflow");
    let _ = std::fs::remove_dir_all(&dir);
    let db = Arc::new(AuthorityDb::open(&dir).unwrap());

    let signer = Arc::new(KeyPair::generate());
    let params = AuthorityParams::new(120, &[signer.address], &[signer.address]);
    let authority = apply_genesis(&db, &params, START).unwrap();

    let clock = ManualClock::new(START);
    let state = Arc::new(RpcServerState {
        engine: Arc::new(AuthorityEngine::new(db)),
        clock: Arc::new(clock.clone()),
    });
    let (addr, handle) = RpcServer::new(state)
        .start("127.0.0.1:0".parse::<SocketAddr>().unwrap())
        .await
        .unwrap();

    let ledger: Arc<dyn Ledger> = Arc::new(RpcLedger::new(&format!("http://{addr}")).unwrap());
    let orchestrator =
        Orchestrator::new(ledger.clone(), signer.clone(), RetryPolicy::immediate(2));
    orchestrator.check_authority(&authority.address).await.unwrap();
    let opts = OperationOptions::default();

    let proxy = orchestrator.deploy(&vault(1, &["owner"])).await.unwrap().pair.proxy;
    assert_eq!(orchestrator.check_version(&proxy).await.unwrap(), 1);

    // Rejected before anything is deployed.
    let bad = orchestrator.prepare(&proxy, &vault(2, &["admin"]), &opts).await;
    assert!(matches!(bad, Err(TimegateError::StorageLayoutIncompatible { .. })));

    let prepared = orchestrator.prepare(&proxy, &vault(2, &["owner", "limit"]), &opts).await.unwrap();
    assert_eq!(prepared.ready_at, START + 120);
    assert_eq!(ledger.operation_state(&prepared.id).await.unwrap(), OperationState::Scheduled);

    // Ledger-side rejections come back typed through the RPC error object.
    let stale = signer.sign_call(0, CallBody::Cancel { id: prepared.id }).unwrap();
    assert!(matches!(ledger.submit(&stale).await, Err(TimegateError::InvalidNonce { .. })));

    let new_impl = prepared.implementation.address;
    let early = orchestrator.execute(UnitKind::Vault, &proxy, &new_impl, &opts).await;
    assert!(matches!(early, Err(TimegateError::NotReady { .. })), "{early:?}");

    clock.set(START + 119);
    assert!(!ledger.is_ready(&prepared.id).await.unwrap());
    clock.set(START + 120);
    assert!(ledger.is_ready(&prepared.id).await.unwrap());

    let report = orchestrator.execute(UnitKind::Vault, &proxy, &new_impl, &opts).await.unwrap();
    assert!(report.confirmed());
    assert_eq!(report.observed_version, 2);
    assert_eq!(ledger.operation_state(&prepared.id).await.unwrap(), OperationState::Executed);

    handle.stop().unwrap();
    let _ = std::fs::remove_dir_all(&dir);
}
