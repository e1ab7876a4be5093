//! Shared fixtures for unit tests: a fresh authority on a temp sled dir,
//! a manual clock and a ledger wrapper that injects transport failures.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use timegate_core::authority::AuthorityConfig;
use timegate_core::call::{Receipt, SignedCall};
use timegate_core::clock::ManualClock;
use timegate_core::error::TimegateError;
use timegate_core::operation::{OperationRecord, OperationState};
use timegate_core::types::{Address, Nonce, OperationId, Timestamp, H256};
use timegate_core::unit::{
    DeployedUnit, ImplementationUnit, LogicArtifact, StorageLayout, StorageSlot, UnitKind,
};
use timegate_crypto::KeyPair;
use timegate_genesis::{apply_genesis, AuthorityParams};
use timegate_state::{AuthorityDb, AuthorityEngine};

use crate::ledger::{Ledger, LocalLedger};
use crate::retry::RetryPolicy;
use crate::scheduler::TimelockScheduler;

pub const NOW: Timestamp = 1_700_000_000;

pub struct Harness {
    pub engine: Arc<AuthorityEngine>,
    pub ledger: Arc<LocalLedger>,
    pub clock: ManualClock,
    pub signer: Arc<KeyPair>,
    pub authority: Address,
}

impl Harness {
    pub fn scheduler(&self) -> TimelockScheduler {
        TimelockScheduler::new(self.ledger.clone(), self.signer.clone())
            .with_retry(RetryPolicy::immediate(3))
    }
}

pub fn harness(name: &str, min_delay: u64) -> Harness {
    harness_with(name, min_delay, |_| {})
}

/// Like [`harness`], with a hook to adjust genesis params first.
pub fn harness_with(
    name: &str,
    min_delay: u64,
    configure: impl FnOnce(&mut AuthorityParams),
) -> Harness {
    let dir = std::env::temp_dir().join(format!("timegate_upgrade_test_{}", name));
    let _ = std::fs::remove_dir_all(&dir);
    let db = Arc::new(AuthorityDb::open(&dir).expect("open temp db"));

    let signer = Arc::new(KeyPair::generate());
    let mut params = AuthorityParams::new(min_delay, &[signer.address], &[signer.address]);
    configure(&mut params);
    let config: AuthorityConfig = apply_genesis(&db, &params, NOW).expect("genesis");

    let clock = ManualClock::new(NOW);
    let engine = Arc::new(AuthorityEngine::new(db));
    let ledger = Arc::new(LocalLedger::new(engine.clone(), Arc::new(clock.clone())));
    Harness { engine, ledger, clock, signer, authority: config.address }
}

pub fn layout(labels: &[&str]) -> StorageLayout {
    StorageLayout(
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
    )
}

pub fn artifact(kind: UnitKind, version: u64, labels: &[&str]) -> LogicArtifact {
    LogicArtifact {
        contract_name: kind.contract_name().into(),
        kind,
        version,
        bytecode: format!("0x6080604052{:04x}", version),
        storage_layout: layout(labels),
        compiler_version: "v0.8.24+commit.e11b9ed9".into(),
        source: format!("contract {} {{}}", kind.contract_name()),
    }
}

// ── FlakyLedger ───────────────────────────────────────────────────────────────

/// Wraps a ledger. Reads can be made to fail with `Transport`; submissions
/// can be applied and then have their reply dropped.
pub struct FlakyLedger {
    inner: Arc<dyn Ledger>,
    read_failures: AtomicU32,
    dropped_replies: AtomicU32,
    submissions: AtomicU32,
}

impl FlakyLedger {
    pub fn new(inner: Arc<dyn Ledger>) -> Self {
        Self {
            inner,
            read_failures: AtomicU32::new(0),
            dropped_replies: AtomicU32::new(0),
            submissions: AtomicU32::new(0),
        }
    }

    pub fn fail_next_reads(&self, n: u32) {
        self.read_failures.store(n, Ordering::SeqCst);
    }

    pub fn drop_next_replies(&self, n: u32) {
        self.dropped_replies.store(n, Ordering::SeqCst);
    }

    pub fn submissions(&self) -> u32 {
        self.submissions.load(Ordering::SeqCst)
    }

    fn take(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn read(&self) -> Result<(), TimegateError> {
        if Self::take(&self.read_failures) {
            Err(TimegateError::Transport("connection reset".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Ledger for FlakyLedger {
    async fn now(&self) -> Result<Timestamp, TimegateError> {
        self.read()?;
        self.inner.now().await
    }

    async fn authority(&self) -> Result<AuthorityConfig, TimegateError> {
        self.read()?;
        self.inner.authority().await
    }

    async fn min_delay(&self) -> Result<u64, TimegateError> {
        self.read()?;
        self.inner.min_delay().await
    }

    async fn operation(&self, id: &OperationId) -> Result<Option<OperationRecord>, TimegateError> {
        self.read()?;
        self.inner.operation(id).await
    }

    async fn operation_state(&self, id: &OperationId) -> Result<OperationState, TimegateError> {
        self.read()?;
        self.inner.operation_state(id).await
    }

    async fn is_ready(&self, id: &OperationId) -> Result<bool, TimegateError> {
        self.read()?;
        self.inner.is_ready(id).await
    }

    async fn nonce(&self, address: &Address) -> Result<Nonce, TimegateError> {
        self.read()?;
        self.inner.nonce(address).await
    }

    async fn unit(&self, address: &Address) -> Result<Option<DeployedUnit>, TimegateError> {
        self.read()?;
        self.inner.unit(address).await
    }

    async fn implementation(
        &self,
        address: &Address,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        self.read()?;
        self.inner.implementation(address).await
    }

    async fn implementation_by_code_hash(
        &self,
        hash: &H256,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        self.read()?;
        self.inner.implementation_by_code_hash(hash).await
    }

    async fn version_of(&self, proxy: &Address) -> Result<u64, TimegateError> {
        self.read()?;
        self.inner.version_of(proxy).await
    }

    async fn submit(&self, call: &SignedCall) -> Result<Receipt, TimegateError> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let receipt = self.inner.submit(call).await?;
        if Self::take(&self.dropped_replies) {
            return Err(TimegateError::Transport("reply lost".into()));
        }
        Ok(receipt)
    }
}
