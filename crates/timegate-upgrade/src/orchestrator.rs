use std::sync::Arc;

use tracing::{info, warn};

use timegate_core::abi::encode_upgrade_to_and_call;
use timegate_core::authority::AuthorityConfig;
use timegate_core::error::TimegateError;
use timegate_core::operation::{Operation, OperationState};
use timegate_core::types::{Address, OperationId, Timestamp};
use timegate_core::unit::{LogicArtifact, UnitKind};
use timegate_crypto::{operation_id, KeyPair};

use crate::layout::LayoutValidator;
use crate::ledger::Ledger;
use crate::manager::{DeployedPair, OperationOptions, PreparedImplementation, ProxyUpgradeManager};
use crate::retry::RetryPolicy;
use crate::scheduler::TimelockScheduler;
use crate::verify::{SourceMetadata, VerificationAdapter, VerificationOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareReport {
    pub proxy: Address,
    pub implementation: PreparedImplementation,
    pub operation: Operation,
    pub id: OperationId,
    /// Earliest ledger time at which `execute` is legal.
    pub ready_at: Timestamp,
    /// The operation was found already pending and was not resubmitted.
    pub already_scheduled: bool,
    /// `None` when no verifier is configured.
    pub verification: Option<VerificationOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteReport {
    pub id: OperationId,
    pub proxy: Address,
    pub executed_at: Timestamp,
    pub expected_version: u64,
    pub observed_version: u64,
}

impl ExecuteReport {
    pub fn confirmed(&self) -> bool {
        self.expected_version == self.observed_version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployReport {
    pub pair: DeployedPair,
    pub verification: Vec<(Address, VerificationOutcome)>,
}

/// Runs the operator workflows. Each step awaits the previous step's
/// committed result; nothing runs concurrently within one workflow.
pub struct Orchestrator {
    ledger: Arc<dyn Ledger>,
    scheduler: TimelockScheduler,
    manager: ProxyUpgradeManager,
    verifier: Option<VerificationAdapter>,
    retry: RetryPolicy,
}

impl Orchestrator {
    pub fn new(ledger: Arc<dyn Ledger>, signer: Arc<KeyPair>, retry: RetryPolicy) -> Self {
        let scheduler =
            TimelockScheduler::new(ledger.clone(), signer.clone()).with_retry(retry.clone());
        let manager = ProxyUpgradeManager::new(ledger.clone(), signer).with_retry(retry.clone());
        Self { ledger, scheduler, manager, verifier: None, retry }
    }

    pub fn with_verifier(mut self, verifier: VerificationAdapter) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_validator(mut self, validator: Box<dyn LayoutValidator>) -> Self {
        self.manager = self.manager.with_validator(validator);
        self
    }

    pub fn scheduler(&self) -> &TimelockScheduler {
        &self.scheduler
    }

    /// Fail unless the ledger's authority is the one the operator configured.
    pub async fn check_authority(&self, expected: &Address) -> Result<AuthorityConfig, TimegateError> {
        let config = self.retry.read("authority", || self.ledger.authority()).await?;
        if config.address != *expected {
            return Err(TimegateError::Configuration(format!(
                "ledger authority is {}, configured {expected}",
                config.address
            )));
        }
        Ok(config)
    }

    /// Prepare an upgrade of `proxy` to `artifact` and schedule it with the
    /// authority's minimum delay.
    ///
    /// Safe to re-run: existing code is reused and an operation already
    /// pending under the recomputed id is reported, not resubmitted.
    pub async fn prepare(
        &self,
        proxy: &Address,
        artifact: &LogicArtifact,
        options: &OperationOptions,
    ) -> Result<PrepareReport, TimegateError> {
        let min_delay = self.scheduler.min_delay().await?;
        let implementation = self.manager.prepare_implementation(proxy, artifact).await?;
        let operation = ProxyUpgradeManager::build_upgrade_operation(
            artifact.kind,
            proxy,
            &implementation.address,
            options,
        );
        let id = operation_id(&operation);

        let summary = self.scheduler.describe(&id).await?;
        let (ready_at, already_scheduled) = match (summary.state, summary.ready_at()) {
            (OperationState::Unscheduled, _) => {
                (self.scheduler.schedule(&operation, min_delay).await?.ready_at, false)
            }
            (OperationState::Scheduled | OperationState::Ready, Some(ready_at)) => {
                info!(op_id = %id, ready_at, "upgrade already scheduled; not resubmitting");
                (ready_at, true)
            }
            (state, _) => return Err(TimegateError::AlreadyScheduled { id, state }),
        };

        let verification = match &self.verifier {
            Some(v) => Some(
                v.verify(&implementation.address, &[], &SourceMetadata::for_artifact(artifact))
                    .await,
            ),
            None => None,
        };

        info!(op_id = %id, %proxy, implementation = %implementation.address, ready_at, "upgrade prepared");
        Ok(PrepareReport {
            proxy: *proxy,
            implementation,
            operation,
            id,
            ready_at,
            already_scheduled,
            verification,
        })
    }

    /// Execute the scheduled upgrade of `proxy` to `new_implementation` and
    /// confirm the version marker read back through the proxy.
    ///
    /// A version mismatch is logged, not treated as failure.
    pub async fn execute(
        &self,
        kind: UnitKind,
        proxy: &Address,
        new_implementation: &Address,
        options: &OperationOptions,
    ) -> Result<ExecuteReport, TimegateError> {
        let expected = self
            .retry
            .read("implementation", || self.ledger.implementation(new_implementation))
            .await?
            .ok_or(TimegateError::UnknownImplementation(*new_implementation))?;

        let operation =
            ProxyUpgradeManager::build_upgrade_operation(kind, proxy, new_implementation, options);
        let executed = self.scheduler.execute(&operation).await?;

        let observed = self.check_version(proxy).await?;
        let report = ExecuteReport {
            id: executed.id,
            proxy: *proxy,
            executed_at: executed.executed_at,
            expected_version: expected.version,
            observed_version: observed,
        };
        if report.confirmed() {
            info!(op_id = %report.id, %proxy, version = observed, "upgrade confirmed");
        } else {
            warn!(
                op_id = %report.id,
                %proxy,
                expected = expected.version,
                observed,
                "version marker does not match the new implementation"
            );
        }
        Ok(report)
    }

    /// Deploy a new unit and verify both halves.
    pub async fn deploy(&self, artifact: &LogicArtifact) -> Result<DeployReport, TimegateError> {
        let pair = self.manager.deploy_unit(artifact).await?;

        let mut verification = Vec::new();
        if let Some(v) = &self.verifier {
            let implementation = v
                .verify(&pair.implementation, &[], &SourceMetadata::for_artifact(artifact))
                .await;
            verification.push((pair.implementation, implementation));

            // Proxy constructor takes (implementation, init data).
            let args = encode_upgrade_to_and_call(&pair.implementation, &[]);
            let proxy = v.verify(&pair.proxy, &args[4..], &SourceMetadata::Proxy).await;
            verification.push((pair.proxy, proxy));
        }
        Ok(DeployReport { pair, verification })
    }

    /// The version marker as seen through `proxy`.
    pub async fn check_version(&self, proxy: &Address) -> Result<u64, TimegateError> {
        self.retry.read("version_of", || self.ledger.version_of(proxy)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{artifact, harness, Harness, NOW};
    use crate::verify::VerificationService;
    use async_trait::async_trait;

    struct Explorer(Result<(), String>);

    #[async_trait]
    impl VerificationService for Explorer {
        async fn submit(&self, _: &Address, _: &[u8], _: &SourceMetadata) -> Result<(), String> {
            self.0.clone()
        }
    }

    fn orchestrator(h: &Harness) -> Orchestrator {
        Orchestrator::new(h.ledger.clone(), h.signer.clone(), RetryPolicy::immediate(3))
    }

    async fn deployed_vault(o: &Orchestrator) -> Address {
        o.deploy(&artifact(UnitKind::Vault, 1, &["owner", "total"])).await.unwrap().pair.proxy
    }

    #[tokio::test]
    async fn prepare_wait_execute() {
        let h = harness("orch_flow", 120);
        let o = orchestrator(&h);
        let proxy = deployed_vault(&o).await;
        let next = artifact(UnitKind::Vault, 2, &["owner", "total", "cap"]);

        let prepared = o.prepare(&proxy, &next, &OperationOptions::default()).await.unwrap();
        assert_eq!(prepared.ready_at, NOW + 120);
        assert!(!prepared.already_scheduled);
        assert_eq!(prepared.verification, None);

        let new_impl = prepared.implementation.address;
        let early = o.execute(UnitKind::Vault, &proxy, &new_impl, &OperationOptions::default()).await;
        assert!(matches!(early, Err(TimegateError::NotReady { .. })));

        h.clock.set(prepared.ready_at);
        let done = o
            .execute(UnitKind::Vault, &proxy, &new_impl, &OperationOptions::default())
            .await
            .unwrap();
        assert_eq!(done.id, prepared.id);
        assert!(done.confirmed());
        assert_eq!(o.check_version(&proxy).await.unwrap(), 2);
        assert_eq!(h.engine.unit(&proxy).unwrap().unwrap().implementation, new_impl);
    }

    #[tokio::test]
    async fn already_verified_counts_as_success() {
        let h = harness("orch_verified", 120);
        let o = orchestrator(&h).with_verifier(VerificationAdapter::new(Box::new(Explorer(Err(
            "Contract source code already verified".into(),
        )))));
        let proxy = deployed_vault(&o).await;
        let report = o
            .prepare(&proxy, &artifact(UnitKind::Vault, 2, &["owner", "total"]), &OperationOptions::default())
            .await
            .unwrap();
        assert_eq!(report.verification, Some(VerificationOutcome::AlreadyVerified));
    }

    #[tokio::test]
    async fn failed_verification_does_not_fail_deploy() {
        let h = harness("orch_verify_fail", 120);
        let o = orchestrator(&h)
            .with_verifier(VerificationAdapter::new(Box::new(Explorer(Err("timeout".into())))));
        let report = o.deploy(&artifact(UnitKind::Deposit, 1, &["owner"])).await.unwrap();
        assert_eq!(report.verification.len(), 2);
        assert!(report.verification.iter().all(|(_, out)| !out.is_verified()));
    }

    #[tokio::test]
    async fn rerunning_prepare_schedules_once() {
        let h = harness("orch_rerun", 120);
        let o = orchestrator(&h);
        let proxy = deployed_vault(&o).await;
        let next = artifact(UnitKind::Vault, 2, &["owner", "total"]);

        let first = o.prepare(&proxy, &next, &OperationOptions::default()).await.unwrap();
        let nonce = h.engine.nonce(&h.signer.address).unwrap();

        h.clock.advance(30);
        let second = o.prepare(&proxy, &next, &OperationOptions::default()).await.unwrap();
        assert!(second.already_scheduled);
        assert!(second.implementation.reused);
        assert_eq!(second.id, first.id);
        assert_eq!(second.ready_at, first.ready_at);
        assert_eq!(h.engine.nonce(&h.signer.address).unwrap(), nonce);
    }

    #[tokio::test]
    async fn crash_after_deploy_resumes_with_same_implementation() {
        let h = harness("orch_crash", 120);
        let o = orchestrator(&h);
        let proxy = deployed_vault(&o).await;
        let next = artifact(UnitKind::Vault, 2, &["owner", "total"]);

        // First run died after deploying, before scheduling.
        let deployed = ProxyUpgradeManager::new(h.ledger.clone(), h.signer.clone())
            .prepare_implementation(&proxy, &next)
            .await
            .unwrap();

        let report = o.prepare(&proxy, &next, &OperationOptions::default()).await.unwrap();
        assert_eq!(report.implementation.address, deployed.address);
        assert!(!report.already_scheduled);
    }

    #[tokio::test]
    async fn executed_upgrade_cannot_be_prepared_again() {
        let h = harness("orch_done", 120);
        let o = orchestrator(&h);
        let proxy = deployed_vault(&o).await;
        let next = artifact(UnitKind::Vault, 2, &["owner", "total"]);
        let opts = OperationOptions::default();

        let prepared = o.prepare(&proxy, &next, &opts).await.unwrap();
        h.clock.set(prepared.ready_at);
        o.execute(UnitKind::Vault, &proxy, &prepared.implementation.address, &opts).await.unwrap();

        assert!(matches!(
            o.prepare(&proxy, &next, &opts).await,
            Err(TimegateError::AlreadyScheduled { state: OperationState::Executed, .. })
        ));
        // A different salt is a different logical operation.
        let again = o.prepare(&proxy, &next, &opts.with_salt_label("REDO")).await.unwrap();
        assert!(!again.already_scheduled);
    }

    #[tokio::test]
    async fn authority_mismatch_is_a_configuration_error() {
        let h = harness("orch_authority", 120);
        let o = orchestrator(&h);
        assert_eq!(o.check_authority(&h.authority).await.unwrap().address, h.authority);
        assert!(matches!(
            o.check_authority(&Address([9; 20])).await,
            Err(TimegateError::Configuration(_))
        ));
    }
}
