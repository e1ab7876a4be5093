use std::sync::Arc;

use tracing::{info, warn};

use timegate_core::call::{CallBody, CallOutcome};
use timegate_core::constants::UPGRADE_SALT_LABEL;
use timegate_core::error::TimegateError;
use timegate_core::operation::Operation;
use timegate_core::types::{Address, OperationId, Salt, H256};
use timegate_core::unit::{LogicArtifact, UnitKind};
use timegate_crypto::hash::code_hash;
use timegate_crypto::{label_hash, KeyPair};

use crate::layout::{AppendOnlyValidator, LayoutValidator};
use crate::ledger::{submit_signed, Ledger};
use crate::retry::RetryPolicy;

/// Salt and predecessor folded into an upgrade operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationOptions {
    pub salt: Salt,
    pub predecessor: OperationId,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self { salt: label_hash(UPGRADE_SALT_LABEL), predecessor: H256::ZERO }
    }
}

impl OperationOptions {
    pub fn with_salt_label(mut self, label: &str) -> Self {
        self.salt = label_hash(label);
        self
    }

    pub fn with_predecessor(mut self, predecessor: OperationId) -> Self {
        self.predecessor = predecessor;
        self
    }
}

/// A new implementation ready to be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreparedImplementation {
    pub address: Address,
    pub kind: UnitKind,
    pub version: u64,
    /// An implementation with identical code was already on the ledger.
    pub reused: bool,
}

/// Result of a fresh unit deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeployedPair {
    pub implementation: Address,
    pub proxy: Address,
    pub version: u64,
}

/// Prepares new logic for proxies and builds the gated upgrade call.
pub struct ProxyUpgradeManager {
    ledger: Arc<dyn Ledger>,
    signer: Arc<KeyPair>,
    validator: Box<dyn LayoutValidator>,
    retry: RetryPolicy,
}

impl ProxyUpgradeManager {
    pub fn new(ledger: Arc<dyn Ledger>, signer: Arc<KeyPair>) -> Self {
        Self {
            ledger,
            signer,
            validator: Box::new(AppendOnlyValidator),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_validator(mut self, validator: Box<dyn LayoutValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Validate `artifact` against the proxy's current logic and make sure an
    /// implementation with its code exists, deploying one if needed.
    ///
    /// Storage-layout incompatibility aborts before anything is submitted.
    /// Existing code is reused, so repeating this after a crash yields the
    /// same address and therefore the same operation id.
    pub async fn prepare_implementation(
        &self,
        proxy: &Address,
        artifact: &LogicArtifact,
    ) -> Result<PreparedImplementation, TimegateError> {
        let unit = self
            .retry
            .read("unit", || self.ledger.unit(proxy))
            .await?
            .ok_or(TimegateError::UnknownUnit(*proxy))?;
        if unit.kind != artifact.kind {
            return Err(TimegateError::InvalidArtifact(format!(
                "{proxy} is a {} unit, artifact is {}",
                unit.kind, artifact.kind
            )));
        }

        let current = self
            .retry
            .read("implementation", || self.ledger.implementation(&unit.implementation))
            .await?
            .ok_or(TimegateError::UnknownImplementation(unit.implementation))?;

        let report = self.validator.validate(&current.layout, &artifact.storage_layout);
        if !report.is_compatible() {
            for d in &report.diagnostics {
                warn!(proxy = %proxy, diagnostic = %d, "storage layout check failed");
            }
            report.into_result()?;
        }

        self.ensure_implementation(artifact).await
    }

    /// Reuse an implementation with identical code, or deploy a new one.
    async fn ensure_implementation(
        &self,
        artifact: &LogicArtifact,
    ) -> Result<PreparedImplementation, TimegateError> {
        let hash = code_hash(&artifact.code()?);
        let found = |unit: Option<timegate_core::unit::ImplementationUnit>| {
            unit.filter(|i| i.kind == artifact.kind).map(|i| PreparedImplementation {
                address: i.address,
                kind: i.kind,
                version: i.version,
                reused: true,
            })
        };

        let existing = self
            .retry
            .read("implementation_by_code_hash", || self.ledger.implementation_by_code_hash(&hash))
            .await?;
        if let Some(prepared) = found(existing) {
            info!(address = %prepared.address, "reusing deployed implementation");
            return Ok(prepared);
        }

        let body = CallBody::DeployImplementation { artifact: artifact.clone() };
        match submit_signed(self.ledger.as_ref(), &self.signer, &self.retry, body).await {
            Ok(receipt) => match receipt.outcome {
                CallOutcome::Deployed { address } => {
                    info!(%address, kind = %artifact.kind, version = artifact.version, "new implementation ready");
                    Ok(PreparedImplementation {
                        address,
                        kind: artifact.kind,
                        version: artifact.version,
                        reused: false,
                    })
                }
                other => Err(TimegateError::Other(format!("deploy: unexpected outcome {other:?}"))),
            },
            Err(e) if e.is_retryable() => {
                warn!(error = %e, "deploy reply lost; looking the code up again");
                let after = self
                    .retry
                    .read("implementation_by_code_hash", || {
                        self.ledger.implementation_by_code_hash(&hash)
                    })
                    .await?;
                found(after).map(|p| PreparedImplementation { reused: false, ..p }).ok_or(e)
            }
            Err(e) => Err(e),
        }
    }

    /// The gated call switching `proxy` to `new_implementation` with no
    /// follow-up initialization. Value is always zero.
    pub fn build_upgrade_operation(
        kind: UnitKind,
        proxy: &Address,
        new_implementation: &Address,
        options: &OperationOptions,
    ) -> Operation {
        Operation {
            target: *proxy,
            value: 0,
            payload: kind.encode_upgrade(new_implementation),
            predecessor: options.predecessor,
            salt: options.salt,
        }
    }

    /// Deploy logic and a proxy in front of it. The authority becomes the
    /// proxy's upgrade admin.
    pub async fn deploy_unit(&self, artifact: &LogicArtifact) -> Result<DeployedPair, TimegateError> {
        let implementation = self.ensure_implementation(artifact).await?;

        let body = CallBody::DeployProxy {
            kind: artifact.kind,
            implementation: implementation.address,
        };
        let receipt = submit_signed(self.ledger.as_ref(), &self.signer, &self.retry, body).await?;
        match receipt.outcome {
            CallOutcome::Deployed { address } => {
                info!(proxy = %address, implementation = %implementation.address, "proxy deployed");
                Ok(DeployedPair {
                    implementation: implementation.address,
                    proxy: address,
                    version: implementation.version,
                })
            }
            other => Err(TimegateError::Other(format!("deploy proxy: unexpected outcome {other:?}"))),
        }
    }
}
