use std::sync::{Arc, Mutex, PoisonError};

use timegate_core::abi::{self, GatedCall};
use timegate_core::authority::{AuthorityConfig, CancelPolicy, PredecessorPolicy, Role};
use timegate_core::call::{CallBody, CallOutcome, Receipt, SignedCall};
use timegate_core::constants::{MAX_CODE_BYTES, MAX_PAYLOAD_BYTES};
use timegate_core::error::TimegateError;
use timegate_core::operation::{Operation, OperationRecord, OperationState, OperationStatus};
use timegate_core::types::{Address, H256, Nonce, OperationId, Timestamp};
use timegate_core::unit::{DeployedUnit, ImplementationUnit, LogicArtifact, UnitKind};
use timegate_crypto::hash::{code_hash, create_address, operation_id};
use timegate_crypto::verify_call;
use tracing::{info, warn};

use crate::db::{AuthorityDb, StagedMutations};

/// Why a gated call failed; becomes `CallReverted` with the operation id.
type Revert = String;

// ── AuthorityEngine ───────────────────────────────────────────────────────────

/// The controlling authority's state transition engine.
///
/// Every state-changing call goes through [`AuthorityEngine::apply`], which
/// validates the caller, runs one guarded transition and commits its staged
/// writes atomically. A rejected call changes nothing, not even the nonce.
pub struct AuthorityEngine {
    pub db: Arc<AuthorityDb>,
    /// Serializes `apply` so nonce checks and commits cannot interleave.
    apply_lock: Mutex<()>,
}

impl AuthorityEngine {
    pub fn new(db: Arc<AuthorityDb>) -> Self {
        Self { db, apply_lock: Mutex::new(()) }
    }

    // ── Queries ──────────────────────────────────────────────────────────────

    pub fn authority(&self) -> Result<AuthorityConfig, TimegateError> {
        self.db.get_authority()?.ok_or(TimegateError::AuthorityNotInitialized)
    }

    pub fn min_delay(&self) -> Result<u64, TimegateError> {
        Ok(self.authority()?.min_delay)
    }

    pub fn operation(&self, id: &OperationId) -> Result<Option<OperationRecord>, TimegateError> {
        self.db.get_operation(id)
    }

    pub fn operation_state(
        &self,
        id: &OperationId,
        now: Timestamp,
    ) -> Result<OperationState, TimegateError> {
        Ok(OperationState::of(self.db.get_operation(id)?.as_ref(), now))
    }

    /// True iff the operation is scheduled and `now >= ready_at`.
    pub fn is_ready(&self, id: &OperationId, now: Timestamp) -> Result<bool, TimegateError> {
        Ok(self.operation_state(id, now)? == OperationState::Ready)
    }

    pub fn nonce(&self, address: &Address) -> Result<Nonce, TimegateError> {
        self.db.get_nonce(address)
    }

    pub fn unit(&self, address: &Address) -> Result<Option<DeployedUnit>, TimegateError> {
        self.db.get_unit(address)
    }

    pub fn implementation(
        &self,
        address: &Address,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        self.db.get_implementation(address)
    }

    /// Earliest deployed implementation whose code hashes to `hash`.
    pub fn implementation_by_code_hash(
        &self,
        hash: &H256,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        Ok(self
            .db
            .iter_implementations()?
            .into_iter()
            .filter(|i| &i.code_hash == hash)
            .min_by_key(|i| i.deployed_at))
    }

    /// The version marker a proxy currently reports.
    pub fn version_of(&self, proxy: &Address) -> Result<u64, TimegateError> {
        let unit = self.db.get_unit(proxy)?.ok_or(TimegateError::UnknownUnit(*proxy))?;
        Ok(unit.version)
    }

    // ── Apply ────────────────────────────────────────────────────────────────

    /// Validate and apply a signed call. Returns the durable receipt.
    pub fn apply(&self, call: &SignedCall, now: Timestamp) -> Result<Receipt, TimegateError> {
        let caller = verify_call(call)?;
        // The lock guards no in-memory state; everything lives in sled.
        let _guard = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let expected = self.db.get_nonce(&caller)?;
        if call.nonce != expected {
            return Err(TimegateError::InvalidNonce { expected, got: call.nonce });
        }

        let config = self.authority()?;
        let mut staged = StagedMutations::default();

        let outcome = match &call.body {
            CallBody::Schedule { operation, delay } => {
                self.schedule(&config, &caller, operation, *delay, now, &mut staged)?
            }
            CallBody::Execute { operation } => {
                self.execute(config, &caller, operation, now, &mut staged)?
            }
            CallBody::Cancel { id } => self.cancel(&config, &caller, id, now, &mut staged)?,
            CallBody::DeployImplementation { artifact } => {
                self.deploy_implementation(&caller, call.nonce, artifact, now, &mut staged)?
            }
            CallBody::DeployProxy { kind, implementation } => self.deploy_proxy(
                &config,
                &caller,
                call.nonce,
                *kind,
                implementation,
                now,
                &mut staged,
            )?,
        };

        staged.nonce = Some((caller, call.nonce + 1));
        self.db.commit(&staged)?;

        info!(call = call.body.name(), caller = %caller, nonce = call.nonce, "applied call");
        Ok(Receipt { caller, nonce: call.nonce, outcome, committed_at: now })
    }

    fn require_role(
        config: &AuthorityConfig,
        role: Role,
        account: &Address,
    ) -> Result<(), TimegateError> {
        if config.has_role(role, account) {
            Ok(())
        } else {
            Err(TimegateError::Unauthorized { account: *account, role })
        }
    }

    // ── Schedule ─────────────────────────────────────────────────────────────

    fn schedule(
        &self,
        config: &AuthorityConfig,
        caller: &Address,
        op: &Operation,
        delay: u64,
        now: Timestamp,
        staged: &mut StagedMutations,
    ) -> Result<CallOutcome, TimegateError> {
        Self::require_role(config, Role::Proposer, caller)?;

        let id = operation_id(op);
        if let Some(existing) = self.db.get_operation(&id)? {
            return Err(TimegateError::AlreadyScheduled { id, state: existing.state(now) });
        }
        if delay < config.min_delay {
            return Err(TimegateError::DelayTooShort { delay, min_delay: config.min_delay });
        }
        if op.payload.len() > MAX_PAYLOAD_BYTES {
            return Err(TimegateError::Other(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_BYTES}",
                op.payload.len()
            )));
        }

        if op.has_predecessor() {
            let pred = self.operation_state(&op.predecessor, now)?;
            let met = match config.predecessor_policy {
                PredecessorPolicy::RequireExecuted => pred == OperationState::Executed,
                PredecessorPolicy::RequireKnown => {
                    !matches!(pred, OperationState::Unscheduled | OperationState::Cancelled)
                }
            };
            if !met {
                return Err(TimegateError::UnmetPredecessor { predecessor: op.predecessor });
            }
        }

        let ready_at = i64::try_from(delay)
            .ok()
            .and_then(|d| now.checked_add(d))
            .ok_or_else(|| TimegateError::Other(format!("delay {delay}s overflows the clock")))?;

        staged.operations.push(OperationRecord {
            id,
            operation: op.clone(),
            proposer: *caller,
            scheduled_at: now,
            ready_at,
            status: OperationStatus::Scheduled,
        });

        info!(op_id = %id, ready_at, target = %op.target, "operation scheduled");
        Ok(CallOutcome::Scheduled { id, ready_at })
    }

    // ── Execute ──────────────────────────────────────────────────────────────

    fn execute(
        &self,
        mut config: AuthorityConfig,
        caller: &Address,
        op: &Operation,
        now: Timestamp,
        staged: &mut StagedMutations,
    ) -> Result<CallOutcome, TimegateError> {
        Self::require_role(&config, Role::Executor, caller)?;

        let id = operation_id(op);
        let mut record = self.db.get_operation(&id)?.ok_or(TimegateError::NotReady {
            id,
            state: OperationState::Unscheduled,
            ready_at: None,
        })?;

        let state = record.state(now);
        if state != OperationState::Ready {
            return Err(TimegateError::NotReady { id, state, ready_at: Some(record.ready_at) });
        }

        if op.has_predecessor()
            && self.operation_state(&op.predecessor, now)? != OperationState::Executed
        {
            return Err(TimegateError::UnmetPredecessor { predecessor: op.predecessor });
        }

        if let Err(reason) = self.dispatch(&mut config, op, now, staged) {
            warn!(op_id = %id, %reason, "gated call reverted; operation stays scheduled");
            return Err(TimegateError::CallReverted { id, reason });
        }

        record.status = OperationStatus::Executed { executed_at: now };
        staged.operations.push(record);

        info!(op_id = %id, target = %op.target, "operation executed");
        Ok(CallOutcome::Executed { id, executed_at: now })
    }

    /// Perform the gated call with the authority as `msg.sender`.
    fn dispatch(
        &self,
        config: &mut AuthorityConfig,
        op: &Operation,
        now: Timestamp,
        staged: &mut StagedMutations,
    ) -> Result<(), Revert> {
        if op.value != 0 {
            return Err("target does not accept value".into());
        }
        let call = abi::decode_call(&op.payload).map_err(|e| e.to_string())?;

        if op.target == config.address {
            return Self::amend_authority(config, call, staged);
        }

        let mut unit = self
            .db
            .get_unit(&op.target)
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("no deployed unit at {}", op.target))?;

        match call {
            GatedCall::UpgradeToAndCall { implementation, data } => {
                if unit.upgrade_admin != config.address {
                    return Err(format!("{} may not upgrade this unit", config.address));
                }
                if !data.is_empty() {
                    return Err("follow-up initialization calls are not supported".into());
                }
                let new_impl = self
                    .db
                    .get_implementation(&implementation)
                    .map_err(|e| e.to_string())?
                    .ok_or_else(|| format!("new implementation {implementation} has no code"))?;
                if new_impl.kind != unit.kind {
                    return Err(format!(
                        "implementation is a {} unit, proxy is {}",
                        new_impl.kind, unit.kind
                    ));
                }
                unit.implementation = implementation;
                unit.version = new_impl.version;
                unit.upgraded_at = Some(now);
                info!(proxy = %unit.address, %implementation, version = unit.version, "proxy upgraded");
                staged.units.push(unit);
                Ok(())
            }
            other => Err(format!("{} unit does not implement {other:?}", unit.kind)),
        }
    }

    /// Self-targeted operations: the only way delay and roles change.
    fn amend_authority(
        config: &mut AuthorityConfig,
        call: GatedCall,
        staged: &mut StagedMutations,
    ) -> Result<(), Revert> {
        match call {
            GatedCall::UpdateDelay { delay } => {
                info!(old = config.min_delay, new = delay, "minimum delay updated");
                config.min_delay = delay;
            }
            GatedCall::GrantRole { role, account } => {
                let role = Role::from_id(&role).ok_or_else(|| format!("unknown role {role}"))?;
                if config.grant(role, account) {
                    info!(%role, %account, "role granted");
                }
            }
            GatedCall::RevokeRole { role, account } => {
                let role = Role::from_id(&role).ok_or_else(|| format!("unknown role {role}"))?;
                if config.revoke(role, &account) {
                    info!(%role, %account, "role revoked");
                }
            }
            GatedCall::UpgradeToAndCall { .. } => {
                return Err("the authority is not upgradeable".into());
            }
        }
        staged.authority = Some(config.clone());
        Ok(())
    }

    // ── Cancel ───────────────────────────────────────────────────────────────

    fn cancel(
        &self,
        config: &AuthorityConfig,
        caller: &Address,
        id: &OperationId,
        now: Timestamp,
        staged: &mut StagedMutations,
    ) -> Result<CallOutcome, TimegateError> {
        Self::require_role(config, Role::Canceller, caller)?;

        let mut record = self.db.get_operation(id)?.ok_or(TimegateError::OperationNotFound(*id))?;
        let state = record.state(now);
        if !state.is_pending() {
            return Err(TimegateError::NotCancellable { id: *id, state });
        }

        match config.cancel_policy {
            CancelPolicy::BurnIds => {
                record.status = OperationStatus::Cancelled { cancelled_at: now };
                staged.operations.push(record);
            }
            CancelPolicy::AllowReuse => staged.removed_operations.push(*id),
        }

        info!(op_id = %id, policy = ?config.cancel_policy, "operation cancelled");
        Ok(CallOutcome::Cancelled { id: *id, cancelled_at: now })
    }

    // ── Deployment ───────────────────────────────────────────────────────────

    fn deploy_implementation(
        &self,
        caller: &Address,
        nonce: Nonce,
        artifact: &LogicArtifact,
        now: Timestamp,
        staged: &mut StagedMutations,
    ) -> Result<CallOutcome, TimegateError> {
        if artifact.contract_name != artifact.kind.contract_name() {
            return Err(TimegateError::InvalidArtifact(format!(
                "{} is not a {} artifact",
                artifact.contract_name, artifact.kind
            )));
        }
        let code = artifact.code()?;
        if code.is_empty() || code.len() > MAX_CODE_BYTES {
            return Err(TimegateError::InvalidArtifact(format!(
                "bytecode size {} outside 1..={MAX_CODE_BYTES}",
                code.len()
            )));
        }

        let address = create_address(caller, nonce);
        staged.implementations.push(ImplementationUnit {
            address,
            kind: artifact.kind,
            version: artifact.version,
            code_hash: code_hash(&code),
            layout: artifact.storage_layout.clone(),
            deployer: *caller,
            deployed_at: now,
        });

        info!(%address, kind = %artifact.kind, version = artifact.version, "implementation deployed");
        Ok(CallOutcome::Deployed { address })
    }

    #[allow(clippy::too_many_arguments)]
    fn deploy_proxy(
        &self,
        config: &AuthorityConfig,
        caller: &Address,
        nonce: Nonce,
        kind: UnitKind,
        implementation: &Address,
        now: Timestamp,
        staged: &mut StagedMutations,
    ) -> Result<CallOutcome, TimegateError> {
        let imp = self
            .db
            .get_implementation(implementation)?
            .ok_or(TimegateError::UnknownImplementation(*implementation))?;
        if imp.kind != kind {
            return Err(TimegateError::InvalidArtifact(format!(
                "implementation {implementation} is a {} unit, not {kind}",
                imp.kind
            )));
        }

        let address = create_address(caller, nonce);
        staged.units.push(DeployedUnit {
            address,
            kind,
            implementation: *implementation,
            version: imp.version,
            upgrade_admin: config.address,
            deployed_at: now,
            upgraded_at: None,
        });

        info!(%address, %kind, %implementation, "proxy deployed");
        Ok(CallOutcome::Deployed { address })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
