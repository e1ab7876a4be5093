use std::sync::Arc;

use tracing::{info, warn};

use timegate_core::call::{CallBody, CallOutcome, Receipt};
use timegate_core::error::TimegateError;
use timegate_core::operation::{Operation, OperationRecord, OperationState, OperationStatus};
use timegate_core::types::{Address, OperationId, Timestamp};
use timegate_crypto::{operation_id, KeyPair};

use crate::ledger::{submit_signed, Ledger};
use crate::retry::RetryPolicy;

/// A schedule the ledger has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scheduled {
    pub id: OperationId,
    pub ready_at: Timestamp,
}

/// An execution the ledger has committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Executed {
    pub id: OperationId,
    pub executed_at: Timestamp,
}

/// What the ledger knows about one operation id, at ledger time `now`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationSummary {
    pub id: OperationId,
    pub state: OperationState,
    pub now: Timestamp,
    pub record: Option<OperationRecord>,
}

impl OperationSummary {
    pub fn ready_at(&self) -> Option<Timestamp> {
        self.record.as_ref().map(|r| r.ready_at)
    }

    /// Seconds left until the ready time, if still waiting.
    pub fn seconds_remaining(&self) -> Option<i64> {
        match self.state {
            OperationState::Scheduled => self.ready_at().map(|t| (t - self.now).max(0)),
            _ => None,
        }
    }
}

/// Client for the authority's timelock: schedule, wait, execute, cancel.
///
/// Every state-changing call is preceded by a read of the id's current state,
/// and a transport failure during submission is resolved by reading the state
/// again, never by resubmitting.
pub struct TimelockScheduler {
    ledger: Arc<dyn Ledger>,
    signer: Arc<KeyPair>,
    retry: RetryPolicy,
}

impl TimelockScheduler {
    pub fn new(ledger: Arc<dyn Ledger>, signer: Arc<KeyPair>) -> Self {
        Self { ledger, signer, retry: RetryPolicy::default() }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub async fn min_delay(&self) -> Result<u64, TimegateError> {
        self.retry.read("min_delay", || self.ledger.min_delay()).await
    }

    pub async fn state(&self, id: &OperationId) -> Result<OperationState, TimegateError> {
        self.retry.read("operation_state", || self.ledger.operation_state(id)).await
    }

    pub async fn is_ready(&self, id: &OperationId) -> Result<bool, TimegateError> {
        self.retry.read("is_ready", || self.ledger.is_ready(id)).await
    }

    pub async fn describe(&self, id: &OperationId) -> Result<OperationSummary, TimegateError> {
        let now = self.retry.read("now", || self.ledger.now()).await?;
        let record = self.retry.read("operation", || self.ledger.operation(id)).await?;
        let state = OperationState::of(record.as_ref(), now);
        Ok(OperationSummary { id: *id, state, now, record })
    }

    // ── Writes ───────────────────────────────────────────────────────────────

    async fn submit(&self, body: CallBody) -> Result<Receipt, TimegateError> {
        submit_signed(self.ledger.as_ref(), &self.signer, &self.retry, body).await
    }

    /// Schedule `op` to become executable `delay` seconds from now.
    pub async fn schedule(&self, op: &Operation, delay: u64) -> Result<Scheduled, TimegateError> {
        let id = operation_id(op);

        let state = self.state(&id).await?;
        if state != OperationState::Unscheduled {
            return Err(TimegateError::AlreadyScheduled { id, state });
        }
        let min_delay = self.min_delay().await?;
        if delay < min_delay {
            return Err(TimegateError::DelayTooShort { delay, min_delay });
        }

        let body = CallBody::Schedule { operation: op.clone(), delay };
        match self.submit(body).await {
            Ok(receipt) => match receipt.outcome {
                CallOutcome::Scheduled { id: got, ready_at } if got == id => {
                    info!(op_id = %id, ready_at, "operation scheduled");
                    Ok(Scheduled { id, ready_at })
                }
                other => Err(unexpected("schedule", &other)),
            },
            Err(e) if e.is_retryable() => {
                warn!(op_id = %id, error = %e, "schedule reply lost; re-reading state");
                let summary = self.describe(&id).await?;
                match &summary.record {
                    Some(r) if r.proposer == self.signer.address && summary.state.is_pending() => {
                        info!(op_id = %id, ready_at = r.ready_at, "schedule was committed");
                        Ok(Scheduled { id, ready_at: r.ready_at })
                    }
                    _ => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Execute a ready operation. The ledger re-checks everything; the reads
    /// here only avoid submitting calls that are bound to fail.
    pub async fn execute(&self, op: &Operation) -> Result<Executed, TimegateError> {
        let id = operation_id(op);

        let summary = self.describe(&id).await?;
        if summary.state != OperationState::Ready {
            return Err(TimegateError::NotReady {
                id,
                state: summary.state,
                ready_at: summary.ready_at(),
            });
        }
        if op.has_predecessor() && self.state(&op.predecessor).await? != OperationState::Executed {
            return Err(TimegateError::UnmetPredecessor { predecessor: op.predecessor });
        }

        match self.submit(CallBody::Execute { operation: op.clone() }).await {
            Ok(receipt) => match receipt.outcome {
                CallOutcome::Executed { id: got, executed_at } if got == id => {
                    info!(op_id = %id, executed_at, "operation executed");
                    Ok(Executed { id, executed_at })
                }
                other => Err(unexpected("execute", &other)),
            },
            Err(e) if e.is_retryable() => {
                warn!(op_id = %id, error = %e, "execute reply lost; re-reading state");
                match self.describe(&id).await?.record.map(|r| r.status) {
                    Some(OperationStatus::Executed { executed_at }) => {
                        info!(op_id = %id, executed_at, "execution was committed");
                        Ok(Executed { id, executed_at })
                    }
                    _ => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel a pending operation. Returns the cancellation time.
    pub async fn cancel(&self, id: &OperationId) -> Result<Timestamp, TimegateError> {
        match self.state(id).await? {
            OperationState::Unscheduled => return Err(TimegateError::OperationNotFound(*id)),
            s if !s.is_pending() => return Err(TimegateError::NotCancellable { id: *id, state: s }),
            _ => {}
        }

        match self.submit(CallBody::Cancel { id: *id }).await {
            Ok(receipt) => match receipt.outcome {
                CallOutcome::Cancelled { cancelled_at, .. } => {
                    info!(op_id = %id, cancelled_at, "operation cancelled");
                    Ok(cancelled_at)
                }
                other => Err(unexpected("cancel", &other)),
            },
            Err(e) if e.is_retryable() => {
                warn!(op_id = %id, error = %e, "cancel reply lost; re-reading state");
                let summary = self.describe(id).await?;
                match (summary.state, summary.record.map(|r| r.status)) {
                    (_, Some(OperationStatus::Cancelled { cancelled_at })) => Ok(cancelled_at),
                    // Reuse policy drops the record.
                    (OperationState::Unscheduled, None) => Ok(summary.now),
                    _ => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn unexpected(call: &str, outcome: &CallOutcome) -> TimegateError {
    TimegateError::Other(format!("{call}: unexpected ledger outcome {outcome:?}"))
}
