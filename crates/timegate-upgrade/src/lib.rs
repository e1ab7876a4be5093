//! timegate-upgrade
//!
//! Client side of the timelocked upgrade protocol: everything an operator
//! runs against a ledger to move a proxy to new logic.
//!
//! * [`ledger`]: the `Ledger` seam, over JSON-RPC or an in-process engine
//! * [`scheduler`]: schedule / execute / cancel with pre-submit checks
//! * [`manager`]: storage-layout pre-flight, implementation deploys, payloads
//! * [`verify`]: best-effort explorer verification
//! * [`orchestrator`]: the prepare, execute and deploy workflows
//! * [`config`]: environment parameters

pub mod config;
pub mod layout;
pub mod ledger;
pub mod manager;
pub mod orchestrator;
pub mod retry;
pub mod scheduler;
pub mod verify;

#[cfg(test)]
mod testkit;

pub use config::{ensure_env_var, ExplorerConfig, UpgradeConfig};
pub use layout::{AppendOnlyValidator, LayoutReport, LayoutValidator};
pub use ledger::{Ledger, LocalLedger, RpcLedger};
pub use manager::{DeployedPair, OperationOptions, PreparedImplementation, ProxyUpgradeManager};
pub use orchestrator::{DeployReport, ExecuteReport, Orchestrator, PrepareReport};
pub use retry::RetryPolicy;
pub use scheduler::{OperationSummary, TimelockScheduler};
pub use verify::{
    ExplorerService, SourceMetadata, VerificationAdapter, VerificationOutcome,
    VerificationService,
};
