//! timegate
//!
//! Operator CLI for timelocked proxy upgrades. Talks to a running
//! `timegate-node` over JSON-RPC.
//!
//! Parameters come from the environment (`TIMEGATE_RPC_URL`,
//! `TIMEGATE_AUTHORITY_ADDRESS`, `TIMEGATE_SIGNER_KEYFILE`, per-kind proxy and
//! implementation addresses, explorer URL and key). A missing one is fatal.
//!
//! Usage:
//!   timegate keygen   [--out <path>]
//!   timegate deploy   --kind <kind> --artifact <json> [--skip-verify]
//!   timegate prepare  --kind <kind> --artifact <json> [--salt-label <s>] [--predecessor <id>] [--skip-verify]
//!   timegate execute  --kind <kind> [--salt-label <s>] [--predecessor <id>]
//!   timegate status   --id <hex>
//!   timegate cancel   --id <hex>
//!   timegate version  --kind <kind>

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;

use timegate_core::constants::UPGRADE_SALT_LABEL;
use timegate_core::types::{OperationId, Timestamp, H256};
use timegate_core::unit::{LogicArtifact, UnitKind};
use timegate_crypto::KeyPair;
use timegate_upgrade::{
    ExplorerConfig, ExplorerService, Ledger, OperationOptions, Orchestrator, RetryPolicy,
    RpcLedger, UpgradeConfig, VerificationAdapter, VerificationOutcome,
};

// ── CLI definition ────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "timegate", version, about = "timegate: schedule and execute timelocked proxy upgrades")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Args, Debug)]
struct OperationArgs {
    /// Label hashed into the operation salt.
    #[arg(long, default_value = UPGRADE_SALT_LABEL)]
    salt_label: String,
    /// Operation id that must execute first (hex).
    #[arg(long)]
    predecessor: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new Dilithium2 signing key.
    Keygen {
        #[arg(long, default_value = "~/.timegate/signer.json")]
        out: PathBuf,
    },

    /// Deploy logic plus a proxy owned by the authority.
    Deploy {
        #[arg(long)]
        kind: UnitKind,
        /// Logic artifact (JSON).
        #[arg(long)]
        artifact: PathBuf,
        #[arg(long, default_value_t = false)]
        skip_verify: bool,
    },

    /// Validate and deploy new logic, then schedule the upgrade.
    Prepare {
        #[arg(long)]
        kind: UnitKind,
        #[arg(long)]
        artifact: PathBuf,
        #[command(flatten)]
        op: OperationArgs,
        #[arg(long, default_value_t = false)]
        skip_verify: bool,
    },

    /// Execute a ready upgrade and confirm the new version.
    Execute {
        #[arg(long)]
        kind: UnitKind,
        #[command(flatten)]
        op: OperationArgs,
    },

    /// Show an operation's state and ready time.
    Status {
        #[arg(long)]
        id: String,
    },

    /// Cancel a pending operation.
    Cancel {
        #[arg(long)]
        id: String,
    },

    /// Read the version marker through a proxy.
    Version {
        #[arg(long)]
        kind: UnitKind,
    },
}

// ── Main ─────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("warn,timegate_cli=info,timegate_upgrade=info")
        .init();

    let args = Args::parse();

    match args.command {
        Command::Keygen { out } => cmd_keygen(&expand_tilde(&out)),

        Command::Deploy { kind, artifact, skip_verify } => {
            let artifact = load_artifact(&artifact, kind)?;
            let orchestrator = connect(skip_verify).await?;
            let report = orchestrator.deploy(&artifact).await?;
            println!("Implementation: {}", report.pair.implementation);
            println!("Proxy:          {}", report.pair.proxy);
            println!("Version:        {}", report.pair.version);
            for (address, outcome) in &report.verification {
                println!("Verification:   {address} {}", describe_verification(Some(outcome)));
            }
            println!("\nexport {}={}", kind.proxy_env_var(), report.pair.proxy);
            Ok(())
        }

        Command::Prepare { kind, artifact, op, skip_verify } => {
            let artifact = load_artifact(&artifact, kind)?;
            let proxy = UpgradeConfig::proxy_address(kind)?;
            let options = operation_options(&op)?;
            let orchestrator = connect(skip_verify).await?;

            let report = orchestrator.prepare(&proxy, &artifact, &options).await?;
            println!("Operation id:   {}", report.id);
            println!(
                "Implementation: {} (version {}{})",
                report.implementation.address,
                report.implementation.version,
                if report.implementation.reused { ", reused" } else { "" }
            );
            println!("Ready at:       {}", format_time(report.ready_at));
            if report.already_scheduled {
                println!("Status:         already scheduled, nothing submitted");
            }
            println!("Verification:   {}", describe_verification(report.verification.as_ref()));
            println!(
                "\nexport {}={}",
                kind.new_impl_env_var(),
                report.implementation.address
            );
            Ok(())
        }

        Command::Execute { kind, op } => {
            let proxy = UpgradeConfig::proxy_address(kind)?;
            let new_implementation = UpgradeConfig::new_implementation_address(kind)?;
            let options = operation_options(&op)?;
            let orchestrator = connect(true).await?;

            let report = orchestrator.execute(kind, &proxy, &new_implementation, &options).await?;
            println!("Operation id:   {}", report.id);
            println!("Executed at:    {}", format_time(report.executed_at));
            println!(
                "Version:        {} (expected {}) {}",
                report.observed_version,
                report.expected_version,
                if report.confirmed() { "confirmed" } else { "MISMATCH" }
            );
            Ok(())
        }

        Command::Status { id } => {
            let id = parse_id(&id)?;
            let orchestrator = connect(true).await?;
            let summary = orchestrator.scheduler().describe(&id).await?;
            println!("Operation id:   {}", summary.id);
            println!("State:          {}", summary.state);
            if let Some(record) = &summary.record {
                println!("Target:         {}", record.operation.target);
                println!("Proposer:       {}", record.proposer);
                println!("Scheduled at:   {}", format_time(record.scheduled_at));
                println!("Ready at:       {}", format_time(record.ready_at));
            }
            if let Some(secs) = summary.seconds_remaining() {
                println!("Ready in:       {secs}s");
            }
            Ok(())
        }

        Command::Cancel { id } => {
            let id = parse_id(&id)?;
            let orchestrator = connect(true).await?;
            let cancelled_at = orchestrator.scheduler().cancel(&id).await?;
            println!("Operation {id} cancelled at {}", format_time(cancelled_at));
            Ok(())
        }

        Command::Version { kind } => {
            let proxy = UpgradeConfig::proxy_address(kind)?;
            let orchestrator = connect(true).await?;
            let version = orchestrator.check_version(&proxy).await?;
            println!("{kind} proxy {proxy}: version {version}");
            Ok(())
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

fn cmd_keygen(out: &Path) -> anyhow::Result<()> {
    if out.exists() {
        bail!(
            "Keyfile {} already exists. Delete it first to generate a new key.",
            out.display()
        );
    }
    let kp = KeyPair::generate();
    kp.save(out).with_context(|| format!("writing keyfile to {}", out.display()))?;
    println!("Generated new signing key.");
    println!("Address: {}", kp.address);
    println!("Keyfile: {}", out.display());
    println!("\nGrant this address the proposer and executor roles in the authority's genesis params.");
    Ok(())
}

/// Load configuration, the signer and the ledger client, and make sure the
/// ledger's authority is the configured one.
async fn connect(skip_verify: bool) -> anyhow::Result<Orchestrator> {
    let config = UpgradeConfig::from_env()?;
    let keyfile = expand_tilde(&config.signer_keyfile);
    let signer = Arc::new(
        KeyPair::load(&keyfile)
            .with_context(|| format!("loading signer from {}", keyfile.display()))?,
    );
    let ledger: Arc<dyn Ledger> = Arc::new(RpcLedger::new(&config.rpc_url)?);

    let mut orchestrator = Orchestrator::new(ledger, signer, RetryPolicy::default());
    if !skip_verify {
        let explorer = ExplorerService::new(ExplorerConfig::from_env()?)?;
        orchestrator = orchestrator.with_verifier(VerificationAdapter::new(Box::new(explorer)));
    }

    let authority = orchestrator
        .check_authority(&config.authority)
        .await
        .with_context(|| format!("connecting to {}", config.rpc_url))?;
    info!(authority = %authority.address, min_delay = authority.min_delay, "connected");
    Ok(orchestrator)
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn load_artifact(path: &Path, kind: UnitKind) -> anyhow::Result<LogicArtifact> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading artifact {}", path.display()))?;
    let artifact: LogicArtifact =
        serde_json::from_str(&json).context("parsing logic artifact JSON")?;
    if artifact.kind != kind {
        bail!("artifact {} is a {} unit, not {kind}", path.display(), artifact.kind);
    }
    Ok(artifact)
}

fn operation_options(args: &OperationArgs) -> anyhow::Result<OperationOptions> {
    let mut options = OperationOptions::default().with_salt_label(&args.salt_label);
    if let Some(p) = &args.predecessor {
        options = options.with_predecessor(parse_id(p)?);
    }
    Ok(options)
}

fn parse_id(s: &str) -> anyhow::Result<OperationId> {
    H256::from_hex(s).map_err(|e| anyhow::anyhow!("invalid operation id '{s}': {e}"))
}

fn format_time(ts: Timestamp) -> String {
    match chrono::DateTime::from_timestamp(ts, 0) {
        Some(t) => format!("{ts} ({})", t.format("%Y-%m-%d %H:%M:%S UTC")),
        None => ts.to_string(),
    }
}

fn describe_verification(outcome: Option<&VerificationOutcome>) -> String {
    match outcome {
        None => "skipped".into(),
        Some(VerificationOutcome::Verified) => "verified".into(),
        Some(VerificationOutcome::AlreadyVerified) => "already verified".into(),
        Some(VerificationOutcome::Failed(reason)) => format!("failed ({reason})"),
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
