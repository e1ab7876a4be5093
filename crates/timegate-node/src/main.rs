//! timegate-node: ledger node hosting the controlling authority.
//!
//! Startup sequence:
//!   1. Open (or initialise) the authority database
//!   2. Create the authority if the DB is fresh
//!   3. Start the JSON-RPC 2.0 server
//!   4. Serve until ctrl-c

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use timegate_core::clock::{Clock, SystemClock};
use timegate_crypto::KeyPair;
use timegate_genesis::{apply_genesis, AuthorityParams};
use timegate_rpc::{RpcServer, RpcServerState};
use timegate_state::{AuthorityDb, AuthorityEngine};

#[derive(Parser, Debug)]
#[command(
    name = "timegate-node",
    version,
    about = "Timegate node: a timelocked authority over upgradeable units"
)]
struct Args {
    /// Directory for the persistent authority database.
    #[arg(long, default_value = "~/.timegate/data")]
    data_dir: PathBuf,

    /// JSON-RPC listen address.
    #[arg(long, default_value = "127.0.0.1:8645")]
    rpc_addr: SocketAddr,

    /// Path to authority params JSON (only read on first run).
    #[arg(long)]
    genesis_params: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,timegate=debug")),
        )
        .init();

    let args = Args::parse();
    info!("Timegate node starting");

    // ── Authority database ────────────────────────────────────────────────────
    let data_dir = expand_tilde(&args.data_dir);
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;

    let db = Arc::new(AuthorityDb::open(&data_dir).context("opening authority database")?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // ── Genesis if fresh ──────────────────────────────────────────────────────
    match db.get_authority().context("reading authority")? {
        Some(config) => {
            info!(authority = %config.address, "existing authority found; skipping genesis")
        }
        None => {
            info!("fresh database; creating the authority");
            let params = load_or_generate_params(args.genesis_params.as_deref(), &data_dir)?;
            apply_genesis(&db, &params, clock.now()).context("applying genesis")?;
        }
    }

    // ── RPC server ────────────────────────────────────────────────────────────
    let engine = Arc::new(AuthorityEngine::new(Arc::clone(&db)));
    let rpc_state = Arc::new(RpcServerState { engine, clock });
    let (addr, handle) = RpcServer::new(rpc_state)
        .start(args.rpc_addr)
        .await
        .context("starting RPC server")?;

    info!(%addr, "node ready");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;

    info!("shutting down");
    handle.stop().ok();
    handle.stopped().await;
    db.flush().context("flushing authority database")?;
    Ok(())
}

/// Load authority params from a JSON file, or create a development authority
/// controlled by a freshly generated key written to `<data_dir>/dev-keyfile.json`.
fn load_or_generate_params(path: Option<&Path>, data_dir: &Path) -> anyhow::Result<AuthorityParams> {
    if let Some(p) = path {
        let json = std::fs::read_to_string(p)
            .with_context(|| format!("reading genesis params from {}", p.display()))?;
        return Ok(AuthorityParams::from_json(&json)?);
    }

    let keyfile = data_dir.join("dev-keyfile.json");
    let key = KeyPair::generate();
    key.save(&keyfile).context("writing development keyfile")?;
    warn!(
        keyfile = %keyfile.display(),
        proposer = %key.address,
        "no --genesis-params provided; created a development authority. DO NOT USE IN PRODUCTION."
    );
    Ok(AuthorityParams::new(
        timegate_core::constants::DEFAULT_MIN_DELAY_SECS,
        &[key.address],
        &[key.address],
    ))
}

/// Expand a leading `~` to the user's home directory (`HOME` or `USERPROFILE`).
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(stripped) = path.strip_prefix("~") {
        if let Ok(home) = std::env::var("HOME").or_else(|_| std::env::var("USERPROFILE")) {
            return PathBuf::from(home).join(stripped);
        }
    }
    path.to_path_buf()
}
