//! End-to-end smoke test for timegate-node.
//!
//! Starts a real node process with a fresh authority, submits signed calls
//! over JSON-RPC, and asserts the timelock state the node reports.
//!
//! Run with:
//!   cargo test -p timegate-node --test smoke

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use timegate_core::abi::encode_update_delay;
use timegate_core::call::{CallBody, SignedCall};
use timegate_core::constants::UPGRADE_SALT_LABEL;
use timegate_core::operation::Operation;
use timegate_core::types::{Address, H256};
use timegate_crypto::{label_hash, operation_id, KeyPair};
use timegate_genesis::AuthorityParams;

// ── Node lifecycle ────────────────────────────────────────────────────────────

struct NodeGuard {
    child: Child,
    data_dir: PathBuf,
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        let _ = std::fs::remove_dir_all(&self.data_dir);
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port()
}

// ── RPC helpers ───────────────────────────────────────────────────────────────

async fn rpc_raw(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let body = serde_json::json!({ "jsonrpc": "2.0", "method": method, "params": params, "id": 1 });
    let resp = client
        .post(url)
        .json(&body)
        .send()
        .await
        .unwrap_or_else(|e| panic!("RPC call {method} failed: {e}"));
    resp.json().await.expect("parse RPC JSON")
}

async fn rpc_call(
    client: &reqwest::Client,
    url: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let json = rpc_raw(client, url, method, params).await;
    if let Some(err) = json.get("error") {
        panic!("RPC error from {method}: {err}");
    }
    json["result"].clone()
}

async fn wait_for_rpc(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let body = serde_json::json!({
        "jsonrpc": "2.0", "method": "timegate_getMinDelay", "params": [], "id": 1
    });
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(resp) = client.post(url).json(&body).send().await {
            if resp.status().is_success() {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    false
}

fn call_hex(call: &SignedCall) -> serde_json::Value {
    serde_json::json!([call.to_hex().unwrap()])
}

// ── Smoke test ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn smoke_schedule_and_early_execute() {
    // ── 1. Temp dir and authority params ──────────────────────────────────────
    let data_dir = std::env::temp_dir().join(format!("timegate_e2e_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&data_dir);
    std::fs::create_dir_all(&data_dir).unwrap();

    let proposer = KeyPair::generate();
    let params = AuthorityParams::new(120, &[proposer.address], &[Address::ZERO]);
    let params_path = data_dir.join("genesis-params.json");
    std::fs::write(&params_path, serde_json::to_string(&params).unwrap()).unwrap();

    // ── 2. Start node ─────────────────────────────────────────────────────────
    let rpc_port = free_port();
    let rpc_url = format!("http://127.0.0.1:{}", rpc_port);

    let child = Command::new(env!("CARGO_BIN_EXE_timegate-node"))
        .args([
            "--data-dir",       data_dir.join("state").to_str().unwrap(),
            "--rpc-addr",       &format!("127.0.0.1:{}", rpc_port),
            "--genesis-params", params_path.to_str().unwrap(),
        ])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn timegate-node");
    let _guard = NodeGuard { child, data_dir };

    let http = reqwest::Client::new();
    assert!(
        wait_for_rpc(&http, &rpc_url, Duration::from_secs(20)).await,
        "timegate-node did not become ready within 20 seconds"
    );

    // ── 3. Authority as created ───────────────────────────────────────────────
    let min_delay = rpc_call(&http, &rpc_url, "timegate_getMinDelay", serde_json::json!([])).await;
    assert_eq!(min_delay.as_u64(), Some(120));
    let authority = rpc_call(&http, &rpc_url, "timegate_getAuthority", serde_json::json!([])).await;
    let authority_addr = Address::from_hex(authority["address"].as_str().unwrap()).unwrap();

    // ── 4. Schedule a self-amending delay change ──────────────────────────────
    let op = Operation {
        target: authority_addr,
        value: 0,
        payload: encode_update_delay(180),
        predecessor: H256::ZERO,
        salt: label_hash(UPGRADE_SALT_LABEL),
    };
    let id = operation_id(&op).to_hex();

    let state =
        rpc_call(&http, &rpc_url, "timegate_getOperationState", serde_json::json!([id])).await;
    assert_eq!(state, "Unscheduled");

    let schedule = proposer
        .sign_call(0, CallBody::Schedule { operation: op.clone(), delay: 120 })
        .unwrap();
    let receipt = rpc_call(&http, &rpc_url, "timegate_submitCall", call_hex(&schedule)).await;
    assert_eq!(receipt["nonce"].as_u64(), Some(0));

    let ready = rpc_call(&http, &rpc_url, "timegate_isOperationReady", serde_json::json!([id])).await;
    assert_eq!(ready.as_bool(), Some(false));

    // ── 5. Early execute is rejected with the NotReady code ──────────────────
    let execute = proposer.sign_call(1, CallBody::Execute { operation: op }).unwrap();
    let resp = rpc_raw(&http, &rpc_url, "timegate_submitCall", call_hex(&execute)).await;
    assert_eq!(resp["error"]["code"].as_i64(), Some(-32013));

    let nonce = rpc_call(
        &http,
        &rpc_url,
        "timegate_getNonce",
        serde_json::json!([proposer.address.to_hex()]),
    )
    .await;
    assert_eq!(nonce.as_u64(), Some(1));
}
