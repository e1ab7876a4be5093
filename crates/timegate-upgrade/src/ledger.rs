use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::debug;

use timegate_core::authority::AuthorityConfig;
use timegate_core::call::{CallBody, Receipt, SignedCall};
use timegate_core::clock::Clock;
use timegate_core::constants::RPC_TIMEOUT_SECS;
use timegate_core::error::TimegateError;
use timegate_core::operation::{OperationRecord, OperationState};
use timegate_core::types::{Address, Nonce, OperationId, Timestamp, H256};
use timegate_core::unit::{DeployedUnit, ImplementationUnit};
use timegate_crypto::KeyPair;
use timegate_rpc::RpcOperation;
use timegate_state::AuthorityEngine;

use crate::retry::RetryPolicy;

/// The ledger endpoint hosting the controlling authority.
///
/// Reads are side-effect free. `submit` returns only once the call is
/// durably committed; an `Err` other than `Transport` means nothing changed.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Ledger time; readiness is judged against this, not the local clock.
    async fn now(&self) -> Result<Timestamp, TimegateError>;
    async fn authority(&self) -> Result<AuthorityConfig, TimegateError>;
    async fn min_delay(&self) -> Result<u64, TimegateError>;
    async fn operation(&self, id: &OperationId) -> Result<Option<OperationRecord>, TimegateError>;
    async fn operation_state(&self, id: &OperationId) -> Result<OperationState, TimegateError>;
    async fn is_ready(&self, id: &OperationId) -> Result<bool, TimegateError>;
    async fn nonce(&self, address: &Address) -> Result<Nonce, TimegateError>;
    async fn unit(&self, address: &Address) -> Result<Option<DeployedUnit>, TimegateError>;
    async fn implementation(
        &self,
        address: &Address,
    ) -> Result<Option<ImplementationUnit>, TimegateError>;
    async fn implementation_by_code_hash(
        &self,
        hash: &H256,
    ) -> Result<Option<ImplementationUnit>, TimegateError>;
    async fn version_of(&self, proxy: &Address) -> Result<u64, TimegateError>;
    async fn submit(&self, call: &SignedCall) -> Result<Receipt, TimegateError>;
}

/// Sign `body` with the signer's next nonce and submit it exactly once.
pub(crate) async fn submit_signed(
    ledger: &dyn Ledger,
    signer: &KeyPair,
    retry: &RetryPolicy,
    body: CallBody,
) -> Result<Receipt, TimegateError> {
    let address = signer.address;
    let nonce = retry.read("nonce", || ledger.nonce(&address)).await?;
    let call = signer.sign_call(nonce, body)?;
    ledger.submit(&call).await
}

// ── RpcLedger ─────────────────────────────────────────────────────────────────

/// JSON-RPC 2.0 client for a running `timegate-node`.
///
/// Raw HTTP POST with serde_json. Failures the node reports come back as the
/// typed error carried in the error object's `data`; anything that prevents
/// a well-formed reply is a `Transport` error.
pub struct RpcLedger {
    url: String,
    client: reqwest::Client,
}

impl RpcLedger {
    pub fn new(url: &str) -> Result<Self, TimegateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .build()
            .map_err(|e| TimegateError::Configuration(format!("building HTTP client: {e}")))?;
        Ok(Self { url: url.to_string(), client })
    }

    /// Call a JSON-RPC method and decode the `result` field.
    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<T, TimegateError> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });
        debug!(method, "ledger RPC");

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TimegateError::Transport(format!("{method} to {}: {e}", self.url)))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| TimegateError::Transport(format!("{method}: unreadable reply: {e}")))?;

        if let Some(err) = json.get("error") {
            return Err(decode_rpc_error(err));
        }

        serde_json::from_value(json["result"].clone())
            .map_err(|e| TimegateError::Serialization(format!("{method} result: {e}")))
    }
}

/// Rebuild the typed error from a JSON-RPC error object.
fn decode_rpc_error(err: &serde_json::Value) -> TimegateError {
    if let Some(data) = err.get("data") {
        if let Ok(typed) = serde_json::from_value::<TimegateError>(data.clone()) {
            return typed;
        }
    }
    let message = err["message"].as_str().unwrap_or("unknown RPC error");
    TimegateError::Other(format!("RPC error {}: {message}", err["code"]))
}

#[async_trait]
impl Ledger for RpcLedger {
    async fn now(&self) -> Result<Timestamp, TimegateError> {
        self.call("timegate_getTime", serde_json::json!([])).await
    }

    async fn authority(&self) -> Result<AuthorityConfig, TimegateError> {
        self.call("timegate_getAuthority", serde_json::json!([])).await
    }

    async fn min_delay(&self) -> Result<u64, TimegateError> {
        self.call("timegate_getMinDelay", serde_json::json!([])).await
    }

    async fn operation(&self, id: &OperationId) -> Result<Option<OperationRecord>, TimegateError> {
        let op: Option<RpcOperation> =
            self.call("timegate_getOperation", serde_json::json!([id.to_hex()])).await?;
        Ok(op.map(|o| o.record))
    }

    async fn operation_state(&self, id: &OperationId) -> Result<OperationState, TimegateError> {
        self.call("timegate_getOperationState", serde_json::json!([id.to_hex()])).await
    }

    async fn is_ready(&self, id: &OperationId) -> Result<bool, TimegateError> {
        self.call("timegate_isOperationReady", serde_json::json!([id.to_hex()])).await
    }

    async fn nonce(&self, address: &Address) -> Result<Nonce, TimegateError> {
        self.call("timegate_getNonce", serde_json::json!([address.to_hex()])).await
    }

    async fn unit(&self, address: &Address) -> Result<Option<DeployedUnit>, TimegateError> {
        self.call("timegate_getUnit", serde_json::json!([address.to_hex()])).await
    }

    async fn implementation(
        &self,
        address: &Address,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        self.call("timegate_getImplementation", serde_json::json!([address.to_hex()])).await
    }

    async fn implementation_by_code_hash(
        &self,
        hash: &H256,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        self.call("timegate_getImplementationByCodeHash", serde_json::json!([hash.to_hex()]))
            .await
    }

    async fn version_of(&self, proxy: &Address) -> Result<u64, TimegateError> {
        self.call("timegate_getVersion", serde_json::json!([proxy.to_hex()])).await
    }

    async fn submit(&self, call: &SignedCall) -> Result<Receipt, TimegateError> {
        self.call("timegate_submitCall", serde_json::json!([call.to_hex()?])).await
    }
}

// ── LocalLedger ───────────────────────────────────────────────────────────────

/// In-process ledger over an [`AuthorityEngine`]; used by tests and tools
/// that open the authority database directly.
pub struct LocalLedger {
    engine: Arc<AuthorityEngine>,
    clock: Arc<dyn Clock>,
}

impl LocalLedger {
    pub fn new(engine: Arc<AuthorityEngine>, clock: Arc<dyn Clock>) -> Self {
        Self { engine, clock }
    }
}

#[async_trait]
impl Ledger for LocalLedger {
    async fn now(&self) -> Result<Timestamp, TimegateError> {
        Ok(self.clock.now())
    }

    async fn authority(&self) -> Result<AuthorityConfig, TimegateError> {
        self.engine.authority()
    }

    async fn min_delay(&self) -> Result<u64, TimegateError> {
        self.engine.min_delay()
    }

    async fn operation(&self, id: &OperationId) -> Result<Option<OperationRecord>, TimegateError> {
        self.engine.operation(id)
    }

    async fn operation_state(&self, id: &OperationId) -> Result<OperationState, TimegateError> {
        self.engine.operation_state(id, self.clock.now())
    }

    async fn is_ready(&self, id: &OperationId) -> Result<bool, TimegateError> {
        self.engine.is_ready(id, self.clock.now())
    }

    async fn nonce(&self, address: &Address) -> Result<Nonce, TimegateError> {
        self.engine.nonce(address)
    }

    async fn unit(&self, address: &Address) -> Result<Option<DeployedUnit>, TimegateError> {
        self.engine.unit(address)
    }

    async fn implementation(
        &self,
        address: &Address,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        self.engine.implementation(address)
    }

    async fn implementation_by_code_hash(
        &self,
        hash: &H256,
    ) -> Result<Option<ImplementationUnit>, TimegateError> {
        self.engine.implementation_by_code_hash(hash)
    }

    async fn version_of(&self, proxy: &Address) -> Result<u64, TimegateError> {
        self.engine.version_of(proxy)
    }

    async fn submit(&self, call: &SignedCall) -> Result<Receipt, TimegateError> {
        self.engine.apply(call, self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_error_is_rebuilt_from_data() {
        let original = TimegateError::DelayTooShort { delay: 5, min_delay: 120 };
        let err = serde_json::json!({
            "code": original.rpc_code(),
            "message": original.to_string(),
            "data": original.clone(),
        });
        assert_eq!(decode_rpc_error(&err), original);
    }

    #[test]
    fn untyped_error_falls_back_to_message() {
        let err = serde_json::json!({ "code": -32601, "message": "Method not found" });
        match decode_rpc_error(&err) {
            TimegateError::Other(msg) => assert!(msg.contains("Method not found")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_node_is_a_transport_error() {
        let ledger = RpcLedger::new("http://127.0.0.1:1").unwrap();
        let err = ledger.min_delay().await.unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }
}
