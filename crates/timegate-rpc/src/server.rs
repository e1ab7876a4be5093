use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tracing::{info, warn};

use timegate_core::authority::AuthorityConfig;
use timegate_core::call::{Receipt, SignedCall};
use timegate_core::clock::Clock;
use timegate_core::error::TimegateError;
use timegate_core::operation::OperationState;
use timegate_core::types::{Address, OperationId, Timestamp, H256};
use timegate_core::unit::{DeployedUnit, ImplementationUnit};
use timegate_state::AuthorityEngine;

use crate::api::TimegateApiServer;
use crate::types::{RpcNodeInfo, RpcOperation};

/// Every failure leaves with its stable code and the typed error as `data`.
fn rpc_err(err: TimegateError) -> ErrorObject<'static> {
    ErrorObject::owned(err.rpc_code(), err.to_string(), Some(err))
}

fn parse_id(s: &str) -> Result<OperationId, ErrorObject<'static>> {
    OperationId::from_hex(s)
        .map_err(|e| rpc_err(TimegateError::Serialization(format!("invalid operation id: {e}"))))
}

fn parse_address(s: &str) -> Result<Address, ErrorObject<'static>> {
    Address::from_hex(s)
        .map_err(|e| rpc_err(TimegateError::Serialization(format!("invalid address: {e}"))))
}

/// Shared state passed to the RPC server.
pub struct RpcServerState {
    pub engine: Arc<AuthorityEngine>,
    /// Ledger time. Readiness is always judged against this clock, never
    /// the caller's.
    pub clock: Arc<dyn Clock>,
}

/// The RPC server implementation.
pub struct RpcServer {
    state: Arc<RpcServerState>,
}

impl RpcServer {
    pub fn new(state: Arc<RpcServerState>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr`. Returns the bound address and a
    /// handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<(SocketAddr, ServerHandle)> {
        let server = Server::builder().build(addr).await?;
        let local = server.local_addr()?;
        let handle = server.start(self.into_rpc());
        info!(addr = %local, "RPC server started");
        Ok((local, handle))
    }

    fn now(&self) -> Timestamp {
        self.state.clock.now()
    }
}

#[async_trait]
impl TimegateApiServer for RpcServer {
    async fn get_time(&self) -> RpcResult<Timestamp> {
        Ok(self.now())
    }

    async fn get_node_info(&self) -> RpcResult<RpcNodeInfo> {
        let engine = &self.state.engine;
        let authority = engine.authority().map_err(rpc_err)?;
        let operations = engine.db.iter_operations().map_err(rpc_err)?.len();
        Ok(RpcNodeInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            authority: authority.address,
            now: self.now(),
            operations,
        })
    }

    async fn get_authority(&self) -> RpcResult<AuthorityConfig> {
        self.state.engine.authority().map_err(rpc_err)
    }

    async fn get_min_delay(&self) -> RpcResult<u64> {
        self.state.engine.min_delay().map_err(rpc_err)
    }

    async fn get_operation(&self, id: String) -> RpcResult<Option<RpcOperation>> {
        let id = parse_id(&id)?;
        let now = self.now();
        let record = self.state.engine.operation(&id).map_err(rpc_err)?;
        Ok(record.map(|r| RpcOperation::new(r, now)))
    }

    async fn get_operation_state(&self, id: String) -> RpcResult<OperationState> {
        let id = parse_id(&id)?;
        self.state.engine.operation_state(&id, self.now()).map_err(rpc_err)
    }

    async fn is_operation_ready(&self, id: String) -> RpcResult<bool> {
        let id = parse_id(&id)?;
        self.state.engine.is_ready(&id, self.now()).map_err(rpc_err)
    }

    async fn list_operations(&self) -> RpcResult<Vec<RpcOperation>> {
        let now = self.now();
        let mut ops: Vec<RpcOperation> = self
            .state
            .engine
            .db
            .iter_operations()
            .map_err(rpc_err)?
            .into_iter()
            .map(|r| RpcOperation::new(r, now))
            .collect();
        ops.sort_by(|a, b| b.record.scheduled_at.cmp(&a.record.scheduled_at));
        Ok(ops)
    }

    async fn get_nonce(&self, address: String) -> RpcResult<u64> {
        let address = parse_address(&address)?;
        self.state.engine.nonce(&address).map_err(rpc_err)
    }

    async fn get_unit(&self, address: String) -> RpcResult<Option<DeployedUnit>> {
        let address = parse_address(&address)?;
        self.state.engine.unit(&address).map_err(rpc_err)
    }

    async fn get_implementation(&self, address: String) -> RpcResult<Option<ImplementationUnit>> {
        let address = parse_address(&address)?;
        self.state.engine.implementation(&address).map_err(rpc_err)
    }

    async fn get_implementation_by_code_hash(
        &self,
        code_hash: String,
    ) -> RpcResult<Option<ImplementationUnit>> {
        let hash = H256::from_hex(&code_hash)
            .map_err(|e| rpc_err(TimegateError::Serialization(format!("invalid code hash: {e}"))))?;
        self.state.engine.implementation_by_code_hash(&hash).map_err(rpc_err)
    }

    async fn get_version(&self, proxy: String) -> RpcResult<u64> {
        let proxy = parse_address(&proxy)?;
        self.state.engine.version_of(&proxy).map_err(rpc_err)
    }

    async fn submit_call(&self, call_hex: String) -> RpcResult<Receipt> {
        let call = SignedCall::from_hex(&call_hex).map_err(rpc_err)?;
        let name = call.body.name();
        match self.state.engine.apply(&call, self.now()) {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                warn!(call = name, error = %e, "RPC: submitCall rejected");
                Err(rpc_err(e))
            }
        }
    }
}
