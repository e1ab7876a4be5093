use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use timegate_core::authority::AuthorityConfig;
use timegate_core::call::Receipt;
use timegate_core::operation::OperationState;
use timegate_core::types::Timestamp;
use timegate_core::unit::{DeployedUnit, ImplementationUnit};

use crate::types::{RpcNodeInfo, RpcOperation};

/// Timegate JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "timegate_" via `namespace = "timegate"`.
/// Ids and addresses are `0x`-prefixed hex strings.
#[rpc(server, namespace = "timegate")]
pub trait TimegateApi {
    #[method(name = "getTime")]
    async fn get_time(&self) -> RpcResult<Timestamp>;

    #[method(name = "getNodeInfo")]
    async fn get_node_info(&self) -> RpcResult<RpcNodeInfo>;

    #[method(name = "getAuthority")]
    async fn get_authority(&self) -> RpcResult<AuthorityConfig>;

    #[method(name = "getMinDelay")]
    async fn get_min_delay(&self) -> RpcResult<u64>;

    /// Stored record for `id`, or null if the id was never scheduled
    /// (or was cancelled under the reuse policy).
    #[method(name = "getOperation")]
    async fn get_operation(&self, id: String) -> RpcResult<Option<RpcOperation>>;

    #[method(name = "getOperationState")]
    async fn get_operation_state(&self, id: String) -> RpcResult<OperationState>;

    #[method(name = "isOperationReady")]
    async fn is_operation_ready(&self, id: String) -> RpcResult<bool>;

    /// Every known operation, newest first.
    #[method(name = "listOperations")]
    async fn list_operations(&self) -> RpcResult<Vec<RpcOperation>>;

    #[method(name = "getNonce")]
    async fn get_nonce(&self, address: String) -> RpcResult<u64>;

    #[method(name = "getUnit")]
    async fn get_unit(&self, address: String) -> RpcResult<Option<DeployedUnit>>;

    #[method(name = "getImplementation")]
    async fn get_implementation(&self, address: String) -> RpcResult<Option<ImplementationUnit>>;

    /// Earliest implementation deployed with this code hash, if any.
    #[method(name = "getImplementationByCodeHash")]
    async fn get_implementation_by_code_hash(
        &self,
        code_hash: String,
    ) -> RpcResult<Option<ImplementationUnit>>;

    /// Version marker reported by the proxy at `proxy`.
    #[method(name = "getVersion")]
    async fn get_version(&self, proxy: String) -> RpcResult<u64>;

    /// Apply a signed call. `call_hex` is hex-encoded bincode(SignedCall).
    /// Returns the receipt once the state change is durable.
    #[method(name = "submitCall")]
    async fn submit_call(&self, call_hex: String) -> RpcResult<Receipt>;
}
