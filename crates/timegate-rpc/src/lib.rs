//! timegate-rpc
//!
//! JSON-RPC 2.0 front of a ledger node hosting the controlling authority.
//!
//! Namespace: "timegate"
//! Methods:
//!   timegate_getTime           : the node clock (unix seconds)
//!   timegate_getNodeInfo       : node version, authority address, operation count
//!   timegate_getAuthority      : delay, role table and policies
//!   timegate_getMinDelay       : current minimum delay in seconds
//!   timegate_getOperation      : stored record plus derived state
//!   timegate_getOperationState : Unscheduled/Scheduled/Ready/Executed/Cancelled
//!   timegate_isOperationReady  : scheduled and ready time reached
//!   timegate_listOperations    : every known operation, newest first
//!   timegate_getNonce          : next expected call nonce for an address
//!   timegate_getUnit           : deployed proxy unit
//!   timegate_getImplementation : deployed implementation unit
//!   timegate_getImplementationByCodeHash: reuse lookup for prepare
//!   timegate_getVersion        : version marker a proxy reports
//!   timegate_submitCall        : apply a signed call (hex-encoded bincode)
//!
//! Failures carry the typed `TimegateError` as the error object's `data`.

pub mod api;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerState};
pub use types::{RpcNodeInfo, RpcOperation};
