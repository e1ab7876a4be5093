use timegate_core::abi;
use timegate_core::operation::Operation;
use timegate_core::types::{Address, Nonce, OperationId, H256};

pub use timegate_core::abi::keccak256;

/// Operation identity: keccak256 of the canonical ABI encoding of
/// `(target, value, payload, predecessor, salt)`.
///
/// Pure and deterministic; the authority keys its bookkeeping by this value
/// and clients recompute it to detect an already-scheduled upgrade.
pub fn operation_id(op: &Operation) -> OperationId {
    H256(keccak256(&abi::encode_operation(op)))
}

/// keccak256 of a UTF-8 label, e.g. the default upgrade salt.
pub fn label_hash(label: &str) -> H256 {
    H256(keccak256(label.as_bytes()))
}

/// Account address: the last 20 bytes of keccak256(public key).
pub fn address_from_pubkey(pubkey_bytes: &[u8]) -> Address {
    let h = keccak256(pubkey_bytes);
    let mut a = [0u8; 20];
    a.copy_from_slice(&h[12..]);
    Address(a)
}

/// Address of a unit deployed by `deployer` with its `nonce`th call.
pub fn create_address(deployer: &Address, nonce: Nonce) -> Address {
    let mut preimage = Vec::with_capacity(28);
    preimage.extend_from_slice(deployer.as_bytes());
    preimage.extend_from_slice(&nonce.to_be_bytes());
    let h = keccak256(&preimage);
    let mut a = [0u8; 20];
    a.copy_from_slice(&h[12..]);
    Address(a)
}

/// BLAKE3 content hash of deployed bytecode.
pub fn code_hash(code: &[u8]) -> H256 {
    H256(*blake3::hash(code).as_bytes())
}
