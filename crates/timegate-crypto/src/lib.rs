pub mod dilithium;
pub mod hash;
pub mod keypair;

pub use dilithium::{verify_call, verify_signature};
pub use hash::{address_from_pubkey, keccak256, label_hash, operation_id};
pub use keypair::KeyPair;
