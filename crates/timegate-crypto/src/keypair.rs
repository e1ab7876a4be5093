use std::path::Path;

use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use timegate_core::call::{CallBody, SignedCall};
use timegate_core::error::TimegateError;
use timegate_core::types::{Address, DilithiumPublicKey, DilithiumSignature, Nonce};

use crate::hash::address_from_pubkey;

/// A signing credential: Dilithium2 public + secret keys with the derived
/// ledger address.
///
/// The secret key is wiped from memory on drop.
pub struct KeyPair {
    pub address: Address,
    pub public_key: DilithiumPublicKey,
    secret_key: Vec<u8>,
}

/// On-disk JSON form of a keypair.
#[derive(Serialize, Deserialize)]
struct Keyfile {
    address: String,
    public_key: String,
    secret_key: String,
}

impl KeyPair {
    /// Generate a fresh Dilithium2 keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        Self::from_raw(pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
    }

    /// Restore a KeyPair from raw bytes.
    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        let address = address_from_pubkey(&pk_bytes);
        Self {
            address,
            public_key: DilithiumPublicKey(pk_bytes),
            secret_key: sk_bytes,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Result<DilithiumSignature, TimegateError> {
        let sk = Zeroizing::new(self.secret_key.clone());
        crate::dilithium::sign(&sk, message).map_err(|e| TimegateError::Configuration(e.to_string()))
    }

    /// Bind `body` to this key and `nonce`, and sign it.
    pub fn sign_call(&self, nonce: Nonce, body: CallBody) -> Result<SignedCall, TimegateError> {
        let message = SignedCall::signing_bytes(&self.public_key, nonce, &body)?;
        let signature = self.sign(&message)?;
        Ok(SignedCall {
            caller: self.public_key.clone(),
            nonce,
            body,
            signature,
        })
    }

    /// Write the keypair as JSON. The file holds the secret key in clear.
    pub fn save(&self, path: &Path) -> Result<(), TimegateError> {
        let file = Keyfile {
            address: self.address.to_hex(),
            public_key: hex::encode(&self.public_key.0),
            secret_key: hex::encode(&self.secret_key),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| TimegateError::Serialization(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| TimegateError::Storage(e.to_string()))?;
        }
        std::fs::write(path, json).map_err(|e| TimegateError::Storage(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self, TimegateError> {
        let json = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
            TimegateError::Configuration(format!("reading keyfile {}: {e}", path.display()))
        })?);
        let file: Keyfile = serde_json::from_str(&json)
            .map_err(|e| TimegateError::Configuration(format!("parsing keyfile: {e}")))?;
        let pk = hex::decode(&file.public_key)
            .map_err(|e| TimegateError::Configuration(format!("keyfile public key: {e}")))?;
        let sk = hex::decode(&file.secret_key)
            .map_err(|e| TimegateError::Configuration(format!("keyfile secret key: {e}")))?;
        if dilithium2::SecretKey::from_bytes(&sk).is_err() {
            return Err(TimegateError::Configuration("keyfile secret key has wrong length".into()));
        }
        Ok(Self::from_raw(pk, sk))
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ address: {} }}", self.address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyfile_round_trip() {
        let path = std::env::temp_dir().join("timegate_keypair_test/key.json");
        let _ = std::fs::remove_file(&path);
        let kp = KeyPair::generate();
        kp.save(&path).unwrap();
        let loaded = KeyPair::load(&path).unwrap();
        assert_eq!(loaded.address, kp.address);
        assert_eq!(loaded.public_key, kp.public_key);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn missing_keyfile_is_a_configuration_error() {
        let err = KeyPair::load(Path::new("/nonexistent/timegate/key.json")).unwrap_err();
        assert!(matches!(err, TimegateError::Configuration(_)));
    }
}
