use doin_types::{PeerId, Signature};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    SignatureVerificationFailed,

    #[error("Key file error: {0}")]
    KeyFile(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;

/// A peer's cryptographic identity.
///
/// The peer id is the raw ed25519 public key, so signature verification
/// needs nothing beyond the id itself.
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self {
            signing_key: SigningKey::from_bytes(&secret),
        }
    }

    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(secret),
        }
    }

    /// Load the identity from a hex key file, or generate and persist one.
    /// Keeps the same peer id across restarts.
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            let hex_str = fs::read_to_string(path)
                .map_err(|e| CryptoError::KeyFile(e.to_string()))?;
            let bytes = hex::decode(hex_str.trim())
                .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
            if bytes.len() != 32 {
                return Err(CryptoError::InvalidKey(format!(
                    "expected 32 key bytes, got {}",
                    bytes.len()
                )));
            }
            let mut secret = [0u8; 32];
            secret.copy_from_slice(&bytes);
            Ok(Self::from_bytes(&secret))
        } else {
            let keypair = Self::generate();
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).map_err(|e| CryptoError::KeyFile(e.to_string()))?;
            }
            fs::write(path, hex::encode(keypair.signing_key.to_bytes()))
                .map_err(|e| CryptoError::KeyFile(e.to_string()))?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
            }
            Ok(keypair)
        }
    }

    pub fn peer_id(&self) -> PeerId {
        PeerId::from_bytes(self.signing_key.verifying_key().to_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        let sig = self.signing_key.sign(message);
        Signature::new(sig.to_bytes().to_vec())
    }
}

/// Verify a signature against the signer's peer id.
pub fn verify_signature(peer_id: &PeerId, message: &[u8], signature: &Signature) -> bool {
    let Ok(verifying_key) = VerifyingKey::from_bytes(peer_id.as_bytes()) else {
        return false;
    };
    let Ok(sig_bytes) = <[u8; 64]>::try_from(signature.as_bytes()) else {
        return false;
    };
    let sig = ed25519_dalek::Signature::from_bytes(&sig_bytes);
    verifying_key.verify(message, &sig).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let keypair = Keypair::generate();
        let message = b"commit:quadratic";
        let sig = keypair.sign(message);
        assert!(verify_signature(&keypair.peer_id(), message, &sig));
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let keypair = Keypair::generate();
        let sig = keypair.sign(b"original");
        assert!(!verify_signature(&keypair.peer_id(), b"tampered", &sig));
    }

    #[test]
    fn test_verify_rejects_wrong_signer() {
        let alice = Keypair::generate();
        let bob = Keypair::generate();
        let sig = alice.sign(b"message");
        assert!(!verify_signature(&bob.peer_id(), b"message", &sig));
    }

    #[test]
    fn test_verify_rejects_malformed_signature() {
        let keypair = Keypair::generate();
        assert!(!verify_signature(
            &keypair.peer_id(),
            b"message",
            &Signature::new(vec![1, 2, 3])
        ));
    }

    #[test]
    fn test_load_or_generate_persists_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.key");

        let first = Keypair::load_or_generate(&path).unwrap();
        let second = Keypair::load_or_generate(&path).unwrap();
        assert_eq!(first.peer_id(), second.peer_id());
    }
}
