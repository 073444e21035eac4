// Ed25519 identity keypairs, key identifiers, signature verification.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use crate::error::{CaseTrustError, Result};

/// Length of an Ed25519 public key.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Length of an Ed25519 signature.
pub const SIGNATURE_LEN: usize = 64;

/// Length of a subject / authority key identifier.
pub const KEY_ID_LEN: usize = 20;

/// 20-byte key identifier carried in certificate key-id extensions and used
/// on the wire to name trusted roots.
pub type KeyId = [u8; KEY_ID_LEN];

/// A long-term Ed25519 identity keypair.
#[derive(Debug)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
}

impl IdentityKeyPair {
    /// Generate a fresh random Ed25519 keypair.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Reconstruct from a 32-byte secret seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// The 32-byte Ed25519 public key.
    pub fn public_key_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.verifying_key.to_bytes()
    }

    /// Key identifier of this keypair's public key.
    pub fn key_id(&self) -> KeyId {
        key_id(&self.public_key_bytes())
    }

    /// Sign arbitrary data.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        let sig: Signature = self.signing_key.sign(data);
        sig.to_bytes()
    }

    /// Verify a signature against the public key.
    pub fn verify(&self, data: &[u8], signature: &[u8; SIGNATURE_LEN]) -> Result<()> {
        let sig = Signature::from_bytes(signature);
        self.verifying_key
            .verify(data, &sig)
            .map_err(|_| CaseTrustError::SignatureInvalid)
    }
}

/// Derive a key identifier from a public key:
/// first 20 bytes of SHA-256(public_key).
pub fn key_id(public_key: &[u8; PUBLIC_KEY_LEN]) -> KeyId {
    let hash = Sha256::digest(public_key);
    let mut id = [0u8; KEY_ID_LEN];
    id.copy_from_slice(&hash[..KEY_ID_LEN]);
    id
}

/// Verify a signature given raw public key bytes, message, and signature bytes.
pub fn verify_signature(
    pubkey_bytes: &[u8; PUBLIC_KEY_LEN],
    message: &[u8],
    signature: &[u8; SIGNATURE_LEN],
) -> Result<()> {
    let vk = VerifyingKey::from_bytes(pubkey_bytes)
        .map_err(|e| CaseTrustError::InvalidKey(format!("{e}")))?;
    let sig = Signature::from_bytes(signature);
    vk.verify(message, &sig)
        .map_err(|_| CaseTrustError::SignatureInvalid)
}
