// AEAD cipher suites used to protect the handshake's encrypted blocks:
// AES-256-GCM and ChaCha20-Poly1305 (RFC 8439). Both carry a 16-byte tag.

// Both aes-gcm and chacha20poly1305 re-export the same `aead` traits.
use aes_gcm::aead::{Aead, KeyInit, Nonce, Payload};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::ChaCha20Poly1305;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{CaseTrustError, Result};

/// Length of the authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Length of an AEAD nonce.
pub const NONCE_LEN: usize = 12;

/// Length of an AEAD key.
pub const KEY_LEN: usize = 32;

/// Cipher suite used for the encrypted handshake blocks. Both peers must be
/// configured with the same suite; a mismatch surfaces as a decryption
/// failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherSuite {
    /// AES-256-GCM.
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
    /// ChaCha20-Poly1305.
    #[serde(rename = "chacha20-poly1305")]
    ChaCha20Poly1305,
}

/// A single-use AEAD key bound to a cipher suite.
pub struct AeadKey {
    suite: CipherSuite,
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl AeadKey {
    /// Construct from a 32-byte key and the desired cipher suite.
    pub fn new(suite: CipherSuite, key: Zeroizing<[u8; KEY_LEN]>) -> Self {
        Self { suite, key }
    }

    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encrypt `plaintext`, returning ciphertext || 16-byte tag.
    pub fn encrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        match self.suite {
            CipherSuite::Aes256Gcm => seal::<Aes256Gcm>(&self.key[..], nonce, plaintext, aad),
            CipherSuite::ChaCha20Poly1305 => {
                seal::<ChaCha20Poly1305>(&self.key[..], nonce, plaintext, aad)
            }
        }
    }

    /// Decrypt `ciphertext` (tag appended). Any authentication failure maps
    /// to [`CaseTrustError::DecryptionFailed`].
    pub fn decrypt(
        &self,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>> {
        match self.suite {
            CipherSuite::Aes256Gcm => open::<Aes256Gcm>(&self.key[..], nonce, ciphertext, aad),
            CipherSuite::ChaCha20Poly1305 => {
                open::<ChaCha20Poly1305>(&self.key[..], nonce, ciphertext, aad)
            }
        }
    }
}

fn seal<C: KeyInit + Aead>(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    msg: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key)
        .map_err(|e| CaseTrustError::Encryption(format!("cipher init: {e}")))?;
    cipher
        .encrypt(Nonce::<C>::from_slice(nonce), Payload { msg, aad })
        .map_err(|e| CaseTrustError::Encryption(format!("{e}")))
}

fn open<C: KeyInit + Aead>(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    msg: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = C::new_from_slice(key).map_err(|_| CaseTrustError::DecryptionFailed)?;
    cipher
        .decrypt(Nonce::<C>::from_slice(nonce), Payload { msg, aad })
        .map_err(|_| CaseTrustError::DecryptionFailed)
}
