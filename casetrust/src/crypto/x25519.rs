// X25519 Diffie-Hellman for the handshake's ephemeral key agreement.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroizing;

use crate::error::{CaseTrustError, Result};

/// Length of an X25519 public key on the wire.
pub const EPHEMERAL_KEY_LEN: usize = 32;

/// An X25519 ephemeral keypair for one handshake. The secret half is wiped
/// when the keypair is dropped.
pub struct EphemeralKeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl EphemeralKeyPair {
    /// Generate a new random ephemeral keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Create from existing secret bytes (used in deterministic tests).
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The 32-byte public key.
    pub fn public_key_bytes(&self) -> [u8; EPHEMERAL_KEY_LEN] {
        *self.public.as_bytes()
    }

    /// Perform Diffie-Hellman with a peer's public key.
    ///
    /// Fails if the peer key is a low-order point, which would make the
    /// shared secret independent of our secret.
    pub fn diffie_hellman(
        &self,
        peer_public: &[u8; EPHEMERAL_KEY_LEN],
    ) -> Result<Zeroizing<[u8; 32]>> {
        let peer_pk = PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer_pk);
        if !shared.was_contributory() {
            return Err(CaseTrustError::InvalidKey(
                "peer ephemeral key is a low-order point".into(),
            ));
        }
        Ok(Zeroizing::new(*shared.as_bytes()))
    }
}
