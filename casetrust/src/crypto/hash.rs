// SHA-256: one-shot digests and the running handshake transcript.

use sha2::{Digest, Sha256};

/// Length of a SHA-256 digest.
pub const HASH_LEN: usize = 32;

/// SHA-256 hash of `data`, returning a 32-byte digest.
pub fn hash_sha256(data: &[u8]) -> [u8; HASH_LEN] {
    Sha256::digest(data).into()
}

/// Running hash over every handshake message exchanged so far.
///
/// Messages are absorbed in send/receive order; [`TranscriptHash::current`]
/// snapshots the digest without disturbing the running state.
#[derive(Clone, Default)]
pub struct TranscriptHash {
    hasher: Sha256,
}

impl TranscriptHash {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb one complete handshake message.
    pub fn absorb(&mut self, message: &[u8]) {
        self.hasher.update(message);
    }

    /// Digest of everything absorbed so far.
    pub fn current(&self) -> [u8; HASH_LEN] {
        self.hasher.clone().finalize().into()
    }
}
