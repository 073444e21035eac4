// HKDF-SHA-256 key schedule for the three-message handshake.
//
// ```text
// S2K  = HKDF(shared, IPK || init_nonce || resp_nonce || resp_eph || TH(m1), "Sigma2")
// S3K  = HKDF(shared, IPK || TH(m1 || m2),                                 "Sigma3")
// keys = HKDF(shared, IPK || TH(m1 || m2 || m3),                           "SessionKeys")
//        -> i2r_key (32) || r2i_key (32) || attestation_challenge (16)
// ```

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::crypto::aead::KEY_LEN;
use crate::crypto::hash::HASH_LEN;
use crate::crypto::x25519::EPHEMERAL_KEY_LEN;
use crate::error::{CaseTrustError, Result};

/// Length of the identity protection key (the pre-shared salt).
pub const IPK_LEN: usize = 16;

/// Length of the handshake nonces carried in Msg1 / Msg2.
pub const NONCE_LEN: usize = 32;

/// Length of the attestation challenge derived alongside the traffic keys.
pub const ATTESTATION_CHALLENGE_LEN: usize = 16;

const SIGMA2_INFO: &[u8] = b"Sigma2";
const SIGMA3_INFO: &[u8] = b"Sigma3";
const SESSION_KEYS_INFO: &[u8] = b"SessionKeys";

/// Session key material produced by a successful handshake.
///
/// Wiped on drop. `Debug` never prints key bytes.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    /// Key protecting initiator -> responder traffic.
    pub initiator_to_responder: [u8; KEY_LEN],
    /// Key protecting responder -> initiator traffic.
    pub responder_to_initiator: [u8; KEY_LEN],
    /// Challenge both sides can use to bind later attestation to this session.
    pub attestation_challenge: [u8; ATTESTATION_CHALLENGE_LEN],
}

impl fmt::Debug for SessionKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionKeys").finish_non_exhaustive()
    }
}

/// HKDF-Extract-then-Expand with SHA-256, filling `okm`.
pub fn hkdf_sha256(ikm: &[u8], salt: &[u8], info: &[u8], okm: &mut [u8]) -> Result<()> {
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, okm)
        .map_err(|e| CaseTrustError::KeyDerivation(format!("HKDF expand error: {e}")))
}

/// Derive the key protecting the Msg2 encrypted block.
pub fn derive_sigma2_key(
    shared_secret: &[u8; 32],
    ipk: &[u8; IPK_LEN],
    initiator_nonce: &[u8; NONCE_LEN],
    responder_nonce: &[u8; NONCE_LEN],
    responder_ephemeral: &[u8; EPHEMERAL_KEY_LEN],
    transcript: &[u8; HASH_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let mut salt = Vec::with_capacity(IPK_LEN + 2 * NONCE_LEN + EPHEMERAL_KEY_LEN + HASH_LEN);
    salt.extend_from_slice(ipk);
    salt.extend_from_slice(initiator_nonce);
    salt.extend_from_slice(responder_nonce);
    salt.extend_from_slice(responder_ephemeral);
    salt.extend_from_slice(transcript);

    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    hkdf_sha256(shared_secret, &salt, SIGMA2_INFO, &mut key[..])?;
    Ok(key)
}

/// Derive the key protecting the Msg3 encrypted block.
pub fn derive_sigma3_key(
    shared_secret: &[u8; 32],
    ipk: &[u8; IPK_LEN],
    transcript: &[u8; HASH_LEN],
) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let salt = transcript_salt(ipk, transcript);
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    hkdf_sha256(shared_secret, &salt, SIGMA3_INFO, &mut key[..])?;
    Ok(key)
}

/// Derive the final bidirectional session keys over the full transcript.
pub fn derive_session_keys(
    shared_secret: &[u8; 32],
    ipk: &[u8; IPK_LEN],
    transcript: &[u8; HASH_LEN],
) -> Result<SessionKeys> {
    let salt = transcript_salt(ipk, transcript);
    let mut okm = Zeroizing::new([0u8; 2 * KEY_LEN + ATTESTATION_CHALLENGE_LEN]);
    hkdf_sha256(shared_secret, &salt, SESSION_KEYS_INFO, &mut okm[..])?;

    let mut keys = SessionKeys {
        initiator_to_responder: [0u8; KEY_LEN],
        responder_to_initiator: [0u8; KEY_LEN],
        attestation_challenge: [0u8; ATTESTATION_CHALLENGE_LEN],
    };
    keys.initiator_to_responder.copy_from_slice(&okm[..KEY_LEN]);
    keys.responder_to_initiator
        .copy_from_slice(&okm[KEY_LEN..2 * KEY_LEN]);
    keys.attestation_challenge
        .copy_from_slice(&okm[2 * KEY_LEN..]);
    Ok(keys)
}

fn transcript_salt(ipk: &[u8; IPK_LEN], transcript: &[u8; HASH_LEN]) -> Vec<u8> {
    let mut salt = Vec::with_capacity(IPK_LEN + HASH_LEN);
    salt.extend_from_slice(ipk);
    salt.extend_from_slice(transcript);
    salt
}
