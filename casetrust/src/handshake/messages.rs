// Handshake wire messages.
//
// The message type is carried by the transport next to the payload; payloads
// themselves are untagged. All integers are little-endian.
//
//   Msg1   nonce(32) root_count(2) root_id(20)*count ephemeral(32) conn_id(2)
//   Msg2   nonce(32) chosen_root(20) ephemeral(32) | AEAD(signed block) tag(16)
//   Msg3   AEAD(signed block) tag(16)
//   Error  code(1)
//
//   signed block = cert_len(2) cert(cert_len) signature(64) conn_id(2)

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::cert::TrustRootId;
use crate::crypto::aead::TAG_LEN;
use crate::crypto::kdf::NONCE_LEN;
use crate::crypto::keys::{KEY_ID_LEN, SIGNATURE_LEN};
use crate::crypto::x25519::EPHEMERAL_KEY_LEN;
use crate::error::{CaseTrustError, Result};

/// Most trust roots an initiator may offer in Msg1.
pub const MAX_TRUST_ROOTS: usize = 8;

/// AEAD nonce for the Msg2 block. Each handshake key encrypts exactly once.
pub const SIGMA2_NONCE: [u8; 12] = *b"CASE_Sigma2N";

/// AEAD nonce for the Msg3 block.
pub const SIGMA3_NONCE: [u8; 12] = *b"CASE_Sigma3N";

/// The only code ever sent in an error message.
pub const GENERIC_ERROR_CODE: u8 = 0x01;

/// Opcodes for the handshake messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Msg1 = 0x30,
    Msg2 = 0x31,
    Msg3 = 0x32,
    Error = 0x40,
}

impl TryFrom<u8> for MessageType {
    type Error = CaseTrustError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x30 => Ok(MessageType::Msg1),
            0x31 => Ok(MessageType::Msg2),
            0x32 => Ok(MessageType::Msg3),
            0x40 => Ok(MessageType::Error),
            other => Err(CaseTrustError::UnknownMessageType(other)),
        }
    }
}

/// A message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub msg_type: MessageType,
    pub payload: Bytes,
}

fn ensure_len(data: &[u8], needed: usize, context: &str) -> Result<()> {
    if data.len() < needed {
        return Err(CaseTrustError::MalformedMessage(format!(
            "{context}: need {needed} bytes, have {}",
            data.len()
        )));
    }
    Ok(())
}

fn ensure_consumed(data: &[u8], context: &str) -> Result<()> {
    if !data.is_empty() {
        return Err(CaseTrustError::MalformedMessage(format!(
            "{context}: {} trailing bytes",
            data.len()
        )));
    }
    Ok(())
}

fn take<const N: usize>(data: &mut &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    data.copy_to_slice(&mut out);
    out
}

// ── Msg1 ─────────────────────────────────────────────────────────────────

/// Initiator hello: nonce, offered trust roots, ephemeral key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg1 {
    pub initiator_nonce: [u8; NONCE_LEN],
    pub trusted_roots: Vec<TrustRootId>,
    pub initiator_ephemeral: [u8; EPHEMERAL_KEY_LEN],
    pub initiator_connection_id: u16,
}

impl Msg1 {
    pub fn encoded_len(&self) -> usize {
        NONCE_LEN + 2 + self.trusted_roots.len() * KEY_ID_LEN + EPHEMERAL_KEY_LEN + 2
    }

    pub fn encode(&self) -> Result<Bytes> {
        if self.trusted_roots.is_empty() || self.trusted_roots.len() > MAX_TRUST_ROOTS {
            return Err(CaseTrustError::InvalidArgument(format!(
                "Msg1 offers {} trust roots, allowed 1..={MAX_TRUST_ROOTS}",
                self.trusted_roots.len()
            )));
        }
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.initiator_nonce);
        buf.put_u16_le(self.trusted_roots.len() as u16);
        for root in &self.trusted_roots {
            buf.put_slice(root);
        }
        buf.put_slice(&self.initiator_ephemeral);
        buf.put_u16_le(self.initiator_connection_id);
        Ok(buf.freeze())
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        ensure_len(data, NONCE_LEN + 2, "Msg1")?;
        let initiator_nonce = take::<NONCE_LEN>(&mut data);
        let count = data.get_u16_le() as usize;
        if count == 0 || count > MAX_TRUST_ROOTS {
            return Err(CaseTrustError::MalformedMessage(format!(
                "Msg1 trust root count {count} outside 1..={MAX_TRUST_ROOTS}"
            )));
        }

        ensure_len(data, count * KEY_ID_LEN + EPHEMERAL_KEY_LEN + 2, "Msg1 body")?;
        let trusted_roots = (0..count).map(|_| take::<KEY_ID_LEN>(&mut data)).collect();
        let initiator_ephemeral = take::<EPHEMERAL_KEY_LEN>(&mut data);
        let initiator_connection_id = data.get_u16_le();
        ensure_consumed(data, "Msg1")?;

        Ok(Msg1 {
            initiator_nonce,
            trusted_roots,
            initiator_ephemeral,
            initiator_connection_id,
        })
    }
}

// ── Msg2 ─────────────────────────────────────────────────────────────────

/// Responder reply: cleartext header plus the encrypted signed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg2 {
    pub responder_nonce: [u8; NONCE_LEN],
    pub chosen_root: TrustRootId,
    pub responder_ephemeral: [u8; EPHEMERAL_KEY_LEN],
    /// Ciphertext followed by the AEAD tag.
    pub encrypted: Bytes,
}

impl Msg2 {
    /// Length of the cleartext header, which is also the AEAD associated data.
    pub const HEADER_LEN: usize = NONCE_LEN + KEY_ID_LEN + EPHEMERAL_KEY_LEN;

    /// The cleartext header, authenticated as associated data.
    pub fn header(&self) -> [u8; Self::HEADER_LEN] {
        let mut out = [0u8; Self::HEADER_LEN];
        let mut buf = &mut out[..];
        buf.put_slice(&self.responder_nonce);
        buf.put_slice(&self.chosen_root);
        buf.put_slice(&self.responder_ephemeral);
        out
    }

    pub fn encoded_len(&self) -> usize {
        Self::HEADER_LEN + self.encrypted.len()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&self.header());
        buf.put_slice(&self.encrypted);
        buf.freeze()
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        ensure_len(data, Self::HEADER_LEN + SignedBlock::MIN_LEN + TAG_LEN, "Msg2")?;
        let responder_nonce = take::<NONCE_LEN>(&mut data);
        let chosen_root = take::<KEY_ID_LEN>(&mut data);
        let responder_ephemeral = take::<EPHEMERAL_KEY_LEN>(&mut data);
        Ok(Msg2 {
            responder_nonce,
            chosen_root,
            responder_ephemeral,
            encrypted: Bytes::copy_from_slice(data),
        })
    }
}

// ── Msg3 ─────────────────────────────────────────────────────────────────

/// Initiator finish: the encrypted signed block only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Msg3 {
    pub encrypted: Bytes,
}

impl Msg3 {
    pub fn encode(&self) -> Bytes {
        self.encrypted.clone()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        ensure_len(data, SignedBlock::MIN_LEN + TAG_LEN, "Msg3")?;
        Ok(Msg3 {
            encrypted: Bytes::copy_from_slice(data),
        })
    }
}

// ── Signed block ─────────────────────────────────────────────────────────

/// Plaintext of the Msg2 / Msg3 encrypted blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedBlock {
    /// Sender's operational certificate.
    pub certificate: Bytes,
    /// Sender's signature over the TBS data for this message.
    pub signature: [u8; SIGNATURE_LEN],
    /// Responder's connection id (sent in Msg2, echoed in Msg3).
    pub connection_id: u16,
}

impl SignedBlock {
    /// Smallest possible block (empty certificate).
    pub const MIN_LEN: usize = 2 + SIGNATURE_LEN + 2;

    pub fn encoded_len(&self) -> usize {
        Self::MIN_LEN + self.certificate.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let cert_len = u16::try_from(self.certificate.len()).map_err(|_| {
            CaseTrustError::InvalidArgument(format!(
                "certificate of {} bytes does not fit the signed block",
                self.certificate.len()
            ))
        })?;
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.put_u16_le(cert_len);
        buf.put_slice(&self.certificate);
        buf.put_slice(&self.signature);
        buf.put_u16_le(self.connection_id);
        Ok(buf)
    }

    pub fn decode(mut data: &[u8]) -> Result<Self> {
        ensure_len(data, 2, "signed block")?;
        let cert_len = data.get_u16_le() as usize;
        ensure_len(data, cert_len + SIGNATURE_LEN + 2, "signed block body")?;
        let certificate = Bytes::copy_from_slice(&data[..cert_len]);
        data.advance(cert_len);
        let signature = take::<SIGNATURE_LEN>(&mut data);
        let connection_id = data.get_u16_le();
        ensure_consumed(data, "signed block")?;
        Ok(SignedBlock {
            certificate,
            signature,
            connection_id,
        })
    }
}

/// Data signed by each side: `own_eph || cert_len || cert || peer_eph`.
/// Msg2 signs with the responder's ephemeral first, Msg3 with the
/// initiator's.
pub fn signed_data(
    own_ephemeral: &[u8; EPHEMERAL_KEY_LEN],
    certificate: &[u8],
    peer_ephemeral: &[u8; EPHEMERAL_KEY_LEN],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2 * EPHEMERAL_KEY_LEN + 2 + certificate.len());
    buf.put_slice(own_ephemeral);
    buf.put_u16_le(certificate.len() as u16);
    buf.put_slice(certificate);
    buf.put_slice(peer_ephemeral);
    buf
}

// ── Error ────────────────────────────────────────────────────────────────

/// Failure notice. Carries only a generic code; details stay local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorMsg {
    pub code: u8,
}

impl ErrorMsg {
    pub fn generic() -> Self {
        Self {
            code: GENERIC_ERROR_CODE,
        }
    }

    pub fn encode(&self) -> Bytes {
        Bytes::copy_from_slice(&[self.code])
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        match data {
            [code] => Ok(ErrorMsg { code: *code }),
            _ => Err(CaseTrustError::MalformedMessage(format!(
                "error message must be 1 byte, got {}",
                data.len()
            ))),
        }
    }
}
