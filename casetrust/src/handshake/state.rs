// Handshake state machine states.

use std::fmt;

use zeroize::Zeroizing;

use crate::cert::TrustRootId;
use crate::crypto::hash::TranscriptHash;
use crate::crypto::kdf::NONCE_LEN;
use crate::crypto::x25519::{EphemeralKeyPair, EPHEMERAL_KEY_LEN};

/// Which side of the handshake a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Initiator,
    Responder,
}

/// Secrets held by an initiator between sending Msg1 and receiving Msg2.
pub struct InitiatorContext {
    pub(crate) ephemeral: EphemeralKeyPair,
    pub(crate) initiator_nonce: [u8; NONCE_LEN],
    pub(crate) offered_roots: Vec<TrustRootId>,
    pub(crate) transcript: TranscriptHash,
}

/// Secrets held by a responder between sending Msg2 and receiving Msg3.
pub struct ResponderContext {
    pub(crate) shared_secret: Zeroizing<[u8; 32]>,
    pub(crate) initiator_ephemeral: [u8; EPHEMERAL_KEY_LEN],
    pub(crate) responder_ephemeral: [u8; EPHEMERAL_KEY_LEN],
    pub(crate) chosen_root: TrustRootId,
    pub(crate) transcript: TranscriptHash,
}

/// The current state of a handshake. Pending variants own their secrets;
/// replacing the state drops and wipes them.
pub enum HandshakeState {
    /// Responder waiting for the initiator's hello.
    AwaitingMsg1,

    /// Initiator has sent Msg1.
    AwaitingMsg2(InitiatorContext),

    /// Responder has sent Msg2.
    AwaitingMsg3(ResponderContext),

    /// Session keys have been handed out.
    Established,

    /// Terminal failure (or abort).
    Failed,
}

impl HandshakeState {
    /// Human-readable label for the current state (used in error messages).
    pub fn label(&self) -> &'static str {
        match self {
            HandshakeState::AwaitingMsg1 => "AwaitingMsg1",
            HandshakeState::AwaitingMsg2(_) => "AwaitingMsg2",
            HandshakeState::AwaitingMsg3(_) => "AwaitingMsg3",
            HandshakeState::Established => "Established",
            HandshakeState::Failed => "Failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Established | HandshakeState::Failed)
    }
}

impl fmt::Debug for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
