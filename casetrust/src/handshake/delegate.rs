// Application boundary: the session hands outbound messages to a transport
// and reports the outcome to a callback.

use crate::crypto::kdf::SessionKeys;
use crate::error::{CaseTrustError, Result};
use crate::handshake::messages::OutboundMessage;

/// Carries handshake messages to the peer.
pub trait TransportDelegate {
    fn send_message(&mut self, message: OutboundMessage) -> Result<()>;
}

/// Receives the final result of a handshake. Exactly one of the two methods
/// is called per session.
pub trait SessionCallback {
    fn on_session_established(&mut self, keys: SessionKeys);
    fn on_session_establishment_error(&mut self, error: CaseTrustError);
}

/// What a state transition asks the outside world to do.
#[derive(Debug)]
pub enum SessionEvent {
    Send(OutboundMessage),
    Established(SessionKeys),
    Failed(CaseTrustError),
}
