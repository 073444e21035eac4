// Three-message handshake: wire messages, state machine, session driver and
// the application-facing delegate traits.

pub mod credentials;
pub mod delegate;
pub mod messages;
pub mod protocol;
pub mod state;

pub use credentials::OperationalCredentials;
pub use delegate::{SessionCallback, SessionEvent, TransportDelegate};
pub use messages::{MessageType, OutboundMessage};
pub use protocol::{CaseSession, PeerIdentity};
pub use state::{HandshakeState, Role};
