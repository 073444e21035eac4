// CaseTrust: certificate chain validation and authenticated session
// establishment for operational node identities.
//
// Crate root: module declarations and public re-exports.

pub mod cert;
pub mod config;
pub mod crypto;
pub mod error;
pub mod handshake;

// Re-export key types at crate root for convenience.
pub use cert::builder::CertificateBuilder;
pub use cert::{
    Certificate, CertificateStore, CertificateType, DistinguishedName, KeyPurposes, KeyUsage,
    LoadFlags, TrustRootId, ValidationContext,
};
pub use config::{SessionConfig, ValidationPolicy};
pub use crypto::aead::CipherSuite;
pub use crypto::kdf::SessionKeys;
pub use crypto::keys::IdentityKeyPair;
pub use error::{CaseTrustError, Result};
pub use handshake::{
    CaseSession, MessageType, OperationalCredentials, OutboundMessage, SessionCallback,
    SessionEvent, TransportDelegate,
};
