// CaseTrust error types

use thiserror::Error;

/// Top-level error type for the CaseTrust crate.
#[derive(Debug, Error)]
pub enum CaseTrustError {
    // ── Wire errors ─────────────────────────────────────────────────────
    #[error("malformed handshake message: {0}")]
    MalformedMessage(String),

    #[error("unknown handshake message type: 0x{0:02x}")]
    UnknownMessageType(u8),

    // ── Certificate decode errors ───────────────────────────────────────
    #[error("unsupported certificate format: {0}")]
    UnsupportedFormat(String),

    #[error("unsupported signature algorithm: 0x{0:02x}")]
    UnsupportedSignatureAlgorithm(u8),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("malformed identity: {0}")]
    MalformedIdentity(String),

    #[error("certificate build error: {0}")]
    CertificateBuild(String),

    // ── Chain validation errors ─────────────────────────────────────────
    #[error("certificate carries an unsupported critical extension")]
    UnsupportedCriticalExtension,

    #[error("certificate expired: not_after={not_after}, now={now}")]
    CertificateExpired { not_after: u64, now: u64 },

    #[error("certificate not yet valid: not_before={not_before}, now={now}")]
    CertificateNotYetValid { not_before: u64, now: u64 },

    #[error("certificate usage not allowed")]
    CertificateUsageNotAllowed,

    #[error("wrong certificate type")]
    WrongCertificateType,

    #[error("certificate chain too long")]
    ChainTooLong,

    #[error("certificate not trusted")]
    CertificateNotTrusted,

    #[error("certificate authority not found")]
    CertificateAuthorityNotFound,

    #[error("certificate TBS hash missing")]
    MissingHash,

    #[error("signature verification failed")]
    SignatureInvalid,

    // ── Handshake errors ────────────────────────────────────────────────
    #[error("protocol state mismatch: received {received} while {state}")]
    ProtocolStateMismatch { state: String, received: String },

    #[error("AEAD decryption failed")]
    DecryptionFailed,

    #[error("wrong peer identity: {0}")]
    WrongPeerIdentity(String),

    #[error("peer reported handshake failure (code 0x{0:02x})")]
    PeerReportedError(u8),

    // ── Crypto errors ───────────────────────────────────────────────────
    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("AEAD encryption failed: {0}")]
    Encryption(String),

    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    // ── Generic ─────────────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),
}

/// Crate-level result alias.
pub type Result<T> = std::result::Result<T, CaseTrustError>;
