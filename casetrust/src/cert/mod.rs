// Operational certificates: the decoded form held by the store, plus the
// bitsets and identifiers used to constrain chain validation.

pub mod builder;
pub mod dn;
pub mod serializer;
pub mod store;
pub mod validator;

use std::ops::BitOr;

use bytes::Bytes;

use crate::crypto::keys::{KeyId, PUBLIC_KEY_LEN, SIGNATURE_LEN};
use crate::error::{CaseTrustError, Result};

pub use dn::{AttributeKind, AttributeValue, CertificateType, DistinguishedName};
pub use store::CertificateStore;
pub use validator::ValidationContext;

/// A trust root is named on the wire by its subject key identifier.
pub type TrustRootId = KeyId;

/// Maximum serial number length in bytes.
pub const MAX_SERIAL_LEN: usize = 20;

// ── Signature algorithm ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SignatureAlgorithm {
    Ed25519 = 0x01,
}

impl TryFrom<u8> for SignatureAlgorithm {
    type Error = CaseTrustError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(SignatureAlgorithm::Ed25519),
            other => Err(CaseTrustError::UnsupportedSignatureAlgorithm(other)),
        }
    }
}

// ── Bitsets ──────────────────────────────────────────────────────────────

/// Key usage bits (X.509 keyUsage numbering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyUsage(pub u16);

impl KeyUsage {
    pub const NONE: Self = Self(0x0000);
    pub const DIGITAL_SIGNATURE: Self = Self(0x0001);
    pub const NON_REPUDIATION: Self = Self(0x0002);
    pub const KEY_ENCIPHERMENT: Self = Self(0x0004);
    pub const DATA_ENCIPHERMENT: Self = Self(0x0008);
    pub const KEY_AGREEMENT: Self = Self(0x0010);
    pub const KEY_CERT_SIGN: Self = Self(0x0020);
    pub const CRL_SIGN: Self = Self(0x0040);
    pub const ENCIPHER_ONLY: Self = Self(0x0080);
    pub const DECIPHER_ONLY: Self = Self(0x0100);

    pub fn contains(self, other: KeyUsage) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl BitOr for KeyUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Extended key purposes. On the wire each purpose is a one-byte id
/// (1..=6); in memory purpose `id` occupies bit `id - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyPurposes(pub u8);

impl KeyPurposes {
    pub const NONE: Self = Self(0x00);
    pub const SERVER_AUTH: Self = Self(0x01);
    pub const CLIENT_AUTH: Self = Self(0x02);
    pub const CODE_SIGNING: Self = Self(0x04);
    pub const EMAIL_PROTECTION: Self = Self(0x08);
    pub const TIME_STAMPING: Self = Self(0x10);
    pub const OCSP_SIGNING: Self = Self(0x20);

    /// Highest purpose id understood on the wire.
    pub const MAX_ID: u8 = 6;

    pub fn contains(self, other: KeyPurposes) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn from_id(id: u8) -> Option<Self> {
        (1..=Self::MAX_ID).contains(&id).then(|| Self(1 << (id - 1)))
    }

    /// Wire ids of the purposes present, ascending.
    pub fn ids(self) -> impl Iterator<Item = u8> {
        (1..=Self::MAX_ID).filter(move |id| self.0 & (1 << (id - 1)) != 0)
    }
}

impl BitOr for KeyPurposes {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Per-certificate state bits set during decode and load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CertFlags(pub u8);

impl CertFlags {
    pub const NONE: Self = Self(0x00);
    pub const IS_CA: Self = Self(0x01);
    pub const IS_TRUST_ANCHOR: Self = Self(0x02);
    pub const BASIC_CONSTRAINTS: Self = Self(0x04);
    pub const PATH_LEN_CONSTRAINT: Self = Self(0x08);
    pub const FUTURE_EXT_CRITICAL: Self = Self(0x10);
    pub const TBS_HASH_PRESENT: Self = Self(0x20);

    pub fn contains(self, flag: CertFlags) -> bool {
        (self.0 & flag.0) == flag.0
    }

    pub fn insert(&mut self, flag: CertFlags) {
        self.0 |= flag.0;
    }
}

/// Options for [`CertificateStore::load`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadFlags(pub u8);

impl LoadFlags {
    pub const NONE: Self = Self(0x00);
    pub const COMPUTE_TBS_HASH: Self = Self(0x01);
    pub const TRUST_ANCHOR: Self = Self(0x02);

    pub fn contains(self, flag: LoadFlags) -> bool {
        (self.0 & flag.0) == flag.0
    }
}

impl BitOr for LoadFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

// ── Certificate ──────────────────────────────────────────────────────────

/// A decoded certificate. Immutable once loaded into a store; the raw
/// encoding is kept as a shared `Bytes` view rather than a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub(crate) encoded: Bytes,
    pub(crate) tbs_len: usize,
    pub(crate) serial: Bytes,
    pub(crate) signature_algorithm: SignatureAlgorithm,
    pub(crate) issuer: DistinguishedName,
    pub(crate) subject: DistinguishedName,
    pub(crate) not_before: u64,
    pub(crate) not_after: u64,
    pub(crate) public_key: [u8; PUBLIC_KEY_LEN],
    pub(crate) subject_key_id: KeyId,
    pub(crate) authority_key_id: KeyId,
    pub(crate) key_usage: KeyUsage,
    pub(crate) key_purposes: KeyPurposes,
    pub(crate) path_len_constraint: u8,
    pub(crate) flags: CertFlags,
    pub(crate) signature: [u8; SIGNATURE_LEN],
    pub(crate) tbs_hash: Option<[u8; 32]>,
}

impl Certificate {
    /// Decode without loading into a store. The TBS hash is not computed.
    pub fn decode(encoded: Bytes) -> Result<Self> {
        serializer::decode(encoded)
    }

    /// The full encoding this certificate was decoded from.
    pub fn encoded(&self) -> &Bytes {
        &self.encoded
    }

    /// The signed portion of the encoding.
    pub fn tbs(&self) -> &[u8] {
        &self.encoded[..self.tbs_len]
    }

    pub fn serial(&self) -> &[u8] {
        &self.serial
    }

    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    pub fn issuer(&self) -> &DistinguishedName {
        &self.issuer
    }

    pub fn subject(&self) -> &DistinguishedName {
        &self.subject
    }

    pub fn not_before(&self) -> u64 {
        self.not_before
    }

    /// `0` means the certificate has no defined expiration.
    pub fn not_after(&self) -> u64 {
        self.not_after
    }

    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.public_key
    }

    pub fn subject_key_id(&self) -> &KeyId {
        &self.subject_key_id
    }

    pub fn authority_key_id(&self) -> &KeyId {
        &self.authority_key_id
    }

    pub fn key_usage(&self) -> KeyUsage {
        self.key_usage
    }

    pub fn key_purposes(&self) -> KeyPurposes {
        self.key_purposes
    }

    /// Maximum number of intermediate CAs allowed below this CA, if
    /// constrained.
    pub fn path_len_constraint(&self) -> Option<u8> {
        self.flags
            .contains(CertFlags::PATH_LEN_CONSTRAINT)
            .then_some(self.path_len_constraint)
    }

    pub fn flags(&self) -> CertFlags {
        self.flags
    }

    pub fn is_ca(&self) -> bool {
        self.flags.contains(CertFlags::IS_CA)
    }

    pub fn is_trust_anchor(&self) -> bool {
        self.flags.contains(CertFlags::IS_TRUST_ANCHOR)
    }

    pub fn signature(&self) -> &[u8; SIGNATURE_LEN] {
        &self.signature
    }

    pub fn tbs_hash(&self) -> Option<&[u8; 32]> {
        self.tbs_hash.as_ref()
    }

    /// Issuer equals subject and the authority key id names this key.
    pub fn is_self_signed(&self) -> bool {
        self.issuer == self.subject && self.authority_key_id == self.subject_key_id
    }

    pub fn certificate_type(&self) -> Result<CertificateType> {
        self.subject.certificate_type()
    }

    /// Cache SHA-256 of the TBS portion; required before signature checks.
    pub fn compute_tbs_hash(&mut self) {
        self.tbs_hash = Some(crate::crypto::hash::hash_sha256(self.tbs()));
        self.flags.insert(CertFlags::TBS_HASH_PRESENT);
    }
}
