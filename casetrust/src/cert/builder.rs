// Certificate builder: fluent API for encoding and signing a certificate.

use std::time::Duration;

use bytes::Bytes;

use crate::cert::serializer::{self, Extensions, TbsCertificate};
use crate::cert::{DistinguishedName, KeyPurposes, KeyUsage, SignatureAlgorithm, MAX_SERIAL_LEN};
use crate::crypto::hash::hash_sha256;
use crate::crypto::keys::{key_id, IdentityKeyPair, PUBLIC_KEY_LEN};
use crate::error::{CaseTrustError, Result};

/// Builder producing the encoded bytes of a signed certificate.
///
/// Without an explicit issuer the certificate is self-issued; without an
/// explicit subject key it certifies the signer's own key.
///
/// # Example
/// ```ignore
/// let root = CertificateBuilder::new(&root_key)
///     .subject(DistinguishedName::root(1)?)
///     .ca(Some(1))
///     .key_usage(KeyUsage::KEY_CERT_SIGN | KeyUsage::CRL_SIGN)
///     .validity(now, 0)
///     .build()?;
/// ```
pub struct CertificateBuilder<'a> {
    signer: &'a IdentityKeyPair,
    serial: Option<Vec<u8>>,
    issuer: Option<DistinguishedName>,
    subject: Option<DistinguishedName>,
    subject_public_key: Option<[u8; PUBLIC_KEY_LEN]>,
    not_before: u64,
    not_after: u64,
    extensions: Extensions,
}

impl<'a> CertificateBuilder<'a> {
    /// Start building a certificate that will be signed by `signer`.
    pub fn new(signer: &'a IdentityKeyPair) -> Self {
        Self {
            signer,
            serial: None,
            issuer: None,
            subject: None,
            subject_public_key: None,
            not_before: 0,
            not_after: 0,
            extensions: Extensions::default(),
        }
    }

    /// Serial number, 1..=20 bytes. Random 8 bytes when unset.
    pub fn serial(mut self, serial: &[u8]) -> Self {
        self.serial = Some(serial.to_vec());
        self
    }

    pub fn subject(mut self, dn: DistinguishedName) -> Self {
        self.subject = Some(dn);
        self
    }

    /// Issuer DN; should equal the signer certificate's subject.
    pub fn issuer(mut self, dn: DistinguishedName) -> Self {
        self.issuer = Some(dn);
        self
    }

    /// Key being certified, when it is not the signer's own.
    pub fn subject_public_key(mut self, key: [u8; PUBLIC_KEY_LEN]) -> Self {
        self.subject_public_key = Some(key);
        self
    }

    /// Explicit validity window (unix seconds). `not_after == 0` means no
    /// expiration.
    pub fn validity(mut self, not_before: u64, not_after: u64) -> Self {
        self.not_before = not_before;
        self.not_after = not_after;
        self
    }

    /// Validity as a duration from `now`.
    pub fn valid_for_from(self, now: u64, duration: Duration) -> Self {
        self.validity(now, now.saturating_add(duration.as_secs()))
    }

    /// Mark as a CA, optionally bounding the number of intermediates below it.
    pub fn ca(mut self, path_len: Option<u8>) -> Self {
        self.extensions.basic_constraints = Some((true, path_len));
        self
    }

    /// Emit a basic constraints extension with `is_ca = false`.
    pub fn end_entity(mut self) -> Self {
        self.extensions.basic_constraints = Some((false, None));
        self
    }

    pub fn key_usage(mut self, usage: KeyUsage) -> Self {
        self.extensions.key_usage = Some(usage);
        self
    }

    pub fn key_purposes(mut self, purposes: KeyPurposes) -> Self {
        self.extensions.key_purposes = Some(purposes);
        self
    }

    /// Attach an extension this implementation does not interpret.
    pub fn future_extension(mut self, critical: bool, body: &[u8]) -> Self {
        self.extensions.future = Some((critical, body.to_vec()));
        self
    }

    /// Consume the builder and produce the signed encoding.
    pub fn build(self) -> Result<Bytes> {
        let subject = self
            .subject
            .ok_or_else(|| CaseTrustError::CertificateBuild("subject is required".into()))?;
        let issuer = self.issuer.unwrap_or_else(|| subject.clone());

        let serial = self.serial.unwrap_or_else(|| rand::random::<[u8; 8]>().to_vec());
        if serial.is_empty() || serial.len() > MAX_SERIAL_LEN {
            return Err(CaseTrustError::CertificateBuild(format!(
                "serial must be 1..={MAX_SERIAL_LEN} bytes"
            )));
        }

        if self.not_after != 0 && self.not_after <= self.not_before {
            return Err(CaseTrustError::CertificateBuild(
                "not_after must be after not_before".into(),
            ));
        }

        let public_key = self
            .subject_public_key
            .unwrap_or_else(|| self.signer.public_key_bytes());

        let mut extensions = self.extensions;
        extensions.subject_key_id = Some(key_id(&public_key));
        extensions.authority_key_id = Some(self.signer.key_id());

        let tbs = TbsCertificate {
            serial: &serial,
            signature_algorithm: SignatureAlgorithm::Ed25519 as u8,
            issuer: &issuer,
            not_before: self.not_before,
            not_after: self.not_after,
            subject: &subject,
            public_key: &public_key,
            extensions: &extensions,
        }
        .encode()?;

        let signature = self.signer.sign(&hash_sha256(&tbs));
        serializer::finish(tbs, &signature)
    }
}
