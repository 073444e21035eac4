// Chain validation over a certificate store: constraint checks, validity
// window, recursive issuer search and Ed25519 signature verification.

use bytes::Bytes;
use tracing::debug;

use crate::cert::{
    CertFlags, Certificate, CertificateStore, CertificateType, DistinguishedName, KeyPurposes,
    KeyUsage,
};
use crate::crypto::keys::{self, KeyId};
use crate::error::{CaseTrustError, Result};

/// Requirements for one validation, and where its result lands.
///
/// `effective_time` is a unix timestamp supplied by the caller so that
/// validation is deterministic.
#[derive(Debug, Clone, Default)]
pub struct ValidationContext {
    pub effective_time: u64,
    pub required_key_usage: KeyUsage,
    pub required_key_purposes: KeyPurposes,
    pub required_type: CertificateType,
    /// Reject certificates whose `not_before` is after `effective_time`.
    pub enforce_not_before: bool,
    trust_anchor: Option<usize>,
}

impl ValidationContext {
    pub fn new(effective_time: u64) -> Self {
        Self {
            effective_time,
            ..Self::default()
        }
    }

    pub fn require_key_usage(mut self, usage: KeyUsage) -> Self {
        self.required_key_usage = usage;
        self
    }

    pub fn require_key_purposes(mut self, purposes: KeyPurposes) -> Self {
        self.required_key_purposes = purposes;
        self
    }

    pub fn require_type(mut self, cert_type: CertificateType) -> Self {
        self.required_type = cert_type;
        self
    }

    pub fn enforce_not_before(mut self, enforce: bool) -> Self {
        self.enforce_not_before = enforce;
        self
    }

    /// Store index of the trust anchor that terminated the last successful
    /// validation. `None` before any validation and after a failed one.
    pub fn trust_anchor(&self) -> Option<usize> {
        self.trust_anchor
    }
}

/// Rank used by `find_valid_cert` to keep the most informative failure.
fn specificity(err: &CaseTrustError) -> u8 {
    match err {
        CaseTrustError::CertificateAuthorityNotFound => 0,
        CaseTrustError::ChainTooLong => 2,
        _ => 1,
    }
}

impl<S: AsRef<[Option<Certificate>]>> CertificateStore<S> {
    /// Validate `cert` as a leaf against this store's trust anchors.
    ///
    /// `cert` need not be loaded, but it must carry a TBS hash unless it is
    /// itself one of this store's trust anchors.
    pub fn validate(&self, cert: &Certificate, ctx: &mut ValidationContext) -> Result<()> {
        ctx.trust_anchor = None;
        let index = self.position_of(cert);
        let result = self.validate_at(cert, index, ctx, 0);
        if result.is_err() {
            ctx.trust_anchor = None;
        }
        result
    }

    /// Validate the loaded certificate at `index` as a leaf.
    pub fn validate_index(&self, index: usize, ctx: &mut ValidationContext) -> Result<()> {
        let cert = self.get(index).ok_or_else(|| {
            CaseTrustError::InvalidArgument(format!("no certificate at index {index}"))
        })?;
        self.validate(cert, ctx)
    }

    /// `index` is the store slot holding `cert`; trust-anchor status is only
    /// honoured for certificates held by this store.
    fn validate_at(
        &self,
        cert: &Certificate,
        index: Option<usize>,
        ctx: &mut ValidationContext,
        depth: usize,
    ) -> Result<()> {
        if cert.flags().contains(CertFlags::FUTURE_EXT_CRITICAL) {
            return Err(CaseTrustError::UnsupportedCriticalExtension);
        }

        let cert_type = cert.certificate_type()?;
        if depth > 0 {
            if !cert.is_ca() || !cert.key_usage().contains(KeyUsage::KEY_CERT_SIGN) {
                return Err(CaseTrustError::CertificateUsageNotAllowed);
            }
            if !matches!(cert_type, CertificateType::Root | CertificateType::IntermediateCa) {
                return Err(CaseTrustError::WrongCertificateType);
            }
            if let Some(max) = cert.path_len_constraint() {
                if depth - 1 > usize::from(max) {
                    return Err(CaseTrustError::ChainTooLong);
                }
            }
        } else {
            if !cert.key_usage().contains(ctx.required_key_usage)
                || !cert.key_purposes().contains(ctx.required_key_purposes)
            {
                return Err(CaseTrustError::CertificateUsageNotAllowed);
            }
            if ctx.required_type != CertificateType::Unspecified && cert_type != ctx.required_type {
                return Err(CaseTrustError::WrongCertificateType);
            }
        }

        let now = ctx.effective_time;
        if cert.not_after() != 0 && now > cert.not_after() {
            return Err(CaseTrustError::CertificateExpired {
                not_after: cert.not_after(),
                now,
            });
        }
        if ctx.enforce_not_before && now < cert.not_before() {
            return Err(CaseTrustError::CertificateNotYetValid {
                not_before: cert.not_before(),
                now,
            });
        }

        if let Some(anchor) = index.filter(|_| cert.is_trust_anchor()) {
            debug!(anchor, depth, "chain reached trust anchor");
            ctx.trust_anchor = Some(anchor);
            return Ok(());
        }

        if cert.is_self_signed() {
            return Err(CaseTrustError::CertificateNotTrusted);
        }
        if depth >= self.len() {
            return Err(CaseTrustError::ChainTooLong);
        }
        if cert.tbs_hash().is_none() {
            return Err(CaseTrustError::MissingHash);
        }

        let issuer_index = match self.find_valid_cert(
            Some(cert.issuer()),
            Some(cert.authority_key_id()),
            ctx,
            depth + 1,
        ) {
            Ok(i) => i,
            Err(CaseTrustError::ChainTooLong) => return Err(CaseTrustError::ChainTooLong),
            Err(e) => {
                debug!(depth, error = %e, "no valid issuer");
                return Err(CaseTrustError::CertificateAuthorityNotFound);
            }
        };
        let issuer = self
            .get(issuer_index)
            .ok_or(CaseTrustError::CertificateAuthorityNotFound)?;
        self.verify_signature(cert, issuer)
    }

    /// Find a loaded certificate matching `subject` and/or `key_id` that
    /// validates at `depth`. The first match wins; otherwise the most
    /// specific failure among the candidates is returned.
    pub fn find_valid_cert(
        &self,
        subject: Option<&DistinguishedName>,
        key_id: Option<&KeyId>,
        ctx: &mut ValidationContext,
        depth: usize,
    ) -> Result<usize> {
        if subject.is_none() && key_id.is_none() {
            return Err(CaseTrustError::InvalidArgument(
                "subject or key id selector required".into(),
            ));
        }

        let mut best = CaseTrustError::CertificateAuthorityNotFound;
        for (index, candidate) in self.iter() {
            if subject.is_some_and(|dn| dn != candidate.subject()) {
                continue;
            }
            if key_id.is_some_and(|id| id != candidate.subject_key_id()) {
                continue;
            }
            match self.validate_at(candidate, Some(index), ctx, depth) {
                Ok(()) => return Ok(index),
                Err(e) if specificity(&e) > specificity(&best) => best = e,
                Err(_) => {}
            }
        }
        Err(best)
    }

    /// Check `cert`'s signature against `issuer`'s public key.
    pub fn verify_signature(&self, cert: &Certificate, issuer: &Certificate) -> Result<()> {
        let hash = cert.tbs_hash().ok_or(CaseTrustError::MissingHash)?;
        keys::verify_signature(issuer.public_key(), hash, cert.signature())
            .map_err(|_| CaseTrustError::SignatureInvalid)
    }
}

/// Decode `encoded` and check that it is a usable root: Root type, CA with
/// KeyCertSign, self-issued and carrying a valid self-signature.
pub fn validate_root(encoded: Bytes) -> Result<Certificate> {
    let mut cert = Certificate::decode(encoded)?;
    cert.compute_tbs_hash();

    if cert.flags().contains(CertFlags::FUTURE_EXT_CRITICAL) {
        return Err(CaseTrustError::UnsupportedCriticalExtension);
    }
    if cert.certificate_type()? != CertificateType::Root {
        return Err(CaseTrustError::WrongCertificateType);
    }
    if !cert.is_ca() || !cert.key_usage().contains(KeyUsage::KEY_CERT_SIGN) {
        return Err(CaseTrustError::CertificateUsageNotAllowed);
    }
    if !cert.is_self_signed() {
        return Err(CaseTrustError::CertificateNotTrusted);
    }

    let hash = cert.tbs_hash().ok_or(CaseTrustError::MissingHash)?;
    keys::verify_signature(cert.public_key(), hash, cert.signature())
        .map_err(|_| CaseTrustError::SignatureInvalid)?;
    Ok(cert)
}
