// Local operational identity: signing key plus the node certificate that
// certifies it.

use bytes::Bytes;

use crate::cert::{Certificate, CertificateType};
use crate::crypto::keys::{IdentityKeyPair, SIGNATURE_LEN};
use crate::error::{CaseTrustError, Result};

/// The identity a session authenticates as.
#[derive(Debug)]
pub struct OperationalCredentials {
    keypair: IdentityKeyPair,
    noc: Bytes,
    node_id: u64,
    fabric_id: u64,
    case_auth_tags: Vec<u32>,
}

impl OperationalCredentials {
    /// Pair `keypair` with its node operational certificate.
    ///
    /// The certificate must be an operational node certificate for
    /// `keypair`'s public key.
    pub fn new(keypair: IdentityKeyPair, noc: Bytes) -> Result<Self> {
        let cert = Certificate::decode(noc.clone())?;
        if cert.certificate_type()? != CertificateType::OperationalNode {
            return Err(CaseTrustError::WrongCertificateType);
        }
        if cert.public_key() != &keypair.public_key_bytes() {
            return Err(CaseTrustError::InvalidKey(
                "certificate does not certify the identity key".into(),
            ));
        }

        let subject = cert.subject();
        let node_id = subject
            .node_id()
            .ok_or_else(|| CaseTrustError::MalformedIdentity("missing node id".into()))?;
        let fabric_id = subject
            .fabric_id()
            .ok_or_else(|| CaseTrustError::MalformedIdentity("missing fabric id".into()))?;

        Ok(Self {
            keypair,
            noc,
            node_id,
            fabric_id,
            case_auth_tags: subject.case_auth_tags(),
        })
    }

    pub fn noc(&self) -> &Bytes {
        &self.noc
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn fabric_id(&self) -> u64 {
        self.fabric_id
    }

    pub fn case_auth_tags(&self) -> &[u32] {
        &self.case_auth_tags
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.keypair.public_key_bytes()
    }

    pub(crate) fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.keypair.sign(data)
    }
}
