// Shared fixtures for the integration tests: a root CA per fabric, issued
// intermediates and node certificates, and recording delegates.

#![allow(dead_code)]

use bytes::Bytes;
use casetrust::cert::builder::CertificateBuilder;
use casetrust::cert::{CertificateStore, DistinguishedName, KeyPurposes, KeyUsage, LoadFlags};
use casetrust::crypto::keys::IdentityKeyPair;
use casetrust::{
    CaseTrustError, OperationalCredentials, OutboundMessage, SessionCallback, SessionKeys,
    TransportDelegate,
};

pub const NOW: u64 = 1_700_000_000;

pub const LOAD: LoadFlags = LoadFlags::COMPUTE_TBS_HASH;
pub const ANCHOR: LoadFlags =
    LoadFlags(LoadFlags::COMPUTE_TBS_HASH.0 | LoadFlags::TRUST_ANCHOR.0);

/// A CA identity: key, subject DN and encoded certificate.
pub struct Ca {
    pub key: IdentityKeyPair,
    pub dn: DistinguishedName,
    pub cert: Bytes,
}

impl Ca {
    /// Self-signed root CA.
    pub fn root(rcac_id: u64) -> Self {
        let key = IdentityKeyPair::generate();
        let dn = DistinguishedName::root(rcac_id).unwrap();
        let cert = CertificateBuilder::new(&key)
            .subject(dn.clone())
            .ca(None)
            .key_usage(KeyUsage::KEY_CERT_SIGN | KeyUsage::CRL_SIGN)
            .validity(NOW - 86_400, 0)
            .build()
            .unwrap();
        Ca { key, dn, cert }
    }

    /// Intermediate CA issued by `self`.
    pub fn intermediate(&self, icac_id: u64) -> Ca {
        let key = IdentityKeyPair::generate();
        let dn = DistinguishedName::intermediate(icac_id).unwrap();
        let cert = CertificateBuilder::new(&self.key)
            .issuer(self.dn.clone())
            .subject(dn.clone())
            .subject_public_key(key.public_key_bytes())
            .ca(None)
            .key_usage(KeyUsage::KEY_CERT_SIGN)
            .validity(NOW - 86_400, 0)
            .build()
            .unwrap();
        Ca { key, dn, cert }
    }

    /// Node operational certificate issued by `self`, valid for a day
    /// around [`NOW`].
    pub fn node(&self, node_id: u64, fabric_id: u64) -> (IdentityKeyPair, Bytes) {
        self.node_with_validity(node_id, fabric_id, NOW - 86_400, NOW + 86_400)
    }

    pub fn node_with_validity(
        &self,
        node_id: u64,
        fabric_id: u64,
        not_before: u64,
        not_after: u64,
    ) -> (IdentityKeyPair, Bytes) {
        let key = IdentityKeyPair::generate();
        let cert = CertificateBuilder::new(&self.key)
            .issuer(self.dn.clone())
            .subject(DistinguishedName::node(node_id, fabric_id).unwrap())
            .subject_public_key(key.public_key_bytes())
            .end_entity()
            .key_usage(KeyUsage::DIGITAL_SIGNATURE)
            .key_purposes(KeyPurposes::SERVER_AUTH | KeyPurposes::CLIENT_AUTH)
            .validity(not_before, not_after)
            .build()
            .unwrap();
        (key, cert)
    }

    pub fn credentials(&self, node_id: u64, fabric_id: u64) -> OperationalCredentials {
        let (key, noc) = self.node(node_id, fabric_id);
        OperationalCredentials::new(key, noc).unwrap()
    }
}

/// Store holding `roots` as trust anchors.
pub fn store_with_anchors(roots: &[&Ca]) -> CertificateStore {
    let mut store = CertificateStore::with_capacity(8);
    for root in roots {
        store.load(root.cert.clone(), ANCHOR).unwrap();
    }
    store
}

/// Transport that records every message, optionally refusing to send.
#[derive(Default)]
pub struct RecordingTransport {
    pub sent: Vec<OutboundMessage>,
    pub refuse: bool,
}

impl TransportDelegate for RecordingTransport {
    fn send_message(&mut self, message: OutboundMessage) -> casetrust::Result<()> {
        if self.refuse {
            return Err(CaseTrustError::Transport("link down".into()));
        }
        self.sent.push(message);
        Ok(())
    }
}

/// Callback that records the handshake outcome.
#[derive(Default)]
pub struct RecordingCallback {
    pub established: Option<SessionKeys>,
    pub errors: Vec<CaseTrustError>,
}

impl SessionCallback for RecordingCallback {
    fn on_session_established(&mut self, keys: SessionKeys) {
        self.established = Some(keys);
    }

    fn on_session_establishment_error(&mut self, error: CaseTrustError) {
        self.errors.push(error);
    }
}
