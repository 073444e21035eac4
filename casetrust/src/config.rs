// Session configuration.

use serde::{Deserialize, Serialize};

use crate::cert::TrustRootId;
use crate::crypto::aead::CipherSuite;
use crate::crypto::kdf::IPK_LEN;
use crate::error::{CaseTrustError, Result};
use crate::handshake::messages::MAX_TRUST_ROOTS;

/// Certificate validation knobs applied to the peer's chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationPolicy {
    /// Reject peer certificates whose validity has not started yet.
    #[serde(default)]
    pub enforce_not_before: bool,
}

/// Per-session parameters.
///
/// ```ignore
/// let config = SessionConfig::from_json(r#"{
///     "identity_protection_key": [0,1,2,3,4,5,6,7,8,9,10,11,12,13,14,15],
///     "cipher_suite": "chacha20-poly1305",
///     "local_connection_id": 7
/// }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Pre-shared salt mixed into every handshake key derivation.
    pub identity_protection_key: [u8; IPK_LEN],
    /// Roots offered in Msg1. Empty means every trust anchor in the store.
    #[serde(default)]
    pub trusted_roots: Vec<TrustRootId>,
    #[serde(default)]
    pub cipher_suite: CipherSuite,
    /// Identifier the peer must use to address this session.
    #[serde(default)]
    pub local_connection_id: u16,
    /// When set, the peer's certificate must carry this node id.
    #[serde(default)]
    pub peer_node_id: Option<u64>,
    #[serde(default)]
    pub validation: ValidationPolicy,
}

impl SessionConfig {
    pub fn new(identity_protection_key: [u8; IPK_LEN]) -> Self {
        Self {
            identity_protection_key,
            trusted_roots: Vec::new(),
            cipher_suite: CipherSuite::default(),
            local_connection_id: 0,
            peer_node_id: None,
            validation: ValidationPolicy::default(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaseTrustError::Config(format!("invalid session config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| CaseTrustError::Config(format!("serialize session config: {e}")))
    }

    pub fn with_trusted_roots(mut self, roots: Vec<TrustRootId>) -> Self {
        self.trusted_roots = roots;
        self
    }

    pub fn with_cipher_suite(mut self, suite: CipherSuite) -> Self {
        self.cipher_suite = suite;
        self
    }

    pub fn with_connection_id(mut self, id: u16) -> Self {
        self.local_connection_id = id;
        self
    }

    pub fn with_peer_node_id(mut self, node_id: u64) -> Self {
        self.peer_node_id = Some(node_id);
        self
    }

    pub fn with_validation(mut self, policy: ValidationPolicy) -> Self {
        self.validation = policy;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.trusted_roots.len() > MAX_TRUST_ROOTS {
            return Err(CaseTrustError::Config(format!(
                "at most {MAX_TRUST_ROOTS} trusted roots may be offered, got {}",
                self.trusted_roots.len()
            )));
        }
        Ok(())
    }
}
