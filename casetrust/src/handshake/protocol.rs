// Three-message authenticated key exchange.
//
//   Initiator                                   Responder
//     |--- Msg1: nonce, roots, eph_i ------------->|
//     |<-- Msg2: nonce, root, eph_r, {NOC_r, sig} -|   S2K
//     |--- Msg3: {NOC_i, sig} -------------------->|   S3K
//     |==== SessionKeys (i2r, r2i, challenge) =====|
//
// Every message is absorbed into a SHA-256 transcript in wire order; each
// derived key binds the transcript so far.

use bytes::Bytes;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

use crate::cert::{
    Certificate, CertificateStore, CertificateType, KeyPurposes, KeyUsage, TrustRootId,
    ValidationContext,
};
use crate::config::SessionConfig;
use crate::crypto::aead::AeadKey;
use crate::crypto::hash::TranscriptHash;
use crate::crypto::kdf::{derive_session_keys, derive_sigma2_key, derive_sigma3_key, NONCE_LEN};
use crate::crypto::keys;
use crate::crypto::x25519::EphemeralKeyPair;
use crate::error::{CaseTrustError, Result};
use crate::handshake::credentials::OperationalCredentials;
use crate::handshake::delegate::{SessionCallback, SessionEvent, TransportDelegate};
use crate::handshake::messages::{
    signed_data, ErrorMsg, MessageType, Msg1, Msg2, Msg3, OutboundMessage, SignedBlock,
    GENERIC_ERROR_CODE, MAX_TRUST_ROOTS, SIGMA2_NONCE, SIGMA3_NONCE,
};
use crate::handshake::state::{HandshakeState, InitiatorContext, ResponderContext, Role};

type Transition = Result<(HandshakeState, Vec<SessionEvent>)>;

/// Authenticated identity of the peer, known once its certificate chain and
/// signature have been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerIdentity {
    pub node_id: u64,
    pub fabric_id: u64,
    pub case_auth_tags: Vec<u32>,
    /// Trust root the peer's chain terminated at.
    pub trust_root: TrustRootId,
}

fn random_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// One side of a handshake.
///
/// Borrowing the credentials and store lets any number of sessions share
/// them; the store is only read.
pub struct CaseSession<'s, S = Vec<Option<Certificate>>> {
    role: Role,
    credentials: &'s OperationalCredentials,
    store: &'s CertificateStore<S>,
    config: SessionConfig,
    state: HandshakeState,
    peer: Option<PeerIdentity>,
    peer_connection_id: Option<u16>,
}

impl<'s, S: AsRef<[Option<Certificate>]>> CaseSession<'s, S> {
    /// Start a handshake as initiator, returning the session and Msg1.
    pub fn initiate(
        credentials: &'s OperationalCredentials,
        store: &'s CertificateStore<S>,
        config: SessionConfig,
    ) -> Result<(Self, OutboundMessage)> {
        config.validate()?;
        let offered_roots = if config.trusted_roots.is_empty() {
            let mut anchors = store.trust_anchor_ids();
            if anchors.len() > MAX_TRUST_ROOTS {
                debug!(
                    anchors = anchors.len(),
                    offered = MAX_TRUST_ROOTS,
                    "offering only the first trust anchors"
                );
                anchors.truncate(MAX_TRUST_ROOTS);
            }
            anchors
        } else {
            config.trusted_roots.clone()
        };
        if offered_roots.is_empty() {
            return Err(CaseTrustError::Config("no trusted roots to offer".into()));
        }

        let ephemeral = EphemeralKeyPair::generate();
        let msg1 = Msg1 {
            initiator_nonce: random_nonce(),
            trusted_roots: offered_roots,
            initiator_ephemeral: ephemeral.public_key_bytes(),
            initiator_connection_id: config.local_connection_id,
        };
        let payload = msg1.encode()?;

        let mut transcript = TranscriptHash::new();
        transcript.absorb(&payload);

        debug!(
            roots = msg1.trusted_roots.len(),
            connection_id = config.local_connection_id,
            "initiator sent Msg1"
        );

        let session = Self {
            role: Role::Initiator,
            credentials,
            store,
            config,
            state: HandshakeState::AwaitingMsg2(InitiatorContext {
                ephemeral,
                initiator_nonce: msg1.initiator_nonce,
                offered_roots: msg1.trusted_roots,
                transcript,
            }),
            peer: None,
            peer_connection_id: None,
        };
        Ok((
            session,
            OutboundMessage {
                msg_type: MessageType::Msg1,
                payload,
            },
        ))
    }

    /// Create a responder waiting for Msg1.
    pub fn responder(
        credentials: &'s OperationalCredentials,
        store: &'s CertificateStore<S>,
        config: SessionConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            role: Role::Responder,
            credentials,
            store,
            config,
            state: HandshakeState::AwaitingMsg1,
            peer: None,
            peer_connection_id: None,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn state(&self) -> &HandshakeState {
        &self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_established(&self) -> bool {
        matches!(self.state, HandshakeState::Established)
    }

    pub fn peer(&self) -> Option<&PeerIdentity> {
        self.peer.as_ref()
    }

    pub fn peer_node_id(&self) -> Option<u64> {
        self.peer.as_ref().map(|p| p.node_id)
    }

    pub fn peer_case_auth_tags(&self) -> &[u32] {
        self.peer
            .as_ref()
            .map(|p| p.case_auth_tags.as_slice())
            .unwrap_or(&[])
    }

    pub fn peer_connection_id(&self) -> Option<u16> {
        self.peer_connection_id
    }

    pub fn local_node_id(&self) -> u64 {
        self.credentials.node_id()
    }

    // ── Driving the state machine ────────────────────────────────────────

    /// Feed one received message through the state machine.
    ///
    /// Messages arriving after the session has settled are ignored.
    pub fn handle_message(
        &mut self,
        msg_type: MessageType,
        payload: &[u8],
        now: u64,
    ) -> Vec<SessionEvent> {
        if self.state.is_terminal() {
            debug!(
                role = ?self.role,
                state = self.state.label(),
                ?msg_type,
                "ignoring message after handshake settled"
            );
            return Vec::new();
        }

        let state = std::mem::replace(&mut self.state, HandshakeState::Failed);
        let from = state.label();
        match self.transition(state, msg_type, payload, now) {
            Ok((next, events)) => {
                debug!(role = ?self.role, from, to = next.label(), "handshake transition");
                self.state = next;
                events
            }
            Err(err) => self.fail(err),
        }
    }

    /// Wipe all handshake secrets and stop. Emits nothing.
    pub fn abort(&mut self) {
        debug!(role = ?self.role, state = self.state.label(), "handshake aborted");
        self.state = HandshakeState::Failed;
    }

    /// [`handle_message`](Self::handle_message), then apply the events to
    /// the transport and callback.
    pub fn deliver<T, C>(
        &mut self,
        msg_type: MessageType,
        payload: &[u8],
        now: u64,
        transport: &mut T,
        callback: &mut C,
    ) where
        T: TransportDelegate,
        C: SessionCallback,
    {
        let events = self.handle_message(msg_type, payload, now);
        self.dispatch(events, transport, callback);
    }

    /// Apply events in order. A failed send aborts the session and drops
    /// the remaining events; the callback receives the pending handshake
    /// failure if there is one, otherwise the transport error.
    pub fn dispatch<T, C>(
        &mut self,
        events: Vec<SessionEvent>,
        transport: &mut T,
        callback: &mut C,
    ) where
        T: TransportDelegate,
        C: SessionCallback,
    {
        let mut events = events.into_iter();
        while let Some(event) = events.next() {
            match event {
                SessionEvent::Send(message) => {
                    if let Err(e) = transport.send_message(message) {
                        warn!(role = ?self.role, error = %e, "transport send failed");
                        self.abort();
                        let pending = events.find_map(|event| match event {
                            SessionEvent::Failed(err) => Some(err),
                            _ => None,
                        });
                        let err = pending.unwrap_or(match e {
                            CaseTrustError::Transport(detail) => CaseTrustError::Transport(detail),
                            other => CaseTrustError::Transport(other.to_string()),
                        });
                        callback.on_session_establishment_error(err);
                        return;
                    }
                }
                SessionEvent::Established(keys) => callback.on_session_established(keys),
                SessionEvent::Failed(err) => callback.on_session_establishment_error(err),
            }
        }
    }

    fn fail(&mut self, err: CaseTrustError) -> Vec<SessionEvent> {
        warn!(role = ?self.role, error = %err, "handshake failed");
        self.state = HandshakeState::Failed;

        let mut events = Vec::with_capacity(2);
        if !matches!(err, CaseTrustError::PeerReportedError(_)) {
            events.push(SessionEvent::Send(OutboundMessage {
                msg_type: MessageType::Error,
                payload: ErrorMsg::generic().encode(),
            }));
        }
        events.push(SessionEvent::Failed(err));
        events
    }

    fn transition(
        &mut self,
        state: HandshakeState,
        msg_type: MessageType,
        payload: &[u8],
        now: u64,
    ) -> Transition {
        match (state, msg_type) {
            (_, MessageType::Error) => {
                let code = ErrorMsg::decode(payload)
                    .map(|m| m.code)
                    .unwrap_or(GENERIC_ERROR_CODE);
                Err(CaseTrustError::PeerReportedError(code))
            }
            (HandshakeState::AwaitingMsg1, MessageType::Msg1) => self.on_msg1(payload, now),
            (HandshakeState::AwaitingMsg2(ctx), MessageType::Msg2) => {
                self.on_msg2(ctx, payload, now)
            }
            (HandshakeState::AwaitingMsg3(ctx), MessageType::Msg3) => {
                self.on_msg3(ctx, payload, now)
            }
            (state, received) => Err(CaseTrustError::ProtocolStateMismatch {
                state: state.label().into(),
                received: format!("{received:?}"),
            }),
        }
    }

    // ── Responder: Msg1 -> Msg2 ──────────────────────────────────────────

    fn on_msg1(&mut self, payload: &[u8], now: u64) -> Transition {
        let msg1 = Msg1::decode(payload)?;
        let mut transcript = TranscriptHash::new();
        transcript.absorb(payload);

        let chosen_root = self.choose_root(&msg1.trusted_roots, now)?;
        self.peer_connection_id = Some(msg1.initiator_connection_id);

        let ephemeral = EphemeralKeyPair::generate();
        let responder_ephemeral = ephemeral.public_key_bytes();
        let shared_secret = ephemeral.diffie_hellman(&msg1.initiator_ephemeral)?;
        let responder_nonce = random_nonce();

        let s2k = derive_sigma2_key(
            &shared_secret,
            &self.config.identity_protection_key,
            &msg1.initiator_nonce,
            &responder_nonce,
            &responder_ephemeral,
            &transcript.current(),
        )?;

        let noc = self.credentials.noc();
        let signature = self
            .credentials
            .sign(&signed_data(&responder_ephemeral, noc, &msg1.initiator_ephemeral));
        let block = SignedBlock {
            certificate: noc.clone(),
            signature,
            connection_id: self.config.local_connection_id,
        }
        .encode()?;

        let mut msg2 = Msg2 {
            responder_nonce,
            chosen_root,
            responder_ephemeral,
            encrypted: Bytes::new(),
        };
        let aad = msg2.header();
        msg2.encrypted = AeadKey::new(self.config.cipher_suite, s2k)
            .encrypt(&SIGMA2_NONCE, &block, &aad)?
            .into();
        let out = msg2.encode();
        transcript.absorb(&out);

        debug!(
            peer_connection_id = msg1.initiator_connection_id,
            "responder sent Msg2"
        );

        Ok((
            HandshakeState::AwaitingMsg3(ResponderContext {
                shared_secret,
                initiator_ephemeral: msg1.initiator_ephemeral,
                responder_ephemeral,
                chosen_root,
                transcript,
            }),
            vec![SessionEvent::Send(OutboundMessage {
                msg_type: MessageType::Msg2,
                payload: out,
            })],
        ))
    }

    // ── Initiator: Msg2 -> Msg3, established ─────────────────────────────

    fn on_msg2(&mut self, ctx: InitiatorContext, payload: &[u8], now: u64) -> Transition {
        let msg2 = Msg2::decode(payload)?;
        let ipk = &self.config.identity_protection_key;

        let shared_secret = ctx.ephemeral.diffie_hellman(&msg2.responder_ephemeral)?;
        let s2k = derive_sigma2_key(
            &shared_secret,
            ipk,
            &ctx.initiator_nonce,
            &msg2.responder_nonce,
            &msg2.responder_ephemeral,
            &ctx.transcript.current(),
        )?;
        let plaintext = AeadKey::new(self.config.cipher_suite, s2k).decrypt(
            &SIGMA2_NONCE,
            &msg2.encrypted,
            &msg2.header(),
        )?;

        let mut transcript = ctx.transcript;
        transcript.absorb(payload);

        if !ctx.offered_roots.contains(&msg2.chosen_root) {
            return Err(CaseTrustError::CertificateNotTrusted);
        }

        let initiator_ephemeral = ctx.ephemeral.public_key_bytes();
        let block = SignedBlock::decode(&plaintext)?;
        let peer = self.authenticate_peer(
            &block,
            &msg2.chosen_root,
            KeyPurposes::SERVER_AUTH,
            &signed_data(&msg2.responder_ephemeral, &block.certificate, &initiator_ephemeral),
            now,
        )?;

        let s3k = derive_sigma3_key(&shared_secret, ipk, &transcript.current())?;
        let noc = self.credentials.noc();
        let signature = self
            .credentials
            .sign(&signed_data(&initiator_ephemeral, noc, &msg2.responder_ephemeral));
        let block3 = SignedBlock {
            certificate: noc.clone(),
            signature,
            connection_id: block.connection_id,
        }
        .encode()?;
        let msg3 = Msg3 {
            encrypted: AeadKey::new(self.config.cipher_suite, s3k)
                .encrypt(&SIGMA3_NONCE, &block3, &[])?
                .into(),
        };
        let out = msg3.encode();
        transcript.absorb(&out);

        let keys = derive_session_keys(&shared_secret, ipk, &transcript.current())?;

        debug!(
            peer_node_id = peer.node_id,
            peer_connection_id = block.connection_id,
            "initiator sent Msg3, session established"
        );
        self.peer = Some(peer);
        self.peer_connection_id = Some(block.connection_id);

        Ok((
            HandshakeState::Established,
            vec![
                SessionEvent::Send(OutboundMessage {
                    msg_type: MessageType::Msg3,
                    payload: out,
                }),
                SessionEvent::Established(keys),
            ],
        ))
    }

    // ── Responder: Msg3 -> established ───────────────────────────────────

    fn on_msg3(&mut self, ctx: ResponderContext, payload: &[u8], now: u64) -> Transition {
        let msg3 = Msg3::decode(payload)?;
        let ipk = &self.config.identity_protection_key;

        let s3k = derive_sigma3_key(&ctx.shared_secret, ipk, &ctx.transcript.current())?;
        let plaintext = AeadKey::new(self.config.cipher_suite, s3k).decrypt(
            &SIGMA3_NONCE,
            &msg3.encrypted,
            &[],
        )?;

        let mut transcript = ctx.transcript;
        transcript.absorb(payload);

        let block = SignedBlock::decode(&plaintext)?;
        if block.connection_id != self.config.local_connection_id {
            return Err(CaseTrustError::WrongPeerIdentity(format!(
                "echoed connection id {} does not match {}",
                block.connection_id, self.config.local_connection_id
            )));
        }

        let peer = self.authenticate_peer(
            &block,
            &ctx.chosen_root,
            KeyPurposes::CLIENT_AUTH,
            &signed_data(&ctx.initiator_ephemeral, &block.certificate, &ctx.responder_ephemeral),
            now,
        )?;

        let keys = derive_session_keys(&ctx.shared_secret, ipk, &transcript.current())?;

        debug!(peer_node_id = peer.node_id, "responder received Msg3, session established");
        self.peer = Some(peer);

        Ok((HandshakeState::Established, vec![SessionEvent::Established(keys)]))
    }

    /// Pick the root announced in Msg2. When the local certificate chains
    /// to an anchor in the store, that anchor must be among the offered
    /// roots; otherwise the first offered root held as an anchor is used and
    /// the initiator's chain check decides.
    fn choose_root(&self, offered: &[TrustRootId], now: u64) -> Result<TrustRootId> {
        if let Some(own) = self.own_trust_root(now) {
            if offered.contains(&own) {
                return Ok(own);
            }
            debug!(offered = offered.len(), "local certificate root not offered by peer");
            return Err(CaseTrustError::CertificateNotTrusted);
        }
        offered
            .iter()
            .find(|id| self.store.has_trust_anchor(id))
            .copied()
            .ok_or(CaseTrustError::CertificateNotTrusted)
    }

    /// Key id of the trust anchor the local certificate validates to.
    fn own_trust_root(&self, now: u64) -> Option<TrustRootId> {
        let mut cert = Certificate::decode(self.credentials.noc().clone()).ok()?;
        cert.compute_tbs_hash();
        let mut ctx = ValidationContext::new(now).require_type(CertificateType::OperationalNode);
        if let Err(e) = self.store.validate(&cert, &mut ctx) {
            debug!(error = %e, "local certificate does not chain to a held anchor");
            return None;
        }
        ctx.trust_anchor()
            .and_then(|index| self.store.get(index))
            .map(|anchor| *anchor.subject_key_id())
    }

    /// Validate the peer's certificate chain and identity, then its
    /// signature over `tbs`.
    fn authenticate_peer(
        &self,
        block: &SignedBlock,
        chosen_root: &TrustRootId,
        purpose: KeyPurposes,
        tbs: &[u8],
        now: u64,
    ) -> Result<PeerIdentity> {
        let mut cert = Certificate::decode(block.certificate.clone())?;
        cert.compute_tbs_hash();

        let mut vctx = ValidationContext::new(now)
            .require_key_usage(KeyUsage::DIGITAL_SIGNATURE)
            .require_key_purposes(purpose)
            .require_type(CertificateType::OperationalNode)
            .enforce_not_before(self.config.validation.enforce_not_before);
        self.store.validate(&cert, &mut vctx)?;

        let anchor = vctx
            .trust_anchor()
            .and_then(|index| self.store.get(index))
            .ok_or(CaseTrustError::CertificateNotTrusted)?;
        if anchor.subject_key_id() != chosen_root {
            return Err(CaseTrustError::CertificateNotTrusted);
        }

        let subject = cert.subject();
        let node_id = subject
            .node_id()
            .ok_or_else(|| {
                CaseTrustError::MalformedIdentity("peer certificate lacks node id".into())
            })?;
        let fabric_id = subject
            .fabric_id()
            .ok_or_else(|| {
                CaseTrustError::MalformedIdentity("peer certificate lacks fabric id".into())
            })?;

        if fabric_id != self.credentials.fabric_id() {
            return Err(CaseTrustError::WrongPeerIdentity(format!(
                "peer fabric 0x{fabric_id:016x}, expected 0x{:016x}",
                self.credentials.fabric_id()
            )));
        }
        if let Some(expected) = self.config.peer_node_id {
            if node_id != expected {
                return Err(CaseTrustError::WrongPeerIdentity(format!(
                    "peer node 0x{node_id:016x}, expected 0x{expected:016x}"
                )));
            }
        }

        keys::verify_signature(cert.public_key(), tbs, &block.signature)
            .map_err(|_| CaseTrustError::SignatureInvalid)?;

        Ok(PeerIdentity {
            node_id,
            fabric_id,
            case_auth_tags: subject.case_auth_tags(),
            trust_root: *chosen_root,
        })
    }
}
