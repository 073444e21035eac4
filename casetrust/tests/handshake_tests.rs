// Integration tests for the three-message handshake.

mod common;

use casetrust::handshake::HandshakeState;
use casetrust::{
    CaseSession, CaseTrustError, CertificateStore, CipherSuite, MessageType, OperationalCredentials,
    OutboundMessage, SessionConfig, SessionEvent, SessionKeys, ValidationPolicy,
};

use common::{store_with_anchors, Ca, RecordingCallback, RecordingTransport, NOW};

const IPK: [u8; 16] = [0x5A; 16];
const FABRIC: u64 = 0xFAB1;

struct Fixture {
    root: Ca,
    store: CertificateStore,
    alice: OperationalCredentials,
    bob: OperationalCredentials,
}

fn fixture() -> Fixture {
    let root = Ca::root(1);
    let store = store_with_anchors(&[&root]);
    let alice = root.credentials(0xA11CE, FABRIC);
    let bob = root.credentials(0xB0B, FABRIC);
    Fixture {
        root,
        store,
        alice,
        bob,
    }
}

fn config(connection_id: u16) -> SessionConfig {
    SessionConfig::new(IPK).with_connection_id(connection_id)
}

fn sent(events: &[SessionEvent]) -> OutboundMessage {
    match events.first() {
        Some(SessionEvent::Send(msg)) => msg.clone(),
        other => panic!("expected Send, got {other:?}"),
    }
}

fn established(events: &[SessionEvent]) -> Option<SessionKeys> {
    events.iter().find_map(|e| match e {
        SessionEvent::Established(keys) => Some(keys.clone()),
        _ => None,
    })
}

fn failure(events: &[SessionEvent]) -> Option<&CaseTrustError> {
    events.iter().find_map(|e| match e {
        SessionEvent::Failed(err) => Some(err),
        _ => None,
    })
}

fn flip(payload: &[u8], bit: usize) -> Vec<u8> {
    let mut out = payload.to_vec();
    out[bit / 8] ^= 1 << (bit % 8);
    out
}

// ── Successful handshakes ────────────────────────────────────────────────

#[test]
fn full_handshake_through_delegates() {
    let f = fixture();
    let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(0x0101)).unwrap();
    let mut responder = CaseSession::responder(&f.bob, &f.store, config(0x0202)).unwrap();

    let mut i_transport = RecordingTransport::default();
    let mut i_callback = RecordingCallback::default();
    let mut r_transport = RecordingTransport::default();
    let mut r_callback = RecordingCallback::default();

    responder.deliver(msg1.msg_type, &msg1.payload, NOW, &mut r_transport, &mut r_callback);
    let msg2 = r_transport.sent[0].clone();
    assert_eq!(msg2.msg_type, MessageType::Msg2);

    initiator.deliver(msg2.msg_type, &msg2.payload, NOW, &mut i_transport, &mut i_callback);
    let msg3 = i_transport.sent[0].clone();
    assert_eq!(msg3.msg_type, MessageType::Msg3);

    responder.deliver(msg3.msg_type, &msg3.payload, NOW, &mut r_transport, &mut r_callback);

    let i_keys = i_callback.established.expect("initiator established");
    let r_keys = r_callback.established.expect("responder established");
    assert_eq!(i_keys, r_keys);
    assert!(i_callback.errors.is_empty() && r_callback.errors.is_empty());
    assert_eq!(r_transport.sent.len(), 1);

    assert!(matches!(initiator.state(), HandshakeState::Established));
    assert!(matches!(responder.state(), HandshakeState::Established));
    assert_eq!(initiator.peer_node_id(), Some(0xB0B));
    assert_eq!(responder.peer_node_id(), Some(0xA11CE));
    assert_eq!(initiator.peer_connection_id(), Some(0x0202));
    assert_eq!(responder.peer_connection_id(), Some(0x0101));

    let peer = initiator.peer().unwrap();
    assert_eq!(peer.fabric_id, FABRIC);
    assert_eq!(peer.trust_root, f.root.key.key_id());
}

#[test]
fn chacha_suite_handshake() {
    let f = fixture();
    let cfg = |id| config(id).with_cipher_suite(CipherSuite::ChaCha20Poly1305);
    let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, cfg(1)).unwrap();
    let mut responder = CaseSession::responder(&f.bob, &f.store, cfg(2)).unwrap();

    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
    let i_keys = established(&ev).unwrap();
    let msg3 = sent(&ev);
    let r_keys = established(&responder.handle_message(msg3.msg_type, &msg3.payload, NOW)).unwrap();
    assert_eq!(i_keys, r_keys);
}

#[test]
fn independent_handshakes_derive_different_keys() {
    let f = fixture();
    let run = || {
        let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
        let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();
        let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
        let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
        established(&ev).unwrap()
    };
    assert_ne!(run(), run());
}

#[test]
fn handshake_through_intermediate() {
    let root = Ca::root(1);
    let ica = root.intermediate(2);
    let mut store = store_with_anchors(&[&root]);
    store.load(ica.cert.clone(), common::LOAD).unwrap();

    let alice = ica.credentials(0x1, FABRIC);
    let bob = root.credentials(0x2, FABRIC);

    let (mut initiator, msg1) = CaseSession::initiate(&alice, &store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&bob, &store, config(2)).unwrap();
    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let msg3 = sent(&initiator.handle_message(msg2.msg_type, &msg2.payload, NOW));
    let ev = responder.handle_message(msg3.msg_type, &msg3.payload, NOW);
    assert!(established(&ev).is_some());
    assert_eq!(responder.peer_node_id(), Some(0x1));
    assert!(responder.peer_case_auth_tags().is_empty());
}

#[test]
fn expected_peer_node_id_accepted_when_matching() {
    let f = fixture();
    let (mut initiator, msg1) =
        CaseSession::initiate(&f.alice, &f.store, config(1).with_peer_node_id(0xB0B)).unwrap();
    let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();
    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    assert!(established(&initiator.handle_message(msg2.msg_type, &msg2.payload, NOW)).is_some());
}

// ── Trust failures ───────────────────────────────────────────────────────

#[test]
fn responder_signed_by_untrusted_root_fails_at_msg2() {
    let trusted = Ca::root(1);
    let rogue = Ca::root(2);
    let alice = trusted.credentials(0x1, FABRIC);
    let bob = rogue.credentials(0x2, FABRIC);

    // The responder cannot chain its own NOC locally, so it announces the
    // offered root and leaves the verdict to the initiator.
    let initiator_store = store_with_anchors(&[&trusted]);
    let responder_store = store_with_anchors(&[&trusted]);

    let (mut initiator, msg1) = CaseSession::initiate(&alice, &initiator_store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&bob, &responder_store, config(2)).unwrap();

    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
    assert!(matches!(
        failure(&ev),
        Some(CaseTrustError::CertificateNotTrusted | CaseTrustError::CertificateAuthorityNotFound)
    ));
    let error = sent(&ev);
    assert_eq!(error.msg_type, MessageType::Error);
    assert!(established(&ev).is_none());

    let ev = responder.handle_message(error.msg_type, &error.payload, NOW);
    assert!(matches!(failure(&ev), Some(CaseTrustError::PeerReportedError(1))));
    assert!(!responder.is_established());
}

#[test]
fn responder_without_offered_root_rejects_msg1() {
    let f = fixture();
    let other = Ca::root(9);
    let (mut initiator, msg1) = CaseSession::initiate(
        &f.alice,
        &f.store,
        config(1).with_trusted_roots(vec![other.key.key_id()]),
    )
    .unwrap();
    let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();

    let ev = responder.handle_message(msg1.msg_type, &msg1.payload, NOW);
    assert!(matches!(failure(&ev), Some(CaseTrustError::CertificateNotTrusted)));

    let error = sent(&ev);
    let ev = initiator.handle_message(error.msg_type, &error.payload, NOW);
    assert!(matches!(failure(&ev), Some(CaseTrustError::PeerReportedError(1))));
    assert!(!ev.iter().any(|e| matches!(e, SessionEvent::Send(_))));
}

#[test]
fn responder_whose_root_is_not_offered_rejects_msg1() {
    let trusted = Ca::root(1);
    let rogue = Ca::root(2);
    let alice = trusted.credentials(0x1, FABRIC);
    let bob = rogue.credentials(0x2, FABRIC);

    let initiator_store = store_with_anchors(&[&trusted]);
    let responder_store = store_with_anchors(&[&trusted, &rogue]);

    let (_, msg1) = CaseSession::initiate(&alice, &initiator_store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&bob, &responder_store, config(2)).unwrap();

    let ev = responder.handle_message(msg1.msg_type, &msg1.payload, NOW);
    assert!(matches!(failure(&ev), Some(CaseTrustError::CertificateNotTrusted)));
    assert_eq!(sent(&ev).msg_type, MessageType::Error);
}

#[test]
fn responder_announces_the_root_its_own_certificate_chains_to() {
    let root_a = Ca::root(1);
    let root_b = Ca::root(2);
    let store = store_with_anchors(&[&root_a, &root_b]);
    let alice = root_b.credentials(0xA11CE, FABRIC);
    let bob = root_b.credentials(0xB0B, FABRIC);

    let (mut initiator, msg1) = CaseSession::initiate(&alice, &store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&bob, &store, config(2)).unwrap();

    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    assert_eq!(msg2.msg_type, MessageType::Msg2);
    let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
    assert!(failure(&ev).is_none(), "initiator failed: {:?}", failure(&ev));
    let i_keys = established(&ev).unwrap();
    let msg3 = sent(&ev);
    let r_keys = established(&responder.handle_message(msg3.msg_type, &msg3.payload, NOW)).unwrap();

    assert_eq!(i_keys, r_keys);
    assert_eq!(initiator.peer().unwrap().trust_root, root_b.key.key_id());
    assert_eq!(responder.peer().unwrap().trust_root, root_b.key.key_id());
}

#[test]
fn wrong_fabric_rejected() {
    let root = Ca::root(1);
    let store = store_with_anchors(&[&root]);
    let alice = root.credentials(0x1, FABRIC);
    let bob = root.credentials(0x2, FABRIC + 1);

    let (mut initiator, msg1) = CaseSession::initiate(&alice, &store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&bob, &store, config(2)).unwrap();
    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
    assert!(matches!(failure(&ev), Some(CaseTrustError::WrongPeerIdentity(_))));
}

#[test]
fn unexpected_peer_node_id_rejected() {
    let f = fixture();
    let (mut initiator, msg1) =
        CaseSession::initiate(&f.alice, &f.store, config(1).with_peer_node_id(0xDEAD)).unwrap();
    let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();
    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
    assert!(matches!(failure(&ev), Some(CaseTrustError::WrongPeerIdentity(_))));
    assert_eq!(initiator.peer_node_id(), None);
}

#[test]
fn expired_peer_certificate_rejected() {
    let root = Ca::root(1);
    let store = store_with_anchors(&[&root]);
    let alice = root.credentials(0x1, FABRIC);
    let (key, noc) = root.node_with_validity(0x2, FABRIC, NOW - 1000, NOW - 1);
    let bob = OperationalCredentials::new(key, noc).unwrap();

    let (mut initiator, msg1) = CaseSession::initiate(&alice, &store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&bob, &store, config(2)).unwrap();
    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
    assert!(matches!(
        failure(&ev),
        Some(CaseTrustError::CertificateExpired { .. })
    ));
}

#[test]
fn not_yet_valid_peer_certificate_follows_policy() {
    let root = Ca::root(1);
    let store = store_with_anchors(&[&root]);
    let alice = root.credentials(0x1, FABRIC);
    let (key, noc) = root.node_with_validity(0x2, FABRIC, NOW + 100, NOW + 1000);
    let bob = OperationalCredentials::new(key, noc).unwrap();

    for enforce in [false, true] {
        let policy = ValidationPolicy {
            enforce_not_before: enforce,
        };
        let (mut initiator, msg1) =
            CaseSession::initiate(&alice, &store, config(1).with_validation(policy)).unwrap();
        let mut responder = CaseSession::responder(&bob, &store, config(2)).unwrap();
        let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
        let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
        if enforce {
            assert!(matches!(
                failure(&ev),
                Some(CaseTrustError::CertificateNotYetValid { .. })
            ));
        } else {
            assert!(established(&ev).is_some());
        }
    }
}

#[test]
fn mismatched_identity_protection_key_fails_decryption() {
    let f = fixture();
    let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
    let mut responder =
        CaseSession::responder(&f.bob, &f.store, SessionConfig::new([0x11; 16])).unwrap();
    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let ev = initiator.handle_message(msg2.msg_type, &msg2.payload, NOW);
    assert!(matches!(failure(&ev), Some(CaseTrustError::DecryptionFailed)));
}

// ── Tampering ────────────────────────────────────────────────────────────

#[test]
fn any_bit_flip_in_msg2_fails_decryption() {
    let f = fixture();
    let flip_span = {
        let (_, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
        let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();
        sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW)).payload.len()
    };

    // Every third header bit, then a stride through the encrypted block and tag.
    let header_bits = 84 * 8;
    let bits = (0..header_bits).step_by(3).chain((header_bits..flip_span * 8).step_by(29));
    for bit in bits {
        let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
        let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();
        let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));

        let ev = initiator.handle_message(MessageType::Msg2, &flip(&msg2.payload, bit), NOW);
        assert!(
            matches!(failure(&ev), Some(CaseTrustError::DecryptionFailed)),
            "bit {bit}: {:?}",
            failure(&ev)
        );
        assert!(established(&ev).is_none());
    }
}

#[test]
fn any_bit_flip_in_msg3_fails_decryption() {
    let f = fixture();
    let run_to_msg3 = || {
        let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
        let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();
        let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
        let msg3 = sent(&initiator.handle_message(msg2.msg_type, &msg2.payload, NOW));
        (responder, msg3)
    };
    let len = run_to_msg3().1.payload.len();

    for bit in (0..len * 8).step_by(7) {
        let (mut responder, msg3) = run_to_msg3();
        let ev = responder.handle_message(MessageType::Msg3, &flip(&msg3.payload, bit), NOW);
        assert!(
            matches!(failure(&ev), Some(CaseTrustError::DecryptionFailed)),
            "bit {bit}: {:?}",
            failure(&ev)
        );
        assert!(!responder.is_established());
    }
}

#[test]
fn bit_flip_in_msg1_never_establishes() {
    let f = fixture();
    let len = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap().1.payload.len();

    for bit in (0..len * 8).step_by(5) {
        let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
        let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();

        let ev = responder.handle_message(MessageType::Msg1, &flip(&msg1.payload, bit), NOW);
        let reply = sent(&ev);
        if reply.msg_type == MessageType::Error {
            assert!(failure(&ev).is_some());
            continue;
        }

        let ev = initiator.handle_message(reply.msg_type, &reply.payload, NOW);
        assert!(
            matches!(failure(&ev), Some(CaseTrustError::DecryptionFailed)),
            "bit {bit}: {:?}",
            failure(&ev)
        );
        assert!(!initiator.is_established() && !responder.is_established());
    }
}

#[test]
fn truncated_msg2_is_malformed() {
    let f = fixture();
    let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();
    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let ev = initiator.handle_message(MessageType::Msg2, &msg2.payload[..40], NOW);
    assert!(matches!(failure(&ev), Some(CaseTrustError::MalformedMessage(_))));
}

// ── State machine ────────────────────────────────────────────────────────

#[test]
fn out_of_order_messages_are_state_mismatches() {
    let f = fixture();
    let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();

    // An initiator never accepts Msg1.
    let ev = initiator.handle_message(MessageType::Msg1, &msg1.payload, NOW);
    assert!(matches!(
        failure(&ev),
        Some(CaseTrustError::ProtocolStateMismatch { .. })
    ));
    assert_eq!(sent(&ev).msg_type, MessageType::Error);
    assert!(matches!(initiator.state(), HandshakeState::Failed));

    // Settled sessions ignore further traffic.
    assert!(initiator
        .handle_message(MessageType::Msg2, &[0u8; 200], NOW)
        .is_empty());
}

#[test]
fn replayed_msg1_after_establishment_is_ignored() {
    let f = fixture();
    let (mut initiator, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();
    let msg2 = sent(&responder.handle_message(msg1.msg_type, &msg1.payload, NOW));
    let msg3 = sent(&initiator.handle_message(msg2.msg_type, &msg2.payload, NOW));
    responder.handle_message(msg3.msg_type, &msg3.payload, NOW);
    assert!(responder.is_established());

    assert!(responder
        .handle_message(msg1.msg_type, &msg1.payload, NOW)
        .is_empty());
    assert!(responder.is_established());
}

#[test]
fn abort_wipes_state_silently() {
    let f = fixture();
    let (mut initiator, _msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
    assert!(matches!(initiator.state(), HandshakeState::AwaitingMsg2(_)));
    initiator.abort();
    assert!(matches!(initiator.state(), HandshakeState::Failed));
    assert!(initiator
        .handle_message(MessageType::Msg2, &[0u8; 200], NOW)
        .is_empty());
}

#[test]
fn transport_failure_reports_and_aborts() {
    let f = fixture();
    let (_, msg1) = CaseSession::initiate(&f.alice, &f.store, config(1)).unwrap();
    let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();

    let mut transport = RecordingTransport {
        refuse: true,
        ..Default::default()
    };
    let mut callback = RecordingCallback::default();
    responder.deliver(msg1.msg_type, &msg1.payload, NOW, &mut transport, &mut callback);

    assert!(transport.sent.is_empty());
    assert!(callback.established.is_none());
    assert!(matches!(
        callback.errors.as_slice(),
        [CaseTrustError::Transport(_)]
    ));
    assert!(matches!(responder.state(), HandshakeState::Failed));
}

#[test]
fn refused_error_message_still_reports_the_handshake_failure() {
    let f = fixture();
    let mut responder = CaseSession::responder(&f.bob, &f.store, config(2)).unwrap();

    let mut transport = RecordingTransport {
        refuse: true,
        ..Default::default()
    };
    let mut callback = RecordingCallback::default();
    responder.deliver(MessageType::Msg3, &[0u8; 96], NOW, &mut transport, &mut callback);

    assert!(transport.sent.is_empty());
    assert!(matches!(
        callback.errors.as_slice(),
        [CaseTrustError::ProtocolStateMismatch { .. }]
    ));
    assert!(matches!(responder.state(), HandshakeState::Failed));
}

// ── Setup errors ─────────────────────────────────────────────────────────

#[test]
fn initiate_requires_a_root_to_offer() {
    let f = fixture();
    let empty = CertificateStore::with_capacity(1);
    assert!(matches!(
        CaseSession::initiate(&f.alice, &empty, config(1)),
        Err(CaseTrustError::Config(_))
    ));
}

#[test]
fn credentials_reject_foreign_key() {
    let root = Ca::root(1);
    let (_, noc) = root.node(0x1, FABRIC);
    assert!(matches!(
        OperationalCredentials::new(casetrust::IdentityKeyPair::generate(), noc),
        Err(CaseTrustError::InvalidKey(_))
    ));
}
