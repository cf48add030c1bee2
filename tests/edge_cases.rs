#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Boundary conditions of the handshake, the dispatcher and the login checks

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use realm_protocol::core::frame::InboundFrame;
use realm_protocol::error::{constants, ProtocolError};
use realm_protocol::protocol::dispatcher::Dispatcher;
use realm_protocol::protocol::handshake::{
    client_login_block, parse_connect_request, parse_login_block, LoginPolicy, LoginRequest,
    LoginStatus, LoginVariant, DEFAULT_CLIENT_VERSION,
};
use realm_protocol::protocol::messages::ClientEvent;
use realm_protocol::service::{
    Authenticator, MemoryBanList, MemoryProfileStore, Population, Profile, ProfileStore,
};

const HOST: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

fn request(username: &str, password: &str, server_key: u64) -> LoginRequest {
    LoginRequest {
        variant: LoginVariant::Fresh,
        client_version: DEFAULT_CLIENT_VERSION,
        low_memory: false,
        uid: 0,
        client_key: 1,
        server_key,
        username: username.into(),
        password: password.into(),
    }
}

// ============================================================================
// HANDSHAKE EDGE CASES
// ============================================================================

#[test]
fn test_connect_request_needs_two_bytes() {
    let mut src = BytesMut::from(&[14u8][..]);
    assert!(parse_connect_request(&mut src).unwrap().is_none());
    assert_eq!(src.len(), 1);

    src.extend_from_slice(&[0x3F]);
    let request = parse_connect_request(&mut src).unwrap().unwrap();
    assert_eq!(request.name_hash, 0x3F);
    assert!(src.is_empty());
}

#[test]
fn test_unknown_login_variant() {
    let mut src = BytesMut::from(&[17u8, 40][..]);
    match parse_login_block(&LoginPolicy::default(), &mut src) {
        Err(ProtocolError::HandshakeError(reason)) => {
            assert_eq!(reason, constants::ERR_BAD_LOGIN_VARIANT)
        }
        other => panic!("expected variant error, got {other:?}"),
    }
}

#[test]
fn test_reconnect_variant_parses() {
    let mut login = request("zezima", "pw", 9);
    login.variant = LoginVariant::Reconnect;
    let block = client_login_block(&login, None).unwrap();
    assert_eq!(block[0], 18);

    let mut src = BytesMut::from(&block[..]);
    let parsed = parse_login_block(&LoginPolicy::default(), &mut src).unwrap().unwrap();
    assert_eq!(parsed.variant, LoginVariant::Reconnect);
}

#[test]
fn test_login_block_waits_for_declared_length() {
    let block = client_login_block(&request("zezima", "pw", 9), None).unwrap();
    let mut src = BytesMut::from(&block[..block.len() - 1]);
    assert!(parse_login_block(&LoginPolicy::default(), &mut src).unwrap().is_none());
    assert_eq!(src.len(), block.len() - 1);
}

#[test]
fn test_bad_login_magic() {
    let mut raw = client_login_block(&request("zezima", "pw", 9), None).unwrap().to_vec();
    raw[2] = 0xFE;
    let mut src = BytesMut::from(&raw[..]);
    assert!(matches!(
        parse_login_block(&LoginPolicy::default(), &mut src),
        Err(ProtocolError::BadMagic(0xFE))
    ));
}

#[test]
fn test_unterminated_password_is_fatal() {
    let mut raw = client_login_block(&request("zezima", "pw", 9), None).unwrap().to_vec();
    raw.pop();
    raw[1] -= 1;
    let mut src = BytesMut::from(&raw[..]);
    assert!(parse_login_block(&LoginPolicy::default(), &mut src).is_err());
}

// ============================================================================
// DISPATCHER EDGE CASES
// ============================================================================

#[test]
fn test_unrouted_opcode() {
    let dispatcher = Dispatcher::standard().unwrap();
    let frame = InboundFrame {
        opcode: 1,
        payload: Bytes::new(),
    };
    assert!(matches!(
        dispatcher.dispatch(&frame),
        Err(ProtocolError::UnknownOpcode(1))
    ));
}

#[test]
fn test_short_payload_is_malformed() {
    let dispatcher = Dispatcher::standard().unwrap();
    let frame = InboundFrame {
        opcode: 4,
        payload: Bytes::from_static(&[1]),
    };
    assert!(matches!(
        dispatcher.dispatch(&frame),
        Err(ProtocolError::MalformedFrame { opcode: 4, .. })
    ));
}

#[test]
fn test_keep_alive_has_no_payload() {
    let dispatcher = Dispatcher::standard().unwrap();
    let frame = InboundFrame {
        opcode: 0,
        payload: Bytes::new(),
    };
    assert_eq!(dispatcher.dispatch(&frame).unwrap(), ClientEvent::KeepAlive);
}

// ============================================================================
// LOGIN CHECK EDGE CASES
// ============================================================================

fn authenticator(
    profiles: Arc<MemoryProfileStore>,
    banned: Vec<IpAddr>,
    capacity: u16,
    auto_register: bool,
) -> Authenticator {
    Authenticator::new(
        profiles,
        Arc::new(MemoryBanList::new(banned)),
        Arc::new(Population::new(capacity)),
        auto_register,
    )
}

#[test]
fn test_stale_server_key_wins_over_everything() {
    let auth = authenticator(Arc::new(MemoryProfileStore::new()), vec![HOST], 0, false);
    let verdict = auth.evaluate(HOST, &request("", "", 1), 2);
    assert_eq!(verdict.status, LoginStatus::BadSessionId);
}

#[test]
fn test_underscores_and_case_fold_to_one_name() {
    let profiles = Arc::new(MemoryProfileStore::new());
    let auth = authenticator(Arc::clone(&profiles), Vec::new(), 10, true);

    let first = auth.evaluate(HOST, &request("Lynx_Titan", "pw", 5), 5);
    assert_eq!(first.status, LoginStatus::Ok);
    assert_eq!(first.admitted.as_ref().unwrap().profile.username, "lynx titan");

    let second = auth.evaluate(HOST, &request("LYNX TITAN", "pw", 5), 5);
    assert_eq!(second.status, LoginStatus::AlreadyOnline);
}

#[test]
fn test_banned_host_frees_its_slot() {
    let auth = authenticator(Arc::new(MemoryProfileStore::new()), vec![HOST], 1, true);
    let verdict = auth.evaluate(HOST, &request("zezima", "pw", 3), 3);
    assert_eq!(verdict.status, LoginStatus::AccountDisabled);
    drop(verdict);
    assert!(auth.population().is_empty());

    let elsewhere = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11));
    assert_eq!(
        auth.evaluate(elsewhere, &request("zezima", "pw", 3), 3).status,
        LoginStatus::Ok
    );
}

#[test]
fn test_saved_profile_is_loaded_on_next_login() {
    let profiles = Arc::new(MemoryProfileStore::new());
    let mut stored = Profile::new("zezima", "pw");
    stored.rights = 2;
    stored.run_energy = 42;
    profiles.save(&stored).unwrap();

    let auth = authenticator(Arc::clone(&profiles), Vec::new(), 5, false);
    let wrong = auth.evaluate(HOST, &request("zezima", "nope", 1), 1);
    assert_eq!(wrong.status, LoginStatus::InvalidCredentials);

    let verdict = auth.evaluate(HOST, &request("zezima", "pw", 1), 1);
    assert_eq!(verdict.status, LoginStatus::Ok);
    assert_eq!(verdict.rights, 2);
    assert_eq!(verdict.admitted.unwrap().profile.run_energy, 42);
}
