// test-only module included via protocol/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;

use bytes::BytesMut;
use num_bigint::BigUint;
use tokio_util::codec::{Decoder, Encoder};

use crate::core::frame::{inbound_size, FrameBuilder, FrameReader};
use crate::protocol::cipher::CipherPair;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::*;
use crate::protocol::messages::ClientEvent;
use crate::protocol::session::{Inbound, Outbound, Session, Stage};

/// Key pair over two Mersenne primes (2^521 - 1, 2^607 - 1).
fn rsa_pair() -> (RsaKey, RsaKey) {
    let one = BigUint::from(1u8);
    let p = (BigUint::from(1u8) << 521usize) - &one;
    let q = (BigUint::from(1u8) << 607usize) - &one;
    let modulus = &p * &q;
    let phi = (&p - &one) * (&q - &one);
    let public = BigUint::from(65_537u32);
    let private = public.modinv(&phi).expect("exponent is invertible");
    (
        RsaKey::new(modulus.clone(), private),
        RsaKey::new(modulus, public),
    )
}

fn request(server_key: u64) -> LoginRequest {
    LoginRequest {
        variant: LoginVariant::Fresh,
        client_version: DEFAULT_CLIENT_VERSION,
        low_memory: true,
        uid: 99,
        client_key: 0x0BAD_F00D_DEAD_BEEF,
        server_key,
        username: "guthix".into(),
        password: "balance".into(),
    }
}

fn encode(session: &mut Session, item: Outbound) -> BytesMut {
    let mut dst = BytesMut::new();
    session.encode(item, &mut dst).unwrap();
    dst
}

#[test]
fn test_encrypted_login_flow() {
    let (private, public) = rsa_pair();
    let policy = Arc::new(LoginPolicy {
        client_version: DEFAULT_CLIENT_VERSION,
        rsa: Some(private),
    });
    let mut session = Session::new(policy);

    // =================== Step 1: Connect request ===================
    let mut src = BytesMut::from(&[CONNECT_REQUEST, 0][..]);
    assert!(matches!(
        session.decode(&mut src).unwrap(),
        Some(Inbound::Connect(_))
    ));
    let reply = session.key_exchange_reply();
    let wire = encode(&mut session, reply);
    assert_eq!(wire[8], 0);
    let server_key = u64::from_be_bytes(wire[9..17].try_into().unwrap());

    // =================== Step 2: Encrypted login block ===================
    let block = client_login_block(&request(server_key), Some(&public)).unwrap();
    let mut src = BytesMut::from(&block[..]);
    let login = match session.decode(&mut src).unwrap() {
        Some(Inbound::Login(login)) => login,
        other => panic!("expected login block, got {other:?}"),
    };
    assert_eq!(login, request(server_key));

    // =================== Step 3: Verdict ===================
    let reply = session.complete_login(&login, LoginStatus::Ok, 1).unwrap();
    assert_eq!(&encode(&mut session, reply)[..], &[2, 1, 0]);
    assert_eq!(session.stage(), Stage::Active);

    // =================== Step 4: Masked frames both ways ===================
    let mut client = CipherPair::from_halves(login.client_key, login.server_key);

    let mut src = BytesMut::new();
    let mut builder = FrameBuilder::fixed(185, 2);
    builder.put_u16(2458);
    builder
        .finish()
        .unwrap()
        .encode_into(&mut src, Some(client.inbound.next_key()));

    let frame = match session.decode(&mut src).unwrap() {
        Some(Inbound::Frame(frame)) => frame,
        other => panic!("expected frame, got {other:?}"),
    };
    let event = Dispatcher::new().unwrap().dispatch(&frame).unwrap();
    assert_eq!(event, ClientEvent::ButtonClicked(2458));

    let logout = crate::protocol::outgoing::logout().unwrap();
    let mut wire = encode(&mut session, logout.into());
    let mut reader = FrameReader::new();
    let echoed = reader
        .decode(&mut wire, Some(&mut client.outbound), |_| {
            crate::core::frame::FrameSize::Fixed(0)
        })
        .unwrap()
        .unwrap();
    assert_eq!(echoed.opcode, crate::protocol::outgoing::LOGOUT);
}

#[test]
fn test_tampered_ciphertext_fails_marker_check() {
    let (private, public) = rsa_pair();
    let policy = LoginPolicy {
        client_version: DEFAULT_CLIENT_VERSION,
        rsa: Some(private),
    };
    let block = client_login_block(&request(1), Some(&public)).unwrap();
    let mut raw = block.to_vec();
    // Zeroed ciphertext decrypts to zero, which can never start with the marker.
    let ciphertext_start = 2 + 1 + 2 + 1 + ARCHIVE_CRC_COUNT * 4 + 1;
    raw[ciphertext_start..].fill(0);

    let mut src = BytesMut::from(&raw[..]);
    assert!(matches!(
        parse_login_block(&policy, &mut src),
        Err(crate::error::ProtocolError::RsaFailure(_))
    ));
}

#[test]
fn test_empty_ciphertext_is_fatal() {
    let (private, _) = rsa_pair();
    let policy = LoginPolicy {
        client_version: DEFAULT_CLIENT_VERSION,
        rsa: Some(private),
    };
    let mut raw = client_login_block(&request(1), None).unwrap().to_vec();
    // rsa length byte sits after variant, length, magic, version, low memory and CRCs
    raw[2 + 1 + 2 + 1 + ARCHIVE_CRC_COUNT * 4] = 0;

    let mut src = BytesMut::from(&raw[..]);
    assert!(parse_login_block(&policy, &mut src).is_err());
}

#[test]
fn test_frames_split_across_reads() {
    let mut session = Session::with_server_key(Arc::new(LoginPolicy::default()), 5);
    let mut src = BytesMut::from(&[CONNECT_REQUEST, 0][..]);
    session.decode(&mut src).unwrap();
    let mut src = BytesMut::from(&client_login_block(&request(5), None).unwrap()[..]);
    let Some(Inbound::Login(login)) = session.decode(&mut src).unwrap() else {
        panic!("expected login block");
    };
    session.complete_login(&login, LoginStatus::Ok, 0).unwrap();

    let mut client = CipherPair::from_halves(login.client_key, login.server_key);
    let mut wire = BytesMut::new();
    for opcode in [0u8, 3, 202] {
        let size = match inbound_size(opcode) {
            crate::core::frame::FrameSize::Fixed(n) => n,
            other => panic!("unexpected framing {other:?}"),
        };
        let mut builder = FrameBuilder::fixed(opcode, size);
        builder.put_bytes(&vec![1; size as usize]);
        builder
            .finish()
            .unwrap()
            .encode_into(&mut wire, Some(client.inbound.next_key()));
    }

    let mut src = BytesMut::new();
    let mut opcodes = Vec::new();
    for byte in wire.iter() {
        src.extend_from_slice(&[*byte]);
        while let Some(Inbound::Frame(frame)) = session.decode(&mut src).unwrap() {
            opcodes.push(frame.opcode);
        }
    }
    assert_eq!(opcodes, vec![0, 3, 202]);
}
