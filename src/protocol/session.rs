//! Per-connection session state machine.
//!
//! A [`Session`] is the codec of its connection: it implements both
//! [`Decoder`] and [`Encoder`], so a `Framed<TcpStream, Session>` reads
//! handshake messages and frames in whatever form the current stage expects.
//!
//! ```text
//! Connected --connect request--> Authenticating --login ok--> Active
//!     \                               \                          \
//!      `------------- violation / rejected login / teardown ------`--> Closed
//! ```
//!
//! Stages only move forward. Once a login block is decoded the session stops
//! decoding until [`Session::complete_login`] delivers the verdict; the
//! verdict is computed off the I/O path and may take a while.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace};

use crate::core::frame::{inbound_size, FrameReader, InboundFrame, OutgoingFrame};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::cipher::CipherPair;
use crate::protocol::handshake::{
    self, generate_server_key, ConnectRequest, LoginPolicy, LoginRequest, LoginStatus,
};

/// Lifecycle stage of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Connected,
    Authenticating,
    Active,
    Closed,
}

/// Items produced by the session decoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Connect(ConnectRequest),
    Login(LoginRequest),
    Frame(InboundFrame),
}

/// Items accepted by the session encoder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Handshake bytes, written as-is
    Raw(Bytes),
    /// Framed message; the opcode is masked when written
    Frame(OutgoingFrame),
}

impl From<OutgoingFrame> for Outbound {
    fn from(frame: OutgoingFrame) -> Self {
        Outbound::Frame(frame)
    }
}

#[derive(Debug)]
pub struct Session {
    stage: Stage,
    policy: Arc<LoginPolicy>,
    server_key: u64,
    login_pending: bool,
    ciphers: Option<CipherPair>,
    reader: FrameReader,
    frames_in: u64,
    frames_out: u64,
}

impl Session {
    /// New session with a random server half-key.
    pub fn new(policy: Arc<LoginPolicy>) -> Self {
        Self::with_server_key(policy, generate_server_key())
    }

    pub fn with_server_key(policy: Arc<LoginPolicy>, server_key: u64) -> Self {
        Self {
            stage: Stage::Connected,
            policy,
            server_key,
            login_pending: false,
            ciphers: None,
            reader: FrameReader::new(),
            frames_in: 0,
            frames_out: 0,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn server_key(&self) -> u64 {
        self.server_key
    }

    pub fn is_closed(&self) -> bool {
        self.stage == Stage::Closed
    }

    /// Frames decoded and encoded while active.
    pub fn frame_counts(&self) -> (u64, u64) {
        (self.frames_in, self.frames_out)
    }

    fn transition(&mut self, next: Stage) {
        if next > self.stage {
            trace!(from = ?self.stage, to = ?next, "Session stage change");
            self.stage = next;
        }
    }

    /// Reply to the connect request.
    pub fn key_exchange_reply(&self) -> Outbound {
        Outbound::Raw(handshake::key_exchange_reply(self.server_key))
    }

    /// Apply the verdict for the pending login block.
    ///
    /// On [`LoginStatus::Ok`] the ciphers are seeded from the request's
    /// half-keys and the session becomes active. Any other status leaves the
    /// session waiting to be closed once the reply has been flushed.
    ///
    /// # Errors
    /// Returns `ProtocolError::HandshakeError` if no login block is pending
    pub fn complete_login(
        &mut self,
        request: &LoginRequest,
        status: LoginStatus,
        rights: u8,
    ) -> Result<Outbound> {
        if self.stage != Stage::Authenticating || !self.login_pending {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_LOGIN_NOT_PENDING.into(),
            ));
        }

        if status.is_ok() {
            self.ciphers = Some(CipherPair::from_halves(
                request.client_key,
                request.server_key,
            ));
            self.login_pending = false;
            self.transition(Stage::Active);
        }
        debug!(status = ?status, "Login verdict applied");
        Ok(Outbound::Raw(handshake::login_reply(status, rights)))
    }

    /// Enter the terminal stage. Further input is discarded.
    pub fn close(&mut self) {
        self.transition(Stage::Closed);
        self.ciphers = None;
    }

    fn decode_stage(&mut self, src: &mut BytesMut) -> Result<Option<Inbound>> {
        match self.stage {
            Stage::Connected => {
                let request = handshake::parse_connect_request(src)?;
                Ok(request.map(|request| {
                    self.transition(Stage::Authenticating);
                    Inbound::Connect(request)
                }))
            }
            Stage::Authenticating if self.login_pending => Ok(None),
            Stage::Authenticating => {
                let request = handshake::parse_login_block(&self.policy, src)?;
                Ok(request.map(|request| {
                    self.login_pending = true;
                    Inbound::Login(request)
                }))
            }
            Stage::Active => {
                let ciphers = self.ciphers.as_mut().ok_or_else(|| {
                    ProtocolError::HandshakeError(constants::ERR_CIPHER_NOT_READY.into())
                })?;
                let frame = self
                    .reader
                    .decode(src, Some(&mut ciphers.inbound), inbound_size)?;
                if frame.is_some() {
                    self.frames_in += 1;
                }
                Ok(frame.map(Inbound::Frame))
            }
            Stage::Closed => {
                src.clear();
                Ok(None)
            }
        }
    }
}

impl Decoder for Session {
    type Item = Inbound;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let result = self.decode_stage(src);
        if result.is_err() {
            self.close();
            src.clear();
        }
        result
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        // A partial frame at end of stream is dropped with the connection.
        self.decode(src)
    }
}

impl Encoder<Outbound> for Session {
    type Error = ProtocolError;

    fn encode(&mut self, item: Outbound, dst: &mut BytesMut) -> Result<()> {
        if self.stage == Stage::Closed {
            return Err(ProtocolError::SessionClosed);
        }
        match item {
            Outbound::Raw(bytes) => dst.extend_from_slice(&bytes),
            Outbound::Frame(frame) => {
                let ciphers = match (self.stage, self.ciphers.as_mut()) {
                    (Stage::Active, Some(ciphers)) => ciphers,
                    _ => {
                        return Err(ProtocolError::HandshakeError(
                            constants::ERR_CIPHER_NOT_READY.into(),
                        ))
                    }
                };
                frame.encode_into(dst, Some(ciphers.outbound.next_key()));
                self.frames_out += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::core::frame::FrameBuilder;
    use crate::protocol::handshake::{client_login_block, LoginVariant};

    const SERVER_KEY: u64 = 0x5555_6666_7777_8888;

    fn session() -> Session {
        Session::with_server_key(Arc::new(LoginPolicy::default()), SERVER_KEY)
    }

    fn login(version: u16) -> LoginRequest {
        LoginRequest {
            variant: LoginVariant::Fresh,
            client_version: version,
            low_memory: false,
            uid: 0,
            client_key: 0x1234,
            server_key: SERVER_KEY,
            username: "tester".into(),
            password: "secret".into(),
        }
    }

    fn authenticate(session: &mut Session) -> LoginRequest {
        let mut src = BytesMut::from(&[14u8, 0][..]);
        assert!(matches!(
            session.decode(&mut src).unwrap(),
            Some(Inbound::Connect(_))
        ));
        let mut src = BytesMut::from(&client_login_block(&login(317), None).unwrap()[..]);
        match session.decode(&mut src).unwrap() {
            Some(Inbound::Login(request)) => request,
            other => panic!("expected login, got {other:?}"),
        }
    }

    #[test]
    fn test_stages_move_forward() {
        let mut session = session();
        assert_eq!(session.stage(), Stage::Connected);
        let request = authenticate(&mut session);
        assert_eq!(session.stage(), Stage::Authenticating);

        let reply = session
            .complete_login(&request, LoginStatus::Ok, 2)
            .unwrap();
        assert_eq!(reply, Outbound::Raw(Bytes::from_static(&[2, 2, 0])));
        assert_eq!(session.stage(), Stage::Active);

        session.close();
        session.transition(Stage::Active);
        assert_eq!(session.stage(), Stage::Closed);
    }

    #[test]
    fn test_pending_login_holds_input() {
        let mut session = session();
        authenticate(&mut session);
        let mut src = BytesMut::from(&[0u8, 1, 2][..]);
        assert!(session.decode(&mut src).unwrap().is_none());
        assert_eq!(src.len(), 3);
    }

    #[test]
    fn test_rejected_login_stays_inactive() {
        let mut session = session();
        let request = authenticate(&mut session);
        let reply = session
            .complete_login(&request, LoginStatus::WorldFull, 0)
            .unwrap();
        assert_eq!(reply, Outbound::Raw(Bytes::from_static(&[7, 0, 0])));
        assert_eq!(session.stage(), Stage::Authenticating);

        let mut dst = BytesMut::new();
        let frame = FrameBuilder::fixed(109, 0).finish().unwrap();
        assert!(session.encode(frame.into(), &mut dst).is_err());
    }

    #[test]
    fn test_violation_closes_session() {
        let mut session = session();
        let mut src = BytesMut::from(&[14u8, 0][..]);
        session.decode(&mut src).unwrap();

        let mut src = BytesMut::from(&client_login_block(&login(300), None).unwrap()[..]);
        assert!(session.decode(&mut src).is_err());
        assert_eq!(session.stage(), Stage::Closed);

        let mut more = BytesMut::from(&[1u8, 2, 3][..]);
        assert!(session.decode(&mut more).unwrap().is_none());
        assert!(more.is_empty());
    }

    #[test]
    fn test_verdict_without_login_is_rejected() {
        let mut session = session();
        assert!(session
            .complete_login(&login(317), LoginStatus::Ok, 0)
            .is_err());
    }

    #[test]
    fn test_outbound_frames_draw_in_send_order() {
        let mut session = session();
        let request = authenticate(&mut session);
        session
            .complete_login(&request, LoginStatus::Ok, 0)
            .unwrap();

        let mut client = CipherPair::from_halves(request.client_key, request.server_key);
        let mut dst = BytesMut::new();
        for opcode in [73u8, 249, 110] {
            let mut builder = FrameBuilder::var_byte(opcode);
            builder.put_u8(1);
            session.encode(builder.finish().unwrap().into(), &mut dst).unwrap();
        }

        for (chunk, opcode) in dst.chunks(3).zip([73u8, 249, 110]) {
            assert_eq!(chunk[0].wrapping_sub(client.outbound.next_key() as u8), opcode);
        }
        assert_eq!(session.frame_counts(), (0, 3));
    }
}
