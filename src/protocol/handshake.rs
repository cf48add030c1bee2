//! Login handshake for the legacy session protocol
//!
//! The handshake is two request/response exchanges before the session goes
//! active:
//!
//! ```text
//! C->S  [14][name hash]
//! S->C  [8 reserved][status 0][u64 server half-key]
//! C->S  [variant 16|18][block length][magic 255][u16 version][low memory]
//!       [9 x u32 archive CRC][rsa length][credential block]
//! S->C  [status][rights][0]
//! ```
//!
//! The credential block is either RSA ciphertext, which must decrypt to a
//! block starting with the marker byte, or the same fields in clear. Both
//! carry the client and server half-keys that seed the opcode ciphers.
//!
//! Parsing functions take the buffered bytes and return `Ok(None)` until a
//! whole message is available, consuming nothing in that case.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use num_bigint::BigUint;
use rand::Rng;

use crate::core::buffer::{PacketReader, PacketWriter};
use crate::core::text;
use crate::error::{constants, ProtocolError, Result};

use tracing::{debug, instrument};

/// Opcode of the first client message.
pub const CONNECT_REQUEST: u8 = 14;
/// First byte of every login block.
pub const LOGIN_MAGIC: u8 = 255;
/// Client build the server accepts unless configured otherwise.
pub const DEFAULT_CLIENT_VERSION: u16 = 317;
/// First plaintext byte of a correctly decrypted credential block.
pub const RSA_MARKER: u8 = 10;
/// Archive checksums sent by the client (ignored).
pub const ARCHIVE_CRC_COUNT: usize = 9;

const KEY_EXCHANGE_RESERVED: usize = 8;
/// magic + version + low memory + CRCs + rsa length
const BLOCK_PREAMBLE_LEN: usize = 1 + 2 + 1 + ARCHIVE_CRC_COUNT * 4 + 1;

/// Longest accepted username, after normalisation.
pub const MAX_USERNAME_LENGTH: usize = text::MAX_NAME_LENGTH;
/// Longest accepted password.
pub const MAX_PASSWORD_LENGTH: usize = 20;

/// Which login flow the client is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginVariant {
    /// Fresh login from the title screen
    Fresh,
    /// Automatic reconnect after a dropped connection
    Reconnect,
}

impl LoginVariant {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            16 => Some(LoginVariant::Fresh),
            18 => Some(LoginVariant::Reconnect),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        match self {
            LoginVariant::Fresh => 16,
            LoginVariant::Reconnect => 18,
        }
    }
}

/// Status byte of the login reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LoginStatus {
    /// Key exchange accepted; sent in the first reply
    ExchangeKeys = 0,
    Ok = 2,
    InvalidCredentials = 3,
    AccountDisabled = 4,
    AlreadyOnline = 5,
    WorldFull = 7,
    LoginServerOffline = 8,
    TooManyConnections = 9,
    BadSessionId = 10,
    CouldNotComplete = 13,
}

impl LoginStatus {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == LoginStatus::Ok
    }
}

/// First client message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Bits of the username hash used for login-server routing (ignored)
    pub name_hash: u8,
}

/// Decoded second client message.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub variant: LoginVariant,
    pub client_version: u16,
    pub low_memory: bool,
    pub uid: u32,
    pub client_key: u64,
    pub server_key: u64,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("variant", &self.variant)
            .field("client_version", &self.client_version)
            .field("low_memory", &self.low_memory)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// RSA key used on the credential block.
#[derive(Clone)]
pub struct RsaKey {
    modulus: BigUint,
    exponent: BigUint,
}

impl RsaKey {
    pub fn new(modulus: BigUint, exponent: BigUint) -> Self {
        Self { modulus, exponent }
    }

    /// Parse a key from decimal strings, as stored in configuration.
    ///
    /// # Errors
    /// Returns `ProtocolError::ConfigError` if either value is not a positive decimal integer
    pub fn from_decimal(modulus: &str, exponent: &str) -> Result<Self> {
        let parse = |name: &str, value: &str| {
            BigUint::parse_bytes(value.trim().as_bytes(), 10)
                .filter(|v| *v > BigUint::from(1u8))
                .ok_or_else(|| ProtocolError::ConfigError(format!("invalid RSA {name}")))
        };
        Ok(Self::new(parse("modulus", modulus)?, parse("exponent", exponent)?))
    }

    /// Raise `block` to this key's exponent.
    pub fn apply(&self, block: &[u8]) -> Vec<u8> {
        BigUint::from_bytes_be(block)
            .modpow(&self.exponent, &self.modulus)
            .to_bytes_be()
    }
}

impl fmt::Debug for RsaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RsaKey")
            .field("bits", &self.modulus.bits())
            .finish_non_exhaustive()
    }
}

/// Server-side rules applied to login blocks.
#[derive(Debug, Clone)]
pub struct LoginPolicy {
    pub client_version: u16,
    /// Private key for the credential block, `None` to read it in clear
    pub rsa: Option<RsaKey>,
}

impl Default for LoginPolicy {
    fn default() -> Self {
        Self {
            client_version: DEFAULT_CLIENT_VERSION,
            rsa: None,
        }
    }
}

/// Parse the connect request.
///
/// # Errors
/// Returns `ProtocolError::HandshakeError` if the first byte is not [`CONNECT_REQUEST`]
pub fn parse_connect_request(src: &mut BytesMut) -> Result<Option<ConnectRequest>> {
    match src.first() {
        None => return Ok(None),
        Some(&CONNECT_REQUEST) => {}
        Some(_) => {
            return Err(ProtocolError::HandshakeError(
                constants::ERR_BAD_CONNECT_REQUEST.into(),
            ))
        }
    }
    if src.len() < 2 {
        return Ok(None);
    }
    src.advance(1);
    Ok(Some(ConnectRequest {
        name_hash: src.get_u8(),
    }))
}

/// Random 64-bit server half-key.
pub fn generate_server_key() -> u64 {
    rand::rng().random()
}

/// Reply to the connect request.
pub fn key_exchange_reply(server_key: u64) -> Bytes {
    let mut reply = BytesMut::with_capacity(KEY_EXCHANGE_RESERVED + 1 + 8);
    reply.put_bytes(0, KEY_EXCHANGE_RESERVED);
    reply.put_u8(LoginStatus::ExchangeKeys.code());
    reply.put_u64(server_key);
    reply.freeze()
}

/// Reply to the login block.
pub fn login_reply(status: LoginStatus, rights: u8) -> Bytes {
    Bytes::copy_from_slice(&[status.code(), rights, 0])
}

/// Parse the login block.
///
/// # Returns
/// `Ok(None)` until the whole declared block has been buffered.
///
/// # Errors
/// - `HandshakeError` for an unknown variant, an inconsistent block length
///   or an empty ciphertext
/// - `RsaFailure` when the decrypted block does not start with the marker
/// - `BadMagic` / `UnsupportedVersion` for a block from a foreign client
#[instrument(level = "debug", skip(policy, src), fields(buffered = src.len()))]
pub fn parse_login_block(policy: &LoginPolicy, src: &mut BytesMut) -> Result<Option<LoginRequest>> {
    if src.len() < 2 {
        return Ok(None);
    }
    let variant = LoginVariant::from_byte(src[0])
        .ok_or_else(|| ProtocolError::HandshakeError(constants::ERR_BAD_LOGIN_VARIANT.into()))?;
    let block_len = src[1] as usize;
    if block_len < BLOCK_PREAMBLE_LEN {
        return Err(ProtocolError::HandshakeError(
            constants::ERR_BLOCK_LENGTH.into(),
        ));
    }
    if src.len() < 2 + block_len {
        return Ok(None);
    }

    src.advance(2);
    let block = src.split_to(block_len).freeze();
    let mut reader = PacketReader::new(&block);

    let magic = reader.get_u8()?;
    if magic != LOGIN_MAGIC {
        return Err(ProtocolError::BadMagic(magic));
    }
    let client_version = reader.get_u16()?;
    if client_version != policy.client_version {
        return Err(ProtocolError::UnsupportedVersion(client_version));
    }
    let low_memory = reader.get_u8()? == 1;
    reader.skip(ARCHIVE_CRC_COUNT * 4)?;
    let rsa_len = reader.get_u8()? as usize;

    let credentials = match &policy.rsa {
        Some(key) => {
            if rsa_len == 0 {
                return Err(ProtocolError::HandshakeError(
                    constants::ERR_EMPTY_CIPHERTEXT.into(),
                ));
            }
            if rsa_len > reader.remaining() {
                return Err(ProtocolError::HandshakeError(
                    constants::ERR_BLOCK_LENGTH.into(),
                ));
            }
            let plain = key.apply(reader.get_bytes(rsa_len)?);
            match plain.split_first() {
                Some((&RSA_MARKER, rest)) => rest.to_vec(),
                _ => return Err(ProtocolError::RsaFailure(constants::ERR_RSA_MARKER.into())),
            }
        }
        None => reader.rest().to_vec(),
    };

    let mut fields = PacketReader::new(&credentials);
    let uid = fields.get_u32()?;
    let client_key = fields.get_u64()?;
    let server_key = fields.get_u64()?;
    let username = fields.get_string()?;
    let password = fields.get_string()?;

    debug!(?variant, low_memory, "Login block decoded");

    Ok(Some(LoginRequest {
        variant,
        client_version,
        low_memory,
        uid,
        client_key,
        server_key,
        username,
        password,
    }))
}

/// Build a login block the way a client does. `rsa` is the server's public key.
///
/// # Errors
/// Returns `ProtocolError::FrameTooLarge` if the block does not fit its one-byte length
pub fn client_login_block(request: &LoginRequest, rsa: Option<&RsaKey>) -> Result<Bytes> {
    let mut credentials = PacketWriter::new();
    if rsa.is_some() {
        credentials.put_u8(RSA_MARKER);
    }
    credentials.put_u32(request.uid);
    credentials.put_u64(request.client_key);
    credentials.put_u64(request.server_key);
    credentials.put_string(&request.username);
    credentials.put_string(&request.password);

    let encoded = match rsa {
        Some(key) => key.apply(credentials.as_bytes()),
        None => credentials.as_bytes().to_vec(),
    };
    let rsa_len = u8::try_from(encoded.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: encoded.len(),
        max: u8::MAX as usize,
    })?;

    let mut block = PacketWriter::new();
    block.put_u8(LOGIN_MAGIC);
    block.put_u16(request.client_version);
    block.put_u8(request.low_memory as u8);
    for _ in 0..ARCHIVE_CRC_COUNT {
        block.put_u32(0);
    }
    block.put_u8(rsa_len);
    block.put_bytes(&encoded);

    let block_len = u8::try_from(block.len()).map_err(|_| ProtocolError::FrameTooLarge {
        size: block.len(),
        max: u8::MAX as usize,
    })?;

    let mut out = BytesMut::with_capacity(2 + block.len());
    out.put_u8(request.variant.as_byte());
    out.put_u8(block_len);
    out.extend_from_slice(block.as_bytes());
    Ok(out.freeze())
}

/// Case-fold a username and treat underscores as spaces.
pub fn normalize_username(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c == '_' { ' ' } else { c.to_ascii_lowercase() })
        .collect()
}

/// Character-class rule for a normalised username: 1-12 of `[a-z0-9 ]`,
/// with no leading, trailing or doubled spaces.
pub fn is_valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_USERNAME_LENGTH
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == ' ')
        && !name.starts_with(' ')
        && !name.ends_with(' ')
        && !name.contains("  ")
}

/// 1-20 printable ASCII characters.
pub fn is_valid_password(password: &str) -> bool {
    !password.is_empty()
        && password.len() <= MAX_PASSWORD_LENGTH
        && password.chars().all(|c| c.is_ascii_graphic() || c == ' ')
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn request(version: u16) -> LoginRequest {
        LoginRequest {
            variant: LoginVariant::Fresh,
            client_version: version,
            low_memory: false,
            uid: 7,
            client_key: 0x0102_0304_0506_0708,
            server_key: 0x1112_1314_1516_1718,
            username: "Zezima".into(),
            password: "hunter2".into(),
        }
    }

    #[test]
    fn test_connect_request_needs_two_bytes() {
        let mut src = BytesMut::from(&[CONNECT_REQUEST][..]);
        assert!(parse_connect_request(&mut src).unwrap().is_none());
        assert_eq!(src.len(), 1);
        src.put_u8(3);
        assert_eq!(
            parse_connect_request(&mut src).unwrap(),
            Some(ConnectRequest { name_hash: 3 })
        );
        assert!(src.is_empty());
    }

    #[test]
    fn test_wrong_connect_opcode_is_fatal() {
        let mut src = BytesMut::from(&[15u8, 0][..]);
        assert!(matches!(
            parse_connect_request(&mut src),
            Err(ProtocolError::HandshakeError(_))
        ));
    }

    #[test]
    fn test_key_exchange_layout() {
        let reply = key_exchange_reply(0xAABB_CCDD_EEFF_0011);
        assert_eq!(reply.len(), 17);
        assert_eq!(&reply[..8], &[0; 8]);
        assert_eq!(reply[8], 0);
        assert_eq!(&reply[9..], &0xAABB_CCDD_EEFF_0011u64.to_be_bytes());
    }

    #[test]
    fn test_clear_block_round_trip() {
        let block = client_login_block(&request(317), None).unwrap();
        let mut src = BytesMut::from(&block[..]);
        let parsed = parse_login_block(&LoginPolicy::default(), &mut src)
            .unwrap()
            .unwrap();
        assert_eq!(parsed, request(317));
        assert!(src.is_empty());
    }

    #[test]
    fn test_partial_block_consumes_nothing() {
        let block = client_login_block(&request(317), None).unwrap();
        let mut src = BytesMut::from(&block[..block.len() - 1]);
        assert!(parse_login_block(&LoginPolicy::default(), &mut src)
            .unwrap()
            .is_none());
        assert_eq!(src.len(), block.len() - 1);
    }

    #[test]
    fn test_version_mismatch() {
        let block = client_login_block(&request(318), None).unwrap();
        let mut src = BytesMut::from(&block[..]);
        assert!(matches!(
            parse_login_block(&LoginPolicy::default(), &mut src),
            Err(ProtocolError::UnsupportedVersion(318))
        ));
    }

    #[test]
    fn test_bad_magic() {
        let block = client_login_block(&request(317), None).unwrap();
        let mut raw = block.to_vec();
        raw[2] = 254;
        let mut src = BytesMut::from(&raw[..]);
        assert!(matches!(
            parse_login_block(&LoginPolicy::default(), &mut src),
            Err(ProtocolError::BadMagic(254))
        ));
    }

    #[test]
    fn test_unknown_variant() {
        let mut src = BytesMut::from(&[17u8, 60][..]);
        assert!(matches!(
            parse_login_block(&LoginPolicy::default(), &mut src),
            Err(ProtocolError::HandshakeError(_))
        ));
    }

    #[test]
    fn test_username_rules() {
        assert_eq!(normalize_username("Mod_Ash"), "mod ash");
        assert!(is_valid_username("mod ash"));
        assert!(is_valid_username("a1"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username(" lead"));
        assert!(!is_valid_username("trail "));
        assert!(!is_valid_username("two  gaps"));
        assert!(!is_valid_username("thirteenchars"));
        assert!(!is_valid_username("bad!name"));
    }

    #[test]
    fn test_password_rules() {
        assert!(is_valid_password("hunter2"));
        assert!(!is_valid_password(""));
        assert!(!is_valid_password(&"x".repeat(21)));
        assert!(!is_valid_password("tab\there"));
    }

    #[test]
    fn test_login_request_debug_hides_secrets() {
        let rendered = format!("{:?}", request(317));
        assert!(rendered.contains("Zezima"));
        assert!(!rendered.contains("hunter2"));
    }
}
