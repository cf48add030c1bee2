//! # Error Types
//!
//! Error handling for the session protocol core.
//!
//! Every fallible operation in the crate returns [`Result`], whose error type
//! is [`ProtocolError`]. The variants follow the failure taxonomy the server
//! acts on:
//!
//! ## Error Categories
//! - **Transport**: socket reset or closed; the session is dropped, never retried
//! - **Codec**: buffer underflow, invalid bit counts or byte orders, oversized frames
//! - **Handshake**: bad magic, version mismatch, failed RSA marker; fatal for the session
//! - **Dispatch**: unknown or duplicated opcodes in the frame table
//! - **Reactor**: listener/multiplexer failure that survived the single restart
//! - **Configuration**: invalid or unreadable configuration
//!
//! ## Example Usage
//! ```rust
//! use realm_protocol::error::{ProtocolError, Result};
//! use tracing::{error, info};
//!
//! fn checked_length(len: usize) -> Result<u8> {
//!     u8::try_from(len).map_err(|_| ProtocolError::FrameTooLarge { size: len, max: 255 })
//! }
//!
//! match checked_length(300) {
//!     Ok(len) => info!(len, "length fits"),
//!     Err(e) => error!(error = %e, "length rejected"),
//! }
//! ```

use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Handshake errors
    pub const ERR_BAD_CONNECT_REQUEST: &str = "First frame is not a login connect request";
    pub const ERR_BAD_LOGIN_VARIANT: &str = "Unknown login variant";
    pub const ERR_EMPTY_CIPHERTEXT: &str = "Credential block ciphertext is empty";
    pub const ERR_RSA_MARKER: &str = "Credential block marker check failed";
    pub const ERR_BLOCK_LENGTH: &str = "Declared login block length is inconsistent";
    pub const ERR_MISSING_TERMINATOR: &str = "String field is missing its terminator";

    /// Session errors
    pub const ERR_CIPHER_NOT_READY: &str = "Frame cipher used before the session is active";
    pub const ERR_LOGIN_NOT_PENDING: &str = "No login request is awaiting a verdict";
    pub const ERR_OUTBOX_CLOSED: &str = "Session outbox is closed";
    pub const ERR_OUTBOX_FULL: &str = "Session outbox is over its backpressure limit";

    /// Dispatch errors
    pub const ERR_HANDLER_WITHOUT_SIZE: &str = "Handler registered for an opcode the size table never frames";

    /// Reactor errors
    pub const ERR_LISTENER_RESTART_FAILED: &str = "Listener failed again after its automatic restart";

    /// Synchronisation
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// ProtocolError is the primary error type for all protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Buffer underflow: needed {needed} bytes, {remaining} remaining")]
    Underflow { needed: usize, remaining: usize },

    #[error("Invalid bit count: {0} (valid range: 1-32)")]
    InvalidBitCount(u32),

    #[error("Byte order {order} is not defined for {width}-byte values")]
    InvalidByteOrder { order: &'static str, width: usize },

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Value {value} does not fit in {bits} bits")]
    ValueOutOfRange { value: i64, bits: u32 },

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Bad login magic: {0}")]
    BadMagic(u8),

    #[error("Unsupported client version: {0}")]
    UnsupportedVersion(u16),

    #[error("RSA decoding failed: {0}")]
    RsaFailure(String),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out (no activity)")]
    ConnectionTimeout,

    #[error("No handler registered for opcode {0}")]
    UnknownOpcode(u8),

    #[error("Opcode {0} registered more than once")]
    DuplicateOpcode(u8),

    #[error("Malformed frame for opcode {opcode}: {reason}")]
    MalformedFrame { opcode: u8, reason: String },

    #[error("Reactor failure: {0}")]
    ReactorFailure(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
