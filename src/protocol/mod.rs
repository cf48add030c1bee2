//! # Session Protocol
//!
//! Everything between the socket and the game logic for one connection:
//! the login handshake, the opcode cipher, the session codec, and the
//! message tables in both directions.

pub mod cipher;
pub mod dispatcher;
pub mod handshake;
pub mod messages;
pub mod outgoing;
pub mod session;

#[cfg(test)]
mod tests;

pub use cipher::{CipherPair, IsaacCipher};
pub use dispatcher::Dispatcher;
pub use handshake::{LoginPolicy, LoginRequest, LoginStatus};
pub use messages::ClientEvent;
pub use session::{Inbound, Outbound, Session, Stage};
