//! # Transport Layer
//!
//! Sockets, admission and the per-connection tasks.
//!
//! ## Components
//! - **Admission**: per-host connection ceiling and accept-rate window
//! - **Server**: the accept loop, listener restart, metrics tick and graceful drain
//! - **Connection**: one task per socket driving handshake, active stage and teardown
//!
//! ## Lifecycle
//! ```text
//! accept -> admit -> connect request -> key exchange -> login -> active -> teardown
//! ```
//! A host over its limits is closed before a single byte is read.

pub mod admission;
mod connection;
pub mod server;

pub use admission::{AdmissionGate, AdmissionPermit};
pub use server::{start_server, Collaborators, Server};
