//! # Realm Protocol
//!
//! Server core for a persistent real-time multiplayer session protocol
//! spoken by a legacy game client.
//!
//! A connection passes an admission gate, completes a two-step handshake
//! (connect request, then an RSA-wrapped login block that seeds a pair of
//! ISAAC keystreams) and then exchanges opcode-framed messages whose opcodes
//! are masked with the keystream. Every tick the server sends each player a
//! bit-packed delta of the players and NPCs it can see.
//!
//! ## Modules
//! - [`core`]: byte and bit buffers, frame builder and reader, text encodings
//! - [`protocol`]: cipher, handshake, session codec, message tables
//! - [`service`]: login checks, population, profiles, world hooks
//! - [`transport`]: admission gate, accept loop, connection tasks
//! - [`update`]: entity delta update encoding
//! - [`config`]: TOML configuration with environment overrides
//! - [`utils`]: logging, metrics and timeouts
//!
//! ## Quick Start
//! ```no_run
//! use realm_protocol::config::RealmConfig;
//! use realm_protocol::transport::Server;
//!
//! # async fn run() -> realm_protocol::error::Result<()> {
//! let config = RealmConfig::default();
//! let server = Server::bind(config).await?;
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
//! server.run(shutdown_rx).await
//! # }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod update;
pub mod utils;

pub use config::RealmConfig;
pub use error::{ProtocolError, Result};
