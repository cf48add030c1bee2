//! The game-facing side of a session.
//!
//! Once a login succeeds the connection is represented to the game by an
//! [`Actor`]. Decoded client events go to a [`World`], which answers through
//! the actor's [`Outbox`].

use std::net::IpAddr;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use crate::core::frame::OutgoingFrame;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::messages::ClientEvent;
use crate::protocol::outgoing;

use super::profile::Profile;

/// Bounded queue of frames waiting for a session's socket.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<OutgoingFrame>,
}

impl Outbox {
    /// Outbox holding at most `limit` unsent frames, and its receiving end.
    pub fn channel(limit: usize) -> (Self, mpsc::Receiver<OutgoingFrame>) {
        let (tx, rx) = mpsc::channel(limit.max(1));
        (Self { tx }, rx)
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    /// `Custom` when the queue is full. The session is expected to drop
    /// a client that cannot keep up.
    pub fn push(&self, frame: OutgoingFrame) -> Result<()> {
        self.tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => ProtocolError::Custom(constants::ERR_OUTBOX_FULL.into()),
            TrySendError::Closed(_) => ProtocolError::Custom(constants::ERR_OUTBOX_CLOSED.into()),
        })
    }

    /// Queue a frame, waiting for room.
    pub async fn send(&self, frame: OutgoingFrame) -> Result<()> {
        self.tx
            .send(frame)
            .await
            .map_err(|_| ProtocolError::Custom(constants::ERR_OUTBOX_CLOSED.into()))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A logged-in player as seen by the game.
#[derive(Debug, Clone)]
pub struct Actor {
    /// Population slot, 1-based
    pub slot: u16,
    pub username: String,
    pub name_hash: u64,
    pub rights: u8,
    pub host: IpAddr,
    pub outbox: Outbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    Continue,
    /// Send the logout frame and close the session
    Logout,
}

/// Game logic hooks driven by the session tasks.
///
/// Implementations are called from many sessions at once and must not block.
pub trait World: Send + Sync {
    fn on_login(&self, _actor: &Actor, _profile: &Profile) {}

    fn on_event(&self, actor: &Actor, event: ClientEvent) -> EventOutcome;

    /// Last chance to update the profile before it is saved.
    fn on_logout(&self, _actor: &Actor, _profile: &mut Profile) {}
}

/// World that only logs traffic and honours logout requests.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingWorld;

impl World for LoggingWorld {
    fn on_login(&self, actor: &Actor, profile: &Profile) {
        info!(
            slot = actor.slot,
            user = %actor.username,
            host = %actor.host,
            position = ?profile.position,
            "Player entered world"
        );
    }

    fn on_event(&self, actor: &Actor, event: ClientEvent) -> EventOutcome {
        if event.requests_logout() {
            return EventOutcome::Logout;
        }
        match event {
            ClientEvent::KeepAlive | ClientEvent::MouseClicked(_) | ClientEvent::CameraMoved { .. } => {}
            ClientEvent::Command(command) => {
                debug!(slot = actor.slot, %command, "Command");
                // Best effort; a full outbox drops the reply.
                if let Ok(frame) = outgoing::game_message(&format!("Unknown command: {command}")) {
                    let _ = actor.outbox.push(frame);
                }
            }
            other => debug!(slot = actor.slot, event = ?other, "Client event"),
        }
        EventOutcome::Continue
    }

    fn on_logout(&self, actor: &Actor, _profile: &mut Profile) {
        info!(slot = actor.slot, user = %actor.username, "Player left world");
    }
}
