//! Per-connection driver.
//!
//! Runs one admitted socket from the connect request to teardown. The
//! handshake is bounded by [`HANDSHAKE_TIMEOUT`]; the login verdict is
//! computed on the worker pool while the session holds further input.
//! Once active, the task multiplexes inbound frames, the actor's outbox and
//! the shutdown signal. Every frame leaves through the session encoder, so
//! outbox order is cipher draw order.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::core::frame::OutgoingFrame;
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::LoginRequest;
use crate::protocol::outgoing::{self, SetupContext};
use crate::protocol::session::{Inbound, Outbound, Session};
use crate::service::{Actor, Admitted, EventOutcome, Outbox, Profile, Verdict};
use crate::utils::metrics::Timer;
use crate::utils::timeout::{with_timeout_error, HANDSHAKE_TIMEOUT};

use super::server::ServerContext;

type Connection = Framed<TcpStream, Session>;

/// Drive `stream` until it closes.
#[instrument(skip(stream, context), fields(peer = %peer))]
pub(crate) async fn serve(stream: TcpStream, peer: SocketAddr, context: &Arc<ServerContext>) -> Result<()> {
    let mut framed = Framed::new(stream, Session::new(Arc::clone(&context.policy)));

    let admitted = tokio::select! {
        _ = context.shutdown.cancelled() => return Ok(()),
        login = with_timeout_error(handshake(&mut framed, peer.ip(), context), HANDSHAKE_TIMEOUT) => login?,
    };

    match admitted {
        Some((request, admitted)) => play(framed, peer.ip(), &request, admitted, context).await,
        None => Ok(()),
    }
}

async fn next_inbound(framed: &mut Connection) -> Result<Inbound> {
    framed.next().await.ok_or(ProtocolError::ConnectionClosed)?
}

fn unexpected(stage: &str) -> ProtocolError {
    ProtocolError::HandshakeError(format!("unexpected message while {stage}"))
}

/// Connect request, key exchange and login. `None` when the login was refused.
async fn handshake(
    framed: &mut Connection,
    host: IpAddr,
    context: &Arc<ServerContext>,
) -> Result<Option<(LoginRequest, Admitted)>> {
    match next_inbound(framed).await? {
        Inbound::Connect(request) => debug!(name_hash = request.name_hash, "Connect request"),
        _ => return Err(unexpected("connecting")),
    }
    let reply = framed.codec().key_exchange_reply();
    framed.send(reply).await?;

    let request = match next_inbound(framed).await? {
        Inbound::Login(request) => request,
        _ => return Err(unexpected("authenticating")),
    };
    context.metrics.handshake_attempt();

    let verdict = evaluate(context, host, request.clone(), framed.codec().server_key()).await?;
    let reply = framed
        .codec_mut()
        .complete_login(&request, verdict.status, verdict.rights)?;
    framed.send(reply).await?;

    match verdict.admitted {
        Some(admitted) => {
            context.metrics.handshake_success();
            info!(user = %admitted.profile.username, slot = admitted.slot.index(), "Login accepted");
            Ok(Some((request, admitted)))
        }
        None => {
            context.metrics.handshake_failed();
            info!(status = ?verdict.status, user = %request.username, "Login refused");
            framed.codec_mut().close();
            Ok(None)
        }
    }
}

/// Run the login checks on the worker pool.
async fn evaluate(
    context: &Arc<ServerContext>,
    host: IpAddr,
    request: LoginRequest,
    server_key: u64,
) -> Result<Verdict> {
    let _permit = context
        .workers
        .acquire()
        .await
        .map_err(|_| ProtocolError::ReactorFailure("worker pool closed".into()))?;
    let authenticator = Arc::clone(&context.authenticator);
    let _timer = Timer::start("login_verdict");
    tokio::task::spawn_blocking(move || authenticator.evaluate(host, &request, server_key))
        .await
        .map_err(|e| ProtocolError::Custom(format!("login worker failed: {e}")))
}

async fn send_frame(framed: &mut Connection, frame: OutgoingFrame, context: &ServerContext) -> Result<()> {
    let len = frame.len() as u64;
    framed.send(Outbound::Frame(frame)).await?;
    context.metrics.frame_sent(len);
    Ok(())
}

/// The active stage, followed by teardown.
async fn play(
    mut framed: Connection,
    host: IpAddr,
    request: &LoginRequest,
    admitted: Admitted,
    context: &Arc<ServerContext>,
) -> Result<()> {
    let Admitted { mut profile, slot } = admitted;
    let (outbox, mut outbox_rx) = Outbox::channel(context.config.server.backpressure_limit);
    let actor = Actor {
        slot: slot.index(),
        username: profile.username.clone(),
        name_hash: slot.name_hash(),
        rights: profile.rights,
        host,
        outbox,
    };
    debug!(variant = ?request.variant, low_memory = request.low_memory, "Session active");

    let outcome = match send_setup_burst(&mut framed, &actor, &profile, context).await {
        Ok(()) => {
            context.world.on_login(&actor, &profile);
            run_active(&mut framed, &actor, &mut outbox_rx, context).await
        }
        Err(e) => Err(e),
    };

    framed.codec_mut().close();
    context.world.on_logout(&actor, &mut profile);

    // Saved before the slot is released so a relogin reads the new state.
    let profiles = Arc::clone(context.authenticator.profiles());
    let saved = tokio::task::spawn_blocking(move || profiles.save(&profile)).await;
    match saved {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(user = %actor.username, error = %e, "Failed to save profile"),
        Err(e) => warn!(user = %actor.username, error = %e, "Profile save task failed"),
    }
    drop(slot);
    context.metrics.actor_departed();
    outcome
}

async fn send_setup_burst(
    framed: &mut Connection,
    actor: &Actor,
    profile: &Profile,
    context: &ServerContext,
) -> Result<()> {
    let skills: Vec<(u32, u8)> = profile
        .skills
        .iter()
        .map(|s| (s.experience, s.level))
        .collect();
    let resumed: Vec<(u16, u8)> = profile
        .timed_effects
        .iter()
        .filter(|e| e.remaining_ticks > 0)
        .map(|e| (e.config_id, e.value))
        .collect();

    let burst = outgoing::setup_burst(&SetupContext {
        slot: actor.slot,
        member: profile.member,
        region: (profile.position.region_x(), profile.position.region_y()),
        run_energy: profile.run_energy,
        inventory: &profile.inventory,
        equipment: &profile.equipment,
        skills: &skills,
        resumed_effects: &resumed,
        welcome: &context.config.login.welcome_message,
    })?;

    for frame in burst {
        let len = frame.len() as u64;
        framed.feed(Outbound::Frame(frame)).await?;
        context.metrics.frame_sent(len);
    }
    framed.flush().await?;
    Ok(())
}

async fn run_active(
    framed: &mut Connection,
    actor: &Actor,
    outbox_rx: &mut mpsc::Receiver<OutgoingFrame>,
    context: &ServerContext,
) -> Result<()> {
    let idle = context.config.server.connection_timeout;
    let idle_timer = tokio::time::sleep(idle);
    tokio::pin!(idle_timer);

    loop {
        tokio::select! {
            _ = context.shutdown.cancelled() => {
                // The socket may already be gone; shutdown proceeds regardless.
                let _ = send_frame(framed, outgoing::logout()?, context).await;
                return Ok(());
            }
            _ = &mut idle_timer => {
                debug!(slot = actor.slot, "Idle timeout");
                return Err(ProtocolError::ConnectionTimeout);
            }
            Some(frame) = outbox_rx.recv() => {
                send_frame(framed, frame, context).await?;
            }
            inbound = framed.next() => {
                let frame = match inbound {
                    None => return Ok(()),
                    Some(Err(e)) => return Err(e),
                    Some(Ok(Inbound::Frame(frame))) => frame,
                    Some(Ok(_)) => return Err(unexpected("active")),
                };
                idle_timer.as_mut().reset(Instant::now() + idle);
                context.metrics.frame_received(frame.payload.len() as u64);

                let event = match context.dispatcher.dispatch(&frame) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!(opcode = frame.opcode, error = %e, "Frame skipped");
                        context.metrics.frame_skipped();
                        continue;
                    }
                };
                if context.world.on_event(actor, event) == EventOutcome::Logout {
                    send_frame(framed, outgoing::logout()?, context).await?;
                    return Ok(());
                }
            }
        }
    }
}
