//! Connection reactor.
//!
//! One accept loop feeds every connection through the admission gate and
//! spawns a task per admitted socket. Listener failures that are not tied to
//! a single connection get exactly one rebind; a second consecutive failure
//! is returned as `ProtocolError::ReactorFailure` after every session has
//! been told to shut down.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{LoginConfig, RealmConfig};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::LoginPolicy;
use crate::service::{
    Authenticator, BanList, LoggingWorld, MemoryBanList, MemoryProfileStore, Population,
    ProfileStore, World,
};
use crate::utils::timeout::METRICS_INTERVAL;
use crate::utils::Metrics;

use super::admission::AdmissionGate;
use super::connection;

/// Pause between checks while waiting for sessions to drain.
const DRAIN_POLL: Duration = Duration::from_millis(100);

/// External collaborators the reactor hands to every session.
#[derive(Clone)]
pub struct Collaborators {
    pub profiles: Arc<dyn ProfileStore>,
    pub bans: Arc<dyn BanList>,
    pub world: Arc<dyn World>,
}

impl Collaborators {
    /// In-memory profiles, the configured ban list and a logging world.
    pub fn from_config(login: &LoginConfig) -> Self {
        Self {
            profiles: Arc::new(MemoryProfileStore::new()),
            bans: Arc::new(MemoryBanList::new(login.banned_addresses())),
            world: Arc::new(LoggingWorld),
        }
    }
}

/// State shared by the accept loop and every connection task.
pub(crate) struct ServerContext {
    pub config: RealmConfig,
    pub policy: Arc<LoginPolicy>,
    pub admission: Arc<AdmissionGate>,
    pub dispatcher: &'static Dispatcher,
    pub authenticator: Arc<Authenticator>,
    pub world: Arc<dyn World>,
    pub metrics: Arc<Metrics>,
    /// Bounds concurrent blocking work such as profile lookups
    pub workers: Arc<Semaphore>,
    pub shutdown: CancellationToken,
}

pub struct Server {
    listener: TcpListener,
    address: SocketAddr,
    context: Arc<ServerContext>,
}

impl Server {
    /// Bind with in-memory collaborators built from `config`.
    pub async fn bind(config: RealmConfig) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config.login);
        Self::bind_with(config, collaborators).await
    }

    #[instrument(skip_all, fields(address = %config.server.address))]
    pub async fn bind_with(config: RealmConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate_strict()?;

        let policy = Arc::new(config.login.policy()?);
        let population = Arc::new(Population::new(config.server.max_players as u16));
        let authenticator = Arc::new(Authenticator::new(
            collaborators.profiles,
            collaborators.bans,
            population,
            config.login.auto_register,
        ));

        let listener = TcpListener::bind(&config.server.address).await?;
        let address = listener.local_addr()?;
        info!(%address, rsa = policy.rsa.is_some(), "Listening");

        let context = ServerContext {
            policy,
            admission: Arc::new(AdmissionGate::new(config.admission.clone())),
            dispatcher: Dispatcher::standard()?,
            authenticator,
            world: collaborators.world,
            metrics: Arc::new(Metrics::new()),
            workers: Arc::new(Semaphore::new(config.server.worker_threads)),
            shutdown: CancellationToken::new(),
            config,
        };

        Ok(Self {
            listener,
            address,
            context: Arc::new(context),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.context.metrics)
    }

    pub fn population(&self) -> Arc<Population> {
        Arc::clone(self.context.authenticator.population())
    }

    pub fn admission(&self) -> Arc<AdmissionGate> {
        Arc::clone(&self.context.admission)
    }

    /// Accept connections until `shutdown_rx` fires or the listener fails twice.
    #[instrument(skip_all, fields(address = %self.address))]
    pub async fn run(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let Server {
            mut listener,
            address,
            context,
        } = self;
        let mut metrics_tick = interval_at(Instant::now() + METRICS_INTERVAL, METRICS_INTERVAL);
        let mut restarted = false;

        loop {
            let accepted = tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = metrics_tick.tick() => {
                    context.metrics.log_metrics();
                    continue;
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    restarted = false;
                    spawn_connection(&context, stream, peer);
                }
                Err(e) if is_connection_error(&e) => {
                    debug!(error = %e, "Accept failed for one connection");
                    context.metrics.connection_error();
                }
                Err(e) if restarted => {
                    error!(error = %e, "Listener failed after restart");
                    drain(&context).await;
                    return Err(ProtocolError::ReactorFailure(format!(
                        "{}: {e}",
                        constants::ERR_LISTENER_RESTART_FAILED
                    )));
                }
                Err(e) => {
                    warn!(error = %e, "Listener failed; rebinding once");
                    context.metrics.listener_restart();
                    restarted = true;
                    drop(listener);
                    listener = match TcpListener::bind(address).await {
                        Ok(listener) => listener,
                        Err(e) => {
                            error!(error = %e, "Listener rebind failed");
                            drain(&context).await;
                            return Err(ProtocolError::ReactorFailure(format!(
                                "{}: {e}",
                                constants::ERR_LISTENER_RESTART_FAILED
                            )));
                        }
                    };
                }
            }
        }

        info!("Shutting down server. Waiting for connections to close...");
        drain(&context).await;
        context.metrics.log_metrics();
        Ok(())
    }
}

/// Errors that concern a single half-open connection, not the listener.
fn is_connection_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
    )
}

fn spawn_connection(context: &Arc<ServerContext>, stream: TcpStream, peer: SocketAddr) {
    let Some(permit) = context.admission.admit(peer.ip()) else {
        context.metrics.admission_rejected();
        debug!(%peer, "Connection refused by admission gate");
        return;
    };
    context.metrics.connection_established();
    if let Err(e) = stream.set_nodelay(true) {
        debug!(%peer, error = %e, "Failed to set TCP_NODELAY");
    }

    let context = Arc::clone(context);
    tokio::spawn(async move {
        match connection::serve(stream, peer, &context).await {
            Ok(()) => debug!(%peer, "Connection closed"),
            Err(e @ (ProtocolError::Io(_)
            | ProtocolError::ConnectionClosed
            | ProtocolError::ConnectionTimeout)) => {
                debug!(%peer, error = %e, "Connection dropped");
                context.metrics.connection_error();
            }
            Err(e) => {
                warn!(%peer, error = %e, "Protocol violation");
                context.metrics.protocol_error();
            }
        }
        context.metrics.connection_closed();
        drop(permit);
    });
}

/// Cancel every session and wait for them to finish, up to the shutdown timeout.
async fn drain(context: &ServerContext) {
    context.shutdown.cancel();

    let timeout = tokio::time::sleep(context.config.server.shutdown_timeout);
    tokio::pin!(timeout);

    loop {
        let connections = context.metrics.connections_active.load(Ordering::Relaxed);
        if connections == 0 {
            info!("All connections closed, shutting down");
            return;
        }
        tokio::select! {
            _ = &mut timeout => {
                warn!(connections, "Shutdown timeout reached, forcing exit");
                return;
            }
            _ = tokio::time::sleep(DRAIN_POLL) => {
                debug!(connections, "Waiting for connections to close");
            }
        }
    }
}

/// Run a server until ctrl-c.
pub async fn start_server(config: RealmConfig) -> Result<()> {
    let server = Server::bind(config).await?;
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    tokio::spawn(async move {
        if let Ok(()) = tokio::signal::ctrl_c().await {
            info!("Received CTRL+C signal, shutting down");
            let _ = shutdown_tx.send(()).await;
        }
    });

    server.run(shutdown_rx).await
}
