//! Timing constants and async timeout helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Inactivity after which a session is closed.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Time a client gets to finish the whole login handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(15);

/// Time granted to open sessions to wind down on shutdown.
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Interval between periodic metrics log lines.
pub const METRICS_INTERVAL: Duration = Duration::from_secs(60);

/// Await `future`, failing with `ProtocolError::ConnectionTimeout` after `duration`.
pub async fn with_timeout_error<F, T>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::ConnectionTimeout),
    }
}
