//! Unix socket boundary the audit device connects to.
//!
//! The producer connects exactly once; reconnection is not supported.

use std::io;
use std::path::Path;

use common::TransportError;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

/// Bind a listener at `path`, replacing a stale socket file left behind by a
/// previous run.
///
/// # Errors
///
/// Returns [`TransportError::Bind`] if the stale file cannot be removed or the
/// socket cannot be bound.
pub fn bind(path: &Path) -> Result<UnixListener, TransportError> {
    let bind_err = |source: io::Error| TransportError::Bind {
        path: path.display().to_string(),
        source,
    };

    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale socket"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(bind_err(e)),
    }

    let listener = UnixListener::bind(path).map_err(bind_err)?;
    info!(path = %path.display(), "listening for audit device");
    Ok(listener)
}

/// Wait for the single producer connection.
///
/// # Errors
///
/// Returns [`TransportError::Accept`] if accepting fails.
pub async fn accept_one(listener: &UnixListener) -> Result<UnixStream, TransportError> {
    let (stream, _addr) = listener.accept().await.map_err(TransportError::Accept)?;
    info!("audit device connected");
    Ok(stream)
}
