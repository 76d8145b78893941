//! Termination signal handling.
//!
//! The signal task never shuts anything down itself. It cancels the shared
//! token and leaves flushing to `main`, which exits only after the
//! dispatcher's `shutdown` has returned.

use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawn a task that cancels `cancel` on the first SIGINT or SIGTERM.
///
/// If the SIGTERM handler cannot be installed the task still honours SIGINT.
pub fn signal_task(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                None
            }
        };

        let received = tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => "SIGINT",
                Err(e) => {
                    error!(error = %e, "failed to install SIGINT handler");
                    return;
                }
            },
            Some(()) = recv_term(sigterm.as_mut()) => "SIGTERM",
            _ = cancel.cancelled() => return,
        };

        info!(signal = received, "shutdown signal received");
        cancel.cancel();
    })
}

/// Next SIGTERM, or pending forever when no handler is installed.
async fn recv_term(sigterm: Option<&mut Signal>) -> Option<()> {
    match sigterm {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn exits_when_token_cancelled_elsewhere() {
        let cancel = CancellationToken::new();
        let task = signal_task(cancel.clone());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn missing_sigterm_handler_never_resolves() {
        let waited = tokio::time::timeout(Duration::from_millis(50), recv_term(None)).await;
        assert!(waited.is_err());
    }
}
