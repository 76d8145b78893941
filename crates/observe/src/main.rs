//! `audit-observe`: audit-log correlation and telemetry fan-out.
//!
//! Startup sequence:
//! 1. Parse the CLI, then load and validate [`Config`] from environment variables.
//! 2. Initialise structured JSON logging.
//! 3. Build the composite sender for the selected backends.
//! 4. Create the correlation cache and start its eviction task.
//! 5. Install the signal handler.
//! 6. Bind the socket, accept the producer and run the pipeline.
//! 7. Flush every backend exactly once, then exit.

mod cli;
mod config;
mod correlate;
mod decode;
mod lifecycle;
mod listener;
mod pipeline;
mod sender;
mod telemetry;
mod trace_id;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use common::TransportError;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cli::Cli;
use config::Config;
use correlate::CorrelationCache;
use pipeline::Pipeline;
use sender::Sender;

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let cli = Cli::parse();
    let cfg = Config::from_env(&cli.backends).map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(&cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        socket_path = %cli.socket_path.display(),
        "audit-observe starting"
    );

    // -----------------------------------------------------------------------
    // 3. Senders
    // -----------------------------------------------------------------------
    let dispatcher: Arc<dyn Sender> = Arc::new(sender::build(&cli.backends, &cfg)?);

    // -----------------------------------------------------------------------
    // 4. Correlation cache
    // -----------------------------------------------------------------------
    let cancel = CancellationToken::new();
    let cache = CorrelationCache::new(cfg.correlation_ttl());
    info!(
        ttl = ?cache.ttl(),
        miss_policy = ?cfg.correlation_miss_policy,
        "correlation cache ready"
    );
    let eviction = correlate::eviction_task(
        cache.clone(),
        cfg.correlation_sweep_interval(),
        cancel.clone(),
    );

    // -----------------------------------------------------------------------
    // 5. Signals
    // -----------------------------------------------------------------------
    let _signals = lifecycle::signal_task(cancel.clone());

    // -----------------------------------------------------------------------
    // 6. Listener + pipeline
    // -----------------------------------------------------------------------
    let listener = listener::bind(&cli.socket_path)?;
    let pipeline = Arc::new(Pipeline::new(
        cache.clone(),
        Arc::clone(&dispatcher),
        cfg.correlation_miss_policy,
    ));
    let stats = pipeline.stats();

    let mut serve = tokio::spawn(async move {
        let stream = listener::accept_one(&listener).await?;
        Err::<(), TransportError>(pipeline.run(BufReader::new(stream)).await)
    });

    let fault: Option<anyhow::Error> = tokio::select! {
        res = &mut serve => match res {
            Ok(Err(e)) => Some(e.into()),
            Ok(Ok(())) => None,
            Err(e) => Some(anyhow::Error::new(e).context("pipeline task failed")),
        },
        _ = cancel.cancelled() => None,
    };

    // -----------------------------------------------------------------------
    // 7. Shutdown
    // -----------------------------------------------------------------------
    cancel.cancel();
    // A send may still be in flight here; backends tolerate a concurrent shutdown.
    let flushed = dispatcher.shutdown().await;
    serve.abort();
    let _ = eviction.await;
    stats.log_summary();
    if !cache.is_empty() {
        info!(pending = cache.len(), "discarding requests still awaiting a response");
    }

    if let Err(e) = std::fs::remove_file(&cli.socket_path) {
        tracing::debug!(error = %e, "could not remove socket file");
    }

    if let Err(e) = &flushed {
        error!(error = %e, "failed to flush senders");
    }
    if let Some(fault) = fault {
        error!(error = %fault, "transport fault, exiting");
        return Err(fault);
    }
    flushed?;

    info!("audit-observe stopped");
    Ok(())
}
