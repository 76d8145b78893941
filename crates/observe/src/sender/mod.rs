//! Telemetry backends.
//!
//! Every backend implements [`Sender`]. The pipeline only ever talks to a
//! single [`CompositeSender`], which fans each event out to the backends
//! selected on the command line.
//!
//! # Backend contract
//!
//! - `send` reports its own failures and never affects sibling backends.
//! - `shutdown` flushes whatever the backend buffers and releases its client.
//!   It may run concurrently with an in-flight `send` and may be called more
//!   than once; only the first call does any work. A `send` after `shutdown`
//!   returns [`SendError::Closed`].
//! - Each backend owns its transport client. Nothing is installed globally.

pub mod composite;
pub mod debug;
pub mod honeycomb;
pub mod otel;

pub use composite::CompositeSender;
pub use debug::DebugSender;
pub use honeycomb::HoneycombSender;
pub use otel::OtelSender;

use anyhow::Result;
use async_trait::async_trait;
use common::{AuditEvent, FlatAttributes, SendError};
use tracing::info;

use crate::cli::Backends;
use crate::config::Config;

/// A telemetry backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Sender: Send + Sync {
    /// Short backend name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Deliver one event together with its flattened attributes.
    async fn send(&self, event: &AuditEvent, attributes: &FlatAttributes) -> Result<(), SendError>;

    /// Flush and close the backend.
    async fn shutdown(&self) -> Result<(), SendError>;
}

/// Build the composite sender for the selected backends.
///
/// # Errors
///
/// Returns an error if no backend is selected or a backend cannot be
/// initialised from `cfg`.
pub fn build(backends: &Backends, cfg: &Config) -> Result<CompositeSender> {
    let mut senders: Vec<Box<dyn Sender>> = Vec::new();

    if backends.honeycomb {
        info!(dataset = %cfg.honeycomb_dataset, "sending events to Honeycomb");
        senders.push(Box::new(HoneycombSender::new(cfg.honeycomb())?));
    }
    if backends.otel {
        info!(endpoint = %cfg.otel_exporter_otlp_endpoint, "sending events to OpenTelemetry collector");
        senders.push(Box::new(OtelSender::new(&cfg.otel())?));
    }
    if backends.debug {
        info!("sending events to stdout");
        senders.push(Box::new(DebugSender::stdout()));
    }

    let composite = CompositeSender::new(senders);
    if composite.is_empty() {
        anyhow::bail!("no senders specified: enable at least one of --honeycomb, --otel, --debug");
    }
    info!(count = composite.len(), "senders ready");
    Ok(composite)
}
