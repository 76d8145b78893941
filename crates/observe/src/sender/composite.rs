//! Fan-out over an ordered list of senders.

use async_trait::async_trait;
use common::{AuditEvent, FlatAttributes, SendError};
use tracing::debug;

use super::Sender;

/// Sender that forwards every call to each of its children in order.
///
/// A failing child never stops the call from reaching the next one. Failures
/// are collected and folded with [`SendError::aggregate`]. There is no
/// batching, queueing, or retrying at this layer.
pub struct CompositeSender {
    senders: Vec<Box<dyn Sender>>,
}

impl CompositeSender {
    /// Wrap `senders`; calls reach them in this order.
    pub fn new(senders: Vec<Box<dyn Sender>>) -> Self {
        Self { senders }
    }

    /// Number of child senders.
    pub fn len(&self) -> usize {
        self.senders.len()
    }

    /// Return `true` if there are no child senders.
    pub fn is_empty(&self) -> bool {
        self.senders.is_empty()
    }
}

#[async_trait]
impl Sender for CompositeSender {
    fn name(&self) -> &'static str {
        "composite"
    }

    async fn send(&self, event: &AuditEvent, attributes: &FlatAttributes) -> Result<(), SendError> {
        let mut errors = Vec::new();
        for sender in &self.senders {
            if let Err(e) = sender.send(event, attributes).await {
                debug!(backend = sender.name(), error = %e, "send failed");
                errors.push(e);
            }
        }
        SendError::aggregate(errors).map_or(Ok(()), Err)
    }

    async fn shutdown(&self) -> Result<(), SendError> {
        let mut errors = Vec::new();
        for sender in &self.senders {
            if let Err(e) = sender.shutdown().await {
                errors.push(e);
            }
        }
        SendError::aggregate(errors).map_or(Ok(()), Err)
    }
}
