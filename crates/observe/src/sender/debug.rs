//! Human-readable event dump, mainly for local troubleshooting.

use std::io::{self, Stdout, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use common::{AuditEvent, FlatAttributes, SendError};
use serde_json::Value;

use super::Sender;

const NAME: &str = "debug";

/// Writes each event as an indented block:
///
/// ```text
/// response:
///   request.id: 6ba7b810-9dad-11d1-80b4-00c04fd430c8
///   type: response
/// ```
pub struct DebugSender<W = Stdout> {
    out: Mutex<W>,
    closed: AtomicBool,
}

impl DebugSender<Stdout> {
    /// Debug sender writing to the process's stdout.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write + Send> DebugSender<W> {
    /// Debug sender writing to `out`.
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            closed: AtomicBool::new(false),
        }
    }

    fn write_event(&self, event: &AuditEvent, attributes: &FlatAttributes) -> io::Result<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| io::Error::other("debug writer lock poisoned"))?;
        writeln!(out, "{}:", event.event_type)?;
        if let Some(duration) = event.duration() {
            writeln!(out, "  duration_ms: {}", duration.as_secs_f64() * 1000.0)?;
        }
        for (key, value) in attributes {
            match value {
                Value::String(s) => writeln!(out, "  {key}: {s}")?,
                other => writeln!(out, "  {key}: {other}")?,
            }
        }
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl<W: Write + Send> Sender for DebugSender<W> {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn send(&self, event: &AuditEvent, attributes: &FlatAttributes) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed {
                backend: NAME.into(),
            });
        }
        self.write_event(event, attributes)
            .map_err(|e| SendError::backend(NAME, e))
    }

    async fn shutdown(&self) -> Result<(), SendError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut out = self
            .out
            .lock()
            .map_err(|_| SendError::backend(NAME, "debug writer lock poisoned"))?;
        out.flush().map_err(|e| SendError::backend(NAME, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::decode;
    use chrono::{DateTime, Utc};

    #[tokio::test]
    async fn writes_type_header_and_sorted_attributes() {
        let rec = decode(
            br#"{"type":"response","error":"","request":{"id":"r1","path":"secret/a"},"response":{"ttl":60}}"#,
        )
        .unwrap();
        let sender = DebugSender::new(Vec::new());
        sender.send(&rec.event, &rec.attributes).await.unwrap();

        let text = String::from_utf8(sender.into_inner()).unwrap();
        assert_eq!(
            text,
            "response:\n  error: \n  request.id: r1\n  request.path: secret/a\n  response.ttl: 60\n  type: response\n"
        );
    }

    #[tokio::test]
    async fn includes_duration_when_known() {
        let ts = |s: &str| DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc);
        let event = AuditEvent {
            event_type: common::EventType::Response,
            time: Some(ts("2024-05-01T10:00:00.250Z")),
            start_time: Some(ts("2024-05-01T10:00:00Z")),
            ..Default::default()
        };
        let sender = DebugSender::new(Vec::new());
        sender.send(&event, &FlatAttributes::new()).await.unwrap();
        sender.shutdown().await.unwrap();

        let text = String::from_utf8(sender.into_inner()).unwrap();
        assert_eq!(text, "response:\n  duration_ms: 250\n");
    }

    #[tokio::test]
    async fn send_after_shutdown_is_closed() {
        let rec = decode(br#"{"type":"response","request":{"id":"r1"}}"#).unwrap();
        let sender = DebugSender::new(Vec::new());
        sender.shutdown().await.unwrap();
        sender.shutdown().await.unwrap();

        let result = sender.send(&rec.event, &rec.attributes).await;
        assert!(matches!(result, Err(SendError::Closed { .. })));
        assert!(sender.into_inner().is_empty());
    }
}
