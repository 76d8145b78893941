//! Honeycomb backend: events posted to the batch API as trace-shaped rows.
//!
//! Honeycomb assembles traces from ordinary events carrying `trace.trace_id`,
//! `trace.span_id` and `trace.parent_id` fields, so each span here is a single
//! JSON object in a `POST /1/batch/{dataset}` request.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use common::{AuditEvent, EventType, FlatAttributes, SendError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::Sender;
use crate::trace_id::{SpanPolicy, TraceIdentity};

const NAME: &str = "honeycomb";

/// Settings for [`HoneycombSender`].
#[derive(Debug, Clone)]
pub struct HoneycombConfig {
    /// API base URL, e.g. `https://api.honeycomb.io`.
    pub api_url: String,
    /// Dataset the events are written to.
    pub dataset: String,
    /// Write key sent in `X-Honeycomb-Team`.
    pub api_key: String,
    /// Value of the `service_name` field.
    pub service_name: String,
    /// One event per response, or opening + closing events.
    pub span_policy: SpanPolicy,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
}

/// One element of a batch request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
struct BatchEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    data: FlatAttributes,
}

/// Per-event result returned by the batch endpoint.
#[derive(Debug, Deserialize)]
struct BatchStatus {
    status: u16,
    #[serde(default)]
    error: Option<String>,
}

/// Sender that owns its own HTTP client and write key.
pub struct HoneycombSender {
    client: reqwest::Client,
    batch_url: String,
    api_key: String,
    service_name: String,
    policy: SpanPolicy,
    closed: AtomicBool,
}

impl HoneycombSender {
    /// Build the sender and its HTTP client.
    ///
    /// # Errors
    ///
    /// Returns an error if the write key is empty or the client cannot be built.
    pub fn new(cfg: HoneycombConfig) -> Result<Self> {
        if cfg.api_key.trim().is_empty() {
            anyhow::bail!("HONEYCOMB_API_KEY is required when the Honeycomb sender is enabled");
        }
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .user_agent(concat!("audit-observe/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build Honeycomb HTTP client")?;

        Ok(Self {
            client,
            batch_url: format!(
                "{}/1/batch/{}",
                cfg.api_url.trim_end_matches('/'),
                cfg.dataset
            ),
            api_key: cfg.api_key,
            service_name: cfg.service_name,
            policy: cfg.span_policy,
            closed: AtomicBool::new(false),
        })
    }

    /// Map one audit event to the Honeycomb rows it produces.
    fn batch_for(&self, event: &AuditEvent, attributes: &FlatAttributes) -> Vec<BatchEvent> {
        let request_id = event.request.id.as_str();
        let duration_ms = event.duration().map(|d| d.as_secs_f64() * 1000.0);

        if event.event_type != EventType::Response {
            let row = self.row(event, TraceIdentity::opening(request_id), None, attributes.clone());
            return vec![BatchEvent {
                time: event.time.map(|t| t.to_rfc3339()),
                data: row,
            }];
        }

        let closing = TraceIdentity::closing(request_id, self.policy);
        let mut rows = Vec::with_capacity(2);

        if self.policy == SpanPolicy::Linked {
            let mut request_fields = FlatAttributes::new();
            request_fields.insert("request.id".into(), Value::from(event.request.id.clone()));
            request_fields.insert(
                "request.operation".into(),
                Value::from(event.request.operation.clone()),
            );
            request_fields.insert("request.path".into(), Value::from(event.request.path.clone()));

            let mut opening = self.row(
                event,
                TraceIdentity::opening(request_id),
                duration_ms,
                request_fields,
            );
            opening.insert("name".into(), Value::from(EventType::Request.as_str()));
            rows.push(BatchEvent {
                time: event.start_time.or(event.time).map(|t| t.to_rfc3339()),
                data: opening,
            });
        }

        rows.push(BatchEvent {
            time: event.time.map(|t| t.to_rfc3339()),
            data: self.row(event, closing, duration_ms, attributes.clone()),
        });
        rows
    }

    fn row(
        &self,
        event: &AuditEvent,
        identity: TraceIdentity,
        duration_ms: Option<f64>,
        mut data: FlatAttributes,
    ) -> FlatAttributes {
        data.insert("trace.trace_id".into(), Value::from(identity.trace_id_hex()));
        data.insert("trace.span_id".into(), Value::from(identity.span_id_hex()));
        if let Some(parent) = identity.parent_span_id_hex() {
            data.insert("trace.parent_id".into(), Value::from(parent));
        }
        data.insert("service_name".into(), Value::from(self.service_name.clone()));
        data.insert("name".into(), Value::from(event.event_type.as_str()));
        if let Some(ms) = duration_ms {
            data.insert("duration_ms".into(), Value::from(ms));
        }
        data
    }
}

#[async_trait]
impl Sender for HoneycombSender {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn send(&self, event: &AuditEvent, attributes: &FlatAttributes) -> Result<(), SendError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SendError::Closed {
                backend: NAME.into(),
            });
        }

        let batch = self.batch_for(event, attributes);
        let resp = self
            .client
            .post(&self.batch_url)
            .header("X-Honeycomb-Team", &self.api_key)
            .json(&batch)
            .send()
            .await
            .map_err(|e| SendError::backend(NAME, e))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(SendError::backend(
                NAME,
                format!("batch request rejected with {status}: {}", body.trim()),
            ));
        }

        let statuses: Vec<BatchStatus> = resp
            .json()
            .await
            .map_err(|e| SendError::backend(NAME, format!("unreadable batch response: {e}")))?;
        let rejected: Vec<String> = statuses
            .iter()
            .filter(|s| !(200..300).contains(&s.status))
            .map(|s| match &s.error {
                Some(err) => format!("{} {err}", s.status),
                None => s.status.to_string(),
            })
            .collect();
        if !rejected.is_empty() {
            return Err(SendError::backend(
                NAME,
                format!("events rejected: {}", rejected.join(", ")),
            ));
        }

        debug!(request_id = %event.request.id, rows = batch.len(), "sent to Honeycomb");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SendError> {
        // Rows are posted synchronously per event; there is no buffer to flush.
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
