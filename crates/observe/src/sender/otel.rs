//! OpenTelemetry backend: correlated exchanges exported as spans over OTLP/gRPC.
//!
//! The sender owns its [`TracerProvider`]; no global provider is installed.
//! Trace ids come from [`crate::trace_id`] so both halves of an exchange share
//! one trace regardless of which process or backend produced them.

use std::time::SystemTime;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use common::{AuditEvent, EventType, FlatAttributes, SendError};
use opentelemetry::trace::{
    Span as _, SpanContext, SpanId, SpanKind, Status, TraceContextExt, TraceFlags, TraceId,
    TraceState, Tracer as _, TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, Value};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::{self as sdktrace, Sampler, TracerProvider};
use opentelemetry_sdk::{runtime, Resource};
use tokio::sync::RwLock;
use tracing::debug;

use super::Sender;
use crate::trace_id::{SpanPolicy, TraceIdentity};

const NAME: &str = "otel";
const INSTRUMENTATION_NAME: &str = "audit-observe";

/// Settings for [`OtelSender`].
#[derive(Debug, Clone)]
pub struct OtelConfig {
    /// OTLP/gRPC collector endpoint.
    pub endpoint: String,
    /// `service.name` resource attribute.
    pub service_name: String,
    /// One span per response, or opening + closing spans.
    pub span_policy: SpanPolicy,
}

/// Sender that exports spans through its own tracer provider.
pub struct OtelSender {
    provider: RwLock<Option<TracerProvider>>,
    policy: SpanPolicy,
}

impl OtelSender {
    /// Build an OTLP/gRPC exporter behind a batch span processor.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the OTLP exporter cannot be built.
    pub fn new(cfg: &OtelConfig) -> Result<Self> {
        let exporter = opentelemetry_otlp::SpanExporterBuilder::from(
            opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(&cfg.endpoint),
        )
        .build_span_exporter()
        .context("failed to build OTLP span exporter")?;

        let provider = TracerProvider::builder()
            .with_batch_exporter(exporter, runtime::Tokio)
            .with_config(
                sdktrace::Config::default()
                    .with_sampler(Sampler::AlwaysOn)
                    .with_resource(service_resource(&cfg.service_name)),
            )
            .build();

        Ok(Self::with_provider(provider, cfg.span_policy))
    }

    /// Wrap an already-configured provider.
    pub fn with_provider(provider: TracerProvider, policy: SpanPolicy) -> Self {
        Self {
            provider: RwLock::new(Some(provider)),
            policy,
        }
    }

    fn record(&self, provider: &TracerProvider, event: &AuditEvent, attributes: &FlatAttributes) {
        let tracer = provider.tracer(INSTRUMENTATION_NAME);
        let request_id = event.request.id.as_str();

        let end: SystemTime = event.time.map(SystemTime::from).unwrap_or_else(SystemTime::now);
        // Without a usable start the span collapses to a point at `end`.
        let start = match event.duration() {
            Some(_) => event.start_time.map(SystemTime::from).unwrap_or(end),
            None => end,
        };

        let attrs: Vec<KeyValue> = attributes
            .iter()
            .filter_map(|(key, value)| to_otel_value(value).map(|v| KeyValue::new(key.clone(), v)))
            .collect();

        if event.event_type != EventType::Response {
            let identity = TraceIdentity::opening(request_id);
            let builder = tracer
                .span_builder(event.event_type.as_str())
                .with_kind(SpanKind::Server)
                .with_trace_id(TraceId::from_bytes(identity.trace_id))
                .with_span_id(SpanId::from_bytes(identity.span_id))
                .with_start_time(end)
                .with_attributes(attrs);
            let mut span = tracer.build_with_context(builder, &Context::new());
            set_error_status(&mut span, event);
            span.end_with_timestamp(end);
            return;
        }

        let closing = TraceIdentity::closing(request_id, self.policy);
        let (parent_cx, closing_start) = match closing.parent_span_id {
            Some(parent_span_id) => {
                let opening = TraceIdentity::opening(request_id);
                let builder = tracer
                    .span_builder(EventType::Request.as_str())
                    .with_kind(SpanKind::Server)
                    .with_trace_id(TraceId::from_bytes(opening.trace_id))
                    .with_span_id(SpanId::from_bytes(opening.span_id))
                    .with_start_time(start)
                    .with_attributes(vec![
                        KeyValue::new("request.id", event.request.id.clone()),
                        KeyValue::new("request.operation", event.request.operation.clone()),
                        KeyValue::new("request.path", event.request.path.clone()),
                    ]);
                let mut span = tracer.build_with_context(builder, &Context::new());
                set_error_status(&mut span, event);
                span.end_with_timestamp(end);

                let parent = SpanContext::new(
                    TraceId::from_bytes(closing.trace_id),
                    SpanId::from_bytes(parent_span_id),
                    TraceFlags::SAMPLED,
                    true,
                    TraceState::default(),
                );
                (Context::new().with_remote_span_context(parent), end)
            }
            None => (Context::new(), start),
        };

        let builder = tracer
            .span_builder(EventType::Response.as_str())
            .with_kind(SpanKind::Server)
            .with_trace_id(TraceId::from_bytes(closing.trace_id))
            .with_span_id(SpanId::from_bytes(closing.span_id))
            .with_start_time(closing_start)
            .with_attributes(attrs);
        let mut span = tracer.build_with_context(builder, &parent_cx);
        set_error_status(&mut span, event);
        span.end_with_timestamp(end);
    }
}

#[async_trait]
impl Sender for OtelSender {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn send(&self, event: &AuditEvent, attributes: &FlatAttributes) -> Result<(), SendError> {
        let guard = self.provider.read().await;
        let provider = guard.as_ref().ok_or_else(|| SendError::Closed {
            backend: NAME.into(),
        })?;
        self.record(provider, event, attributes);
        debug!(request_id = %event.request.id, "recorded span");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), SendError> {
        let Some(provider) = self.provider.write().await.take() else {
            return Ok(());
        };

        // Flushing blocks on the exporter; keep it off the async workers.
        let results = tokio::task::spawn_blocking(move || {
            let results = provider.force_flush();
            drop(provider);
            results
        })
        .await
        .map_err(|e| SendError::backend(NAME, format!("flush task failed: {e}")))?;

        let errors: Vec<SendError> = results
            .into_iter()
            .filter_map(|r| r.err())
            .map(|e| SendError::backend(NAME, e))
            .collect();
        SendError::aggregate(errors).map_or(Ok(()), Err)
    }
}

fn set_error_status(span: &mut impl opentelemetry::trace::Span, event: &AuditEvent) {
    if event.is_error() {
        span.set_status(Status::error(event.error.clone()));
    }
}

/// Scalar JSON → typed span attribute value. Nulls carry no value and are skipped.
fn to_otel_value(value: &serde_json::Value) -> Option<Value> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::Bool(b) => Some(Value::from(*b)),
        serde_json::Value::Number(n) => Some(match n.as_i64() {
            Some(i) => Value::from(i),
            None => Value::from(n.as_f64().unwrap_or_default()),
        }),
        serde_json::Value::String(s) => Some(Value::from(s.clone())),
        other => Some(Value::from(other.to_string())),
    }
}

fn service_resource(service_name: &str) -> Resource {
    Resource::new(vec![
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_NAME,
            service_name.to_owned(),
        ),
        KeyValue::new(
            opentelemetry_semantic_conventions::resource::SERVICE_VERSION,
            env!("CARGO_PKG_VERSION"),
        ),
    ])
}
