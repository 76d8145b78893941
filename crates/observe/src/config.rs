//! Configuration loading and validation for the observer.
//!
//! Backend selection and the socket path come from the command line (see
//! [`crate::cli`]). Everything else is read from environment variables at
//! startup; the process exits with a clear error message if a value is
//! missing or invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::cli::Backends;
use crate::sender::honeycomb::HoneycombConfig;
use crate::sender::otel::OtelConfig;
use crate::trace_id::SpanPolicy;

/// What to do with a response whose request was never seen or has expired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissPolicy {
    /// Log and discard the response.
    #[default]
    Drop,
    /// Dispatch the response without a start time.
    Forward,
}

/// Validated observer configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Honeycomb write key. **Required** when `--honeycomb` is set.
    #[serde(default)]
    pub honeycomb_api_key: String,

    /// Honeycomb dataset events are written to.
    #[serde(default = "default_honeycomb_dataset")]
    pub honeycomb_dataset: String,

    /// Base URL of the Honeycomb events API.
    #[serde(default = "default_honeycomb_api_url")]
    pub honeycomb_api_url: String,

    /// How Honeycomb represents a correlated exchange.
    #[serde(default = "default_honeycomb_span_policy")]
    pub honeycomb_span_policy: SpanPolicy,

    /// OTLP/gRPC collector endpoint.
    #[serde(default = "default_otlp_endpoint")]
    pub otel_exporter_otlp_endpoint: String,

    /// How the OpenTelemetry backend represents a correlated exchange.
    #[serde(default)]
    pub otel_span_policy: SpanPolicy,

    /// Service name reported to every backend.
    #[serde(default = "default_service_name")]
    pub service_name: String,

    /// How long (seconds) a request waits for its response.
    #[serde(default = "default_correlation_ttl")]
    pub correlation_ttl_secs: u64,

    /// How often (seconds) expired requests are swept from the cache.
    #[serde(default = "default_correlation_sweep_interval")]
    pub correlation_sweep_interval_secs: u64,

    /// Handling of responses without a pending request.
    #[serde(default)]
    pub correlation_miss_policy: MissPolicy,

    /// Per-request timeout (seconds) for HTTP backends.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_honeycomb_dataset() -> String {
    "vault-observe".into()
}
fn default_honeycomb_api_url() -> String {
    "https://api.honeycomb.io".into()
}
fn default_honeycomb_span_policy() -> SpanPolicy {
    SpanPolicy::Linked
}
fn default_otlp_endpoint() -> String {
    "http://localhost:4317".into()
}
fn default_service_name() -> String {
    "vault-observe".into()
}
fn default_correlation_ttl() -> u64 {
    10
}
fn default_correlation_sweep_interval() -> u64 {
    60
}
fn default_send_timeout() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            honeycomb_api_key: String::new(),
            honeycomb_dataset: default_honeycomb_dataset(),
            honeycomb_api_url: default_honeycomb_api_url(),
            honeycomb_span_policy: default_honeycomb_span_policy(),
            otel_exporter_otlp_endpoint: default_otlp_endpoint(),
            otel_span_policy: SpanPolicy::default(),
            service_name: default_service_name(),
            correlation_ttl_secs: default_correlation_ttl(),
            correlation_sweep_interval_secs: default_correlation_sweep_interval(),
            correlation_miss_policy: MissPolicy::default(),
            send_timeout_secs: default_send_timeout(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables and validate it against
    /// the selected backends.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or a required value is
    /// absent.
    pub fn from_env(backends: &Backends) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate(backends)?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self, backends: &Backends) -> Result<()> {
        if !backends.any() {
            anyhow::bail!("no senders specified: enable at least one of --honeycomb, --otel, --debug");
        }
        if backends.honeycomb {
            ensure_non_empty(&self.honeycomb_api_key, "HONEYCOMB_API_KEY")?;
            ensure_non_empty(&self.honeycomb_dataset, "HONEYCOMB_DATASET")?;
            ensure_non_empty(&self.honeycomb_api_url, "HONEYCOMB_API_URL")?;
        }
        if backends.otel {
            ensure_non_empty(&self.otel_exporter_otlp_endpoint, "OTEL_EXPORTER_OTLP_ENDPOINT")?;
        }
        ensure_non_empty(&self.service_name, "SERVICE_NAME")?;

        if self.correlation_ttl_secs == 0 {
            anyhow::bail!("CORRELATION_TTL_SECS must be > 0");
        }
        if self.correlation_sweep_interval_secs == 0 {
            anyhow::bail!("CORRELATION_SWEEP_INTERVAL_SECS must be > 0");
        }
        if self.send_timeout_secs == 0 {
            anyhow::bail!("SEND_TIMEOUT_SECS must be > 0");
        }
        Ok(())
    }

    /// Correlation cache entry lifetime.
    pub fn correlation_ttl(&self) -> Duration {
        Duration::from_secs(self.correlation_ttl_secs)
    }

    /// Interval between correlation cache sweeps.
    pub fn correlation_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.correlation_sweep_interval_secs)
    }

    /// Settings for the Honeycomb sender.
    pub fn honeycomb(&self) -> HoneycombConfig {
        HoneycombConfig {
            api_url: self.honeycomb_api_url.clone(),
            dataset: self.honeycomb_dataset.clone(),
            api_key: self.honeycomb_api_key.clone(),
            service_name: self.service_name.clone(),
            span_policy: self.honeycomb_span_policy,
            timeout: Duration::from_secs(self.send_timeout_secs),
        }
    }

    /// Settings for the OpenTelemetry sender.
    pub fn otel(&self) -> OtelConfig {
        OtelConfig {
            endpoint: self.otel_exporter_otlp_endpoint.clone(),
            service_name: self.service_name.clone(),
            span_policy: self.otel_span_policy,
        }
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debug_only() -> Backends {
        Backends {
            debug: true,
            ..Default::default()
        }
    }

    #[test]
    fn defaults_are_correct() {
        let cfg = Config::default();
        assert_eq!(cfg.honeycomb_dataset, "vault-observe");
        assert_eq!(cfg.honeycomb_api_url, "https://api.honeycomb.io");
        assert_eq!(cfg.honeycomb_span_policy, SpanPolicy::Linked);
        assert_eq!(cfg.otel_exporter_otlp_endpoint, "http://localhost:4317");
        assert_eq!(cfg.otel_span_policy, SpanPolicy::Single);
        assert_eq!(cfg.service_name, "vault-observe");
        assert_eq!(cfg.correlation_ttl(), Duration::from_secs(10));
        assert_eq!(cfg.correlation_sweep_interval(), Duration::from_secs(60));
        assert_eq!(cfg.correlation_miss_policy, MissPolicy::Drop);
        assert_eq!(cfg.send_timeout_secs, 10);
        assert_eq!(cfg.log_level, "info");
    }

    #[test]
    fn validate_accepts_debug_only_defaults() {
        assert!(Config::default().validate(&debug_only()).is_ok());
    }

    #[test]
    fn validate_rejects_no_backends() {
        let err = Config::default()
            .validate(&Backends::default())
            .unwrap_err();
        assert!(err.to_string().contains("no senders specified"));
    }

    #[test]
    fn validate_requires_honeycomb_key() {
        let backends = Backends {
            honeycomb: true,
            ..Default::default()
        };
        let err = Config::default().validate(&backends).unwrap_err();
        assert!(err.to_string().contains("HONEYCOMB_API_KEY"));

        let cfg = Config {
            honeycomb_api_key: "key".into(),
            ..Default::default()
        };
        assert!(cfg.validate(&backends).is_ok());
    }

    #[test]
    fn validate_rejects_zero_ttl() {
        let cfg = Config {
            correlation_ttl_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate(&debug_only()).is_err());
    }

    #[test]
    fn validate_rejects_zero_sweep_interval() {
        let cfg = Config {
            correlation_sweep_interval_secs: 0,
            ..Default::default()
        };
        assert!(cfg.validate(&debug_only()).is_err());
    }

    #[test]
    fn honeycomb_settings_carry_timeout_and_policy() {
        let cfg = Config {
            honeycomb_api_key: "key".into(),
            send_timeout_secs: 3,
            ..Default::default()
        };
        let hc = cfg.honeycomb();
        assert_eq!(hc.timeout, Duration::from_secs(3));
        assert_eq!(hc.span_policy, SpanPolicy::Linked);
        assert_eq!(hc.api_key, "key");
    }

    #[test]
    fn miss_policy_deserializes_lowercase() {
        let p: MissPolicy = serde_json::from_str(r#""forward""#).unwrap();
        assert_eq!(p, MissPolicy::Forward);
    }
}
