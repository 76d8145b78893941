//! Audit event types produced by the decoder and consumed by every sender.
//!
//! Two views of the same record travel together through the pipeline: the
//! typed [`AuditEvent`] (only the fields correlation needs) and the looser
//! [`FlatAttributes`] map that keeps every field for export.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Flat mapping from dotted key path to scalar JSON value.
///
/// Example: `{"request":{"id":"abc"}}` becomes `request.id = "abc"`.
pub type FlatAttributes = serde_json::Map<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// Event type
// ---------------------------------------------------------------------------

/// Which half of an exchange a record describes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    /// The record opened an exchange.
    Request,
    /// The record closed an exchange.
    Response,
    /// Absent, null, or any type string the pipeline does not handle.
    #[default]
    #[serde(other)]
    Unknown,
}

impl EventType {
    /// Lowercase wire name, also used as span / event name by senders.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Request => "request",
            EventType::Response => "response",
            EventType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Typed record
// ---------------------------------------------------------------------------

/// The `request` block of an audit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditRequest {
    /// Opaque exchange identifier, usually a UUID.
    #[serde(deserialize_with = "null_as_default")]
    pub id: String,
    /// Operation name (e.g. `"read"`, `"update"`).
    #[serde(deserialize_with = "null_as_default")]
    pub operation: String,
    /// Path the operation targeted.
    #[serde(deserialize_with = "null_as_default")]
    pub path: String,
}

/// One decoded audit record.
///
/// Fields absent from the record keep their zero value. `start_time` never
/// comes from the wire: it is filled in by correlation on response events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditEvent {
    /// Request or response.
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub event_type: EventType,

    /// Event timestamp; `None` when missing or not RFC 3339.
    #[serde(deserialize_with = "lenient_timestamp")]
    pub time: Option<DateTime<Utc>>,

    /// Error reported by the audited system, empty if none.
    #[serde(deserialize_with = "null_as_default")]
    pub error: String,

    /// Identity of the exchange.
    #[serde(deserialize_with = "null_as_default")]
    pub request: AuditRequest,

    /// Timestamp of the matching request event, set after correlation.
    #[serde(skip)]
    pub start_time: Option<DateTime<Utc>>,
}

impl AuditEvent {
    /// Elapsed time between the correlated request and this event.
    ///
    /// Returns `None` unless both timestamps are known and the end does not
    /// precede the start.
    pub fn duration(&self) -> Option<Duration> {
        let start = self.start_time?;
        let end = self.time?;
        (end - start).to_std().ok()
    }

    /// Returns `true` if the audited system reported an error.
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// Deserialize `T`, mapping JSON `null` to `T::default()`.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Deserialize an optional RFC 3339 timestamp.
///
/// A non-string value is a type error; a string that does not parse is `None`.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }))
}
