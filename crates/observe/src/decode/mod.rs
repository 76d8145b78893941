//! Record decoding: one newline-delimited JSON line → typed event + flat attributes.
//!
//! Both views are derived from the same parsed tree. The typed view drops
//! fields it does not know; the flat view keeps everything, so nothing is lost
//! for export when the typed schema is narrower than the record.
//!
//! Decoding performs no I/O and never panics on bad input; every failure is a
//! [`RecordError`] for the caller to log.

pub mod flatten;

pub use flatten::flatten;

use common::{AuditEvent, FlatAttributes, RecordError};
use serde::Deserialize;
use serde_json::Value;

/// A successfully decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// Typed view used for correlation.
    pub event: AuditEvent,
    /// Flattened view of the whole record, exported as attributes.
    pub attributes: FlatAttributes,
}

/// Decode a single record.
///
/// A trailing `\n` (or `\r\n`) is accepted.
///
/// # Errors
///
/// Returns [`RecordError::Malformed`] if the line is not a JSON object and
/// [`RecordError::SchemaMismatch`] if a known field has the wrong type.
pub fn decode(line: &[u8]) -> Result<DecodedRecord, RecordError> {
    let tree: Value =
        serde_json::from_slice(line).map_err(|e| RecordError::Malformed(e.to_string()))?;

    let map = match &tree {
        Value::Object(map) => map,
        other => {
            return Err(RecordError::Malformed(format!(
                "expected a JSON object, found {}",
                json_kind(other)
            )))
        }
    };

    let event =
        AuditEvent::deserialize(&tree).map_err(|e| RecordError::SchemaMismatch(e.to_string()))?;
    let attributes = flatten(map);

    Ok(DecodedRecord { event, attributes })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
