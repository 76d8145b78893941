//! Common error types shared across crates.
//!
//! Only [`TransportError`] is fatal. [`RecordError`] and [`SendError`] are
//! handled where they occur: logged, counted, and the loop moves on.

use std::io;

use thiserror::Error;

/// Failure to turn one record into a dispatched event.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The line is not valid JSON, or not a JSON object.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// The JSON is well-formed but a known field has the wrong type.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A response arrived with no pending request for its id.
    #[error("no pending request found for {request_id:?}")]
    CorrelationMiss { request_id: String },
}

impl RecordError {
    /// `true` for both decoding variants.
    pub fn is_malformed(&self) -> bool {
        matches!(self, RecordError::Malformed(_) | RecordError::SchemaMismatch(_))
    }
}

/// Failure reported by a sender.
#[derive(Debug, Error)]
pub enum SendError {
    /// A single backend rejected or failed to deliver the event.
    #[error("{backend}: {message}")]
    Backend { backend: String, message: String },

    /// The backend has already been shut down.
    #[error("{backend}: sender is shut down")]
    Closed { backend: String },

    /// More than one backend failed during the same call.
    #[error("{} backends failed:\n{}", .0.len(), join_lines(.0))]
    Aggregate(Vec<SendError>),
}

impl SendError {
    /// Convenience constructor for [`SendError::Backend`].
    pub fn backend(backend: impl Into<String>, message: impl ToString) -> Self {
        SendError::Backend {
            backend: backend.into(),
            message: message.to_string(),
        }
    }

    /// Fold a list of failures into zero, one, or an aggregate error.
    pub fn aggregate(mut errors: Vec<SendError>) -> Option<SendError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(SendError::Aggregate(errors)),
        }
    }

    /// Number of individual backend failures this error represents.
    pub fn failure_count(&self) -> usize {
        match self {
            SendError::Aggregate(errors) => errors.iter().map(SendError::failure_count).sum(),
            _ => 1,
        }
    }
}

fn join_lines(errors: &[SendError]) -> String {
    errors
        .iter()
        .map(|e| format!("  {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Fatal failure of the listening socket or the producer connection.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The Unix socket could not be created.
    #[error("failed to bind {path}: {source}")]
    Bind {
        path: String,
        #[source]
        source: io::Error,
    },

    /// Accepting the producer connection failed.
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),

    /// Reading from the producer connection failed.
    #[error("failed to read from connection: {0}")]
    Read(#[source] io::Error),

    /// The producer closed the connection.
    #[error("connection closed by producer")]
    ConnectionClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_grouping() {
        assert!(RecordError::Malformed("x".into()).is_malformed());
        assert!(RecordError::SchemaMismatch("x".into()).is_malformed());
        assert!(!RecordError::CorrelationMiss {
            request_id: "r2".into()
        }
        .is_malformed());
    }

    #[test]
    fn correlation_miss_names_the_request() {
        let e = RecordError::CorrelationMiss {
            request_id: "r2".into(),
        };
        assert!(e.to_string().contains("r2"));
    }

    #[test]
    fn aggregate_of_nothing_is_none() {
        assert!(SendError::aggregate(Vec::new()).is_none());
    }

    #[test]
    fn aggregate_of_one_is_that_error() {
        let e = SendError::aggregate(vec![SendError::backend("b", "x")]).unwrap();
        assert!(matches!(e, SendError::Backend { .. }));
        assert_eq!(e.to_string(), "b: x");
    }

    #[test]
    fn aggregate_of_many_lists_every_failure() {
        let e = SendError::aggregate(vec![
            SendError::backend("honeycomb", "401 unauthorized"),
            SendError::Closed {
                backend: "otel".into(),
            },
        ])
        .unwrap();
        assert_eq!(e.failure_count(), 2);
        let msg = e.to_string();
        assert!(msg.starts_with("2 backends failed"));
        assert!(msg.contains("honeycomb: 401 unauthorized"));
        assert!(msg.contains("otel: sender is shut down"));
    }
}
