//! Common types and errors shared across `audit-observe` crates.

pub mod error;
pub mod event;

pub use error::{RecordError, SendError, TransportError};
pub use event::{AuditEvent, AuditRequest, EventType, FlatAttributes};
