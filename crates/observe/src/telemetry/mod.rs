//! Process diagnostics: structured JSON logs on stderr.
//!
//! Stdout belongs to the debug sender, so nothing here writes to it.
//!
//! # Logging invariants
//!
//! - Attribute values from audit records are never logged above `debug`.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   takes precedence when set.

pub mod init;

pub use init::init_telemetry;
