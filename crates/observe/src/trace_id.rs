//! Stable trace / span identifiers derived from audit request ids.
//!
//! The trace id is a pure function of the request id, so the request and
//! response records of one exchange always land in the same trace. Opening
//! spans reuse request-derived bytes; closing spans get fresh random ids.

use rand::rngs::OsRng;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Byte length of a trace id (128 bits).
pub const TRACE_ID_LEN: usize = 16;

/// Byte length of a span id (64 bits).
pub const SPAN_ID_LEN: usize = 8;

/// How a backend maps one correlated exchange onto spans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanPolicy {
    /// One span per response carrying the total duration.
    #[default]
    Single,
    /// An opening span for the request plus a closing child span.
    Linked,
}

/// Identifiers for one span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceIdentity {
    pub trace_id: [u8; TRACE_ID_LEN],
    pub span_id: [u8; SPAN_ID_LEN],
    pub parent_span_id: Option<[u8; SPAN_ID_LEN]>,
}

impl TraceIdentity {
    /// Identity of the span that opens the exchange. Fully deterministic.
    pub fn opening(request_id: &str) -> Self {
        Self {
            trace_id: derive_trace_id(request_id),
            span_id: opening_span_id(request_id),
            parent_span_id: None,
        }
    }

    /// Identity of the span that closes the exchange.
    ///
    /// The span id is random. Under [`SpanPolicy::Linked`] the span is a child
    /// of the opening span; under [`SpanPolicy::Single`] it is a root span.
    pub fn closing(request_id: &str, policy: SpanPolicy) -> Self {
        let parent_span_id = match policy {
            SpanPolicy::Single => None,
            SpanPolicy::Linked => Some(opening_span_id(request_id)),
        };
        Self {
            trace_id: derive_trace_id(request_id),
            span_id: random_span_id(),
            parent_span_id,
        }
    }

    /// Lowercase hex trace id.
    pub fn trace_id_hex(&self) -> String {
        hex::encode(self.trace_id)
    }

    /// Lowercase hex span id.
    pub fn span_id_hex(&self) -> String {
        hex::encode(self.span_id)
    }

    /// Lowercase hex parent span id, if any.
    pub fn parent_span_id_hex(&self) -> Option<String> {
        self.parent_span_id.map(hex::encode)
    }
}

/// Derive the 128-bit trace id for `request_id`.
///
/// Request ids in canonical lowercase hyphenated UUID form map to their own
/// 16 bytes. Anything else, including other spellings of a UUID and the nil
/// UUID, maps to the leading bytes of its SHA-256 digest, so two distinct id
/// strings never share a trace.
pub fn derive_trace_id(request_id: &str) -> [u8; TRACE_ID_LEN] {
    if let Ok(uuid) = Uuid::parse_str(request_id) {
        if !uuid.is_nil() && uuid.hyphenated().to_string() == request_id {
            return *uuid.as_bytes();
        }
    }
    let mut out = [0u8; TRACE_ID_LEN];
    out.copy_from_slice(&digest(request_id)[..TRACE_ID_LEN]);
    out
}

/// Span id of the opening span: the low half of the trace id.
pub fn opening_span_id(request_id: &str) -> [u8; SPAN_ID_LEN] {
    let trace_id = derive_trace_id(request_id);
    let mut out = [0u8; SPAN_ID_LEN];
    out.copy_from_slice(&trace_id[TRACE_ID_LEN - SPAN_ID_LEN..]);
    if out == [0u8; SPAN_ID_LEN] {
        out.copy_from_slice(&digest(request_id)[TRACE_ID_LEN..TRACE_ID_LEN + SPAN_ID_LEN]);
    }
    out
}

/// Fresh span id from the OS CSPRNG. Never all-zero.
pub fn random_span_id() -> [u8; SPAN_ID_LEN] {
    let mut out = [0u8; SPAN_ID_LEN];
    while out == [0u8; SPAN_ID_LEN] {
        OsRng.fill_bytes(&mut out);
    }
    out
}

fn digest(request_id: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(request_id.as_bytes()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const UUID: &str = "6ba7b810-9dad-11d1-80b4-00c04fd430c8";

    #[test]
    fn trace_id_is_deterministic() {
        assert_eq!(derive_trace_id(UUID), derive_trace_id(UUID));
        assert_eq!(derive_trace_id("r1"), derive_trace_id("r1"));
    }

    #[test]
    fn uuid_request_ids_map_to_their_bytes() {
        assert_eq!(
            hex::encode(derive_trace_id(UUID)),
            "6ba7b8109dad11d180b400c04fd430c8"
        );
    }

    #[test]
    fn non_uuid_ids_are_hashed() {
        let id = derive_trace_id("not-a-uuid");
        assert_ne!(id, [0u8; TRACE_ID_LEN]);
        assert_eq!(&id[..], &digest("not-a-uuid")[..TRACE_ID_LEN]);
    }

    #[test]
    fn other_uuid_spellings_get_their_own_trace() {
        let spellings = [
            UUID,
            "6BA7B810-9DAD-11D1-80B4-00C04FD430C8",
            "6ba7b8109dad11d180b400c04fd430c8",
            "{6ba7b810-9dad-11d1-80b4-00c04fd430c8}",
            "urn:uuid:6ba7b810-9dad-11d1-80b4-00c04fd430c8",
        ];
        let traces: HashSet<_> = spellings.iter().map(|s| derive_trace_id(s)).collect();
        assert_eq!(traces.len(), spellings.len());
        assert_eq!(
            derive_trace_id("6ba7b8109dad11d180b400c04fd430c8").as_slice(),
            &digest("6ba7b8109dad11d180b400c04fd430c8")[..TRACE_ID_LEN]
        );
    }

    #[test]
    fn nil_uuid_falls_back_to_hash() {
        let nil = "00000000-0000-0000-0000-000000000000";
        assert_ne!(derive_trace_id(nil), [0u8; TRACE_ID_LEN]);
        assert_ne!(opening_span_id(nil), [0u8; SPAN_ID_LEN]);
    }

    #[test]
    fn distinct_ids_give_distinct_traces() {
        let traces: HashSet<_> = (0..1000)
            .map(|i| derive_trace_id(&format!("request-{i}")))
            .collect();
        assert_eq!(traces.len(), 1000);
        assert_ne!(derive_trace_id(UUID), derive_trace_id("r1"));
    }

    #[test]
    fn opening_span_reuses_request_bytes() {
        let open = TraceIdentity::opening(UUID);
        assert_eq!(open.span_id_hex(), "80b400c04fd430c8");
        assert_eq!(open, TraceIdentity::opening(UUID));
        assert!(open.parent_span_id.is_none());
    }

    #[test]
    fn closing_span_shares_the_trace_but_not_the_span() {
        let open = TraceIdentity::opening(UUID);
        let a = TraceIdentity::closing(UUID, SpanPolicy::Single);
        let b = TraceIdentity::closing(UUID, SpanPolicy::Single);
        assert_eq!(a.trace_id, open.trace_id);
        assert_ne!(a.span_id, b.span_id);
        assert!(a.parent_span_id.is_none());
    }

    #[test]
    fn linked_closing_span_points_at_opening_span() {
        let open = TraceIdentity::opening("r1");
        let close = TraceIdentity::closing("r1", SpanPolicy::Linked);
        assert_eq!(close.parent_span_id, Some(open.span_id));
        assert_eq!(close.parent_span_id_hex(), Some(open.span_id_hex()));
    }
}
