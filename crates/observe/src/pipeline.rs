//! The read → decode → correlate → dispatch loop.
//!
//! Records are handled strictly one at a time in arrival order. The only
//! concurrent actors are the cache's eviction task and the shutdown path,
//! which may call [`Sender::shutdown`] while a `send` is in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::{EventType, RecordError, TransportError};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::config::MissPolicy;
use crate::correlate::CorrelationCache;
use crate::decode::{decode, DecodedRecord};
use crate::sender::Sender;

/// What happened to a single well-formed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A request was stored to await its response.
    Pending,
    /// A correlated response was handed to the sender.
    Dispatched,
    /// An uncorrelated response was handed to the sender without a start time.
    Forwarded,
    /// The record's type is not handled.
    Skipped,
}

/// Counters kept over the lifetime of one connection.
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub records: AtomicU64,
    pub malformed: AtomicU64,
    pub skipped: AtomicU64,
    pub pending: AtomicU64,
    pub misses: AtomicU64,
    pub dispatched: AtomicU64,
    pub send_failures: AtomicU64,
}

impl PipelineStats {
    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    /// Emit the counters as one structured log line.
    pub fn log_summary(&self) {
        info!(
            records = Self::get(&self.records),
            malformed = Self::get(&self.malformed),
            skipped = Self::get(&self.skipped),
            pending = Self::get(&self.pending),
            misses = Self::get(&self.misses),
            dispatched = Self::get(&self.dispatched),
            send_failures = Self::get(&self.send_failures),
            "pipeline summary"
        );
    }
}

/// Decodes, correlates and dispatches audit records.
pub struct Pipeline {
    cache: CorrelationCache,
    sender: Arc<dyn Sender>,
    miss_policy: MissPolicy,
    stats: Arc<PipelineStats>,
}

impl Pipeline {
    pub fn new(cache: CorrelationCache, sender: Arc<dyn Sender>, miss_policy: MissPolicy) -> Self {
        Self {
            cache,
            sender,
            miss_policy,
            stats: Arc::new(PipelineStats::default()),
        }
    }

    /// Shared handle to the counters; stays readable after [`Pipeline::run`]
    /// is dropped mid-flight.
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Read newline-terminated records from `reader` until the stream ends.
    ///
    /// Per-record and per-backend failures are logged and counted; the loop
    /// carries on. The return value is always the fatal condition that
    /// stopped it. A clean end-of-stream is [`TransportError::ConnectionClosed`].
    pub async fn run<R>(&self, mut reader: R) -> TransportError
    where
        R: AsyncBufRead + Unpin,
    {
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => return TransportError::ConnectionClosed,
                Ok(_) if line.last() != Some(&b'\n') => {
                    warn!(bytes = line.len(), "discarding unterminated record at end of stream");
                    return TransportError::ConnectionClosed;
                }
                Ok(_) => {}
                Err(e) => return TransportError::Read(e),
            }

            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            PipelineStats::incr(&self.stats.records);

            match self.process_line(&line).await {
                Ok(Outcome::Pending) => PipelineStats::incr(&self.stats.pending),
                Ok(Outcome::Dispatched) => PipelineStats::incr(&self.stats.dispatched),
                Ok(Outcome::Forwarded) => {
                    PipelineStats::incr(&self.stats.misses);
                    PipelineStats::incr(&self.stats.dispatched);
                }
                Ok(Outcome::Skipped) => PipelineStats::incr(&self.stats.skipped),
                Err(e @ RecordError::CorrelationMiss { .. }) => {
                    PipelineStats::incr(&self.stats.misses);
                    warn!(error = %e, "dropping response");
                }
                Err(e) => {
                    PipelineStats::incr(&self.stats.malformed);
                    warn!(error = %e, "skipping record");
                }
            }
        }
    }

    /// Handle one framed record.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] for undecodable records and, under
    /// [`MissPolicy::Drop`], for responses without a pending request.
    pub async fn process_line(&self, line: &[u8]) -> Result<Outcome, RecordError> {
        let DecodedRecord {
            mut event,
            attributes,
        } = decode(line)?;

        let outcome = match event.event_type {
            EventType::Request => {
                self.cache.put(event.request.id.clone(), event.time);
                debug!(request_id = %event.request.id, "request pending");
                return Ok(Outcome::Pending);
            }
            EventType::Unknown => {
                debug!(request_id = %event.request.id, "skipping record of unknown type");
                return Ok(Outcome::Skipped);
            }
            EventType::Response => match self.cache.take_if_present(&event.request.id) {
                Some(pending) => {
                    event.start_time = pending.start_time;
                    debug!(request_id = %event.request.id, "correlated response");
                    Outcome::Dispatched
                }
                None => {
                    let miss = RecordError::CorrelationMiss {
                        request_id: event.request.id.clone(),
                    };
                    if self.miss_policy == MissPolicy::Drop {
                        return Err(miss);
                    }
                    warn!(error = %miss, "forwarding response without start time");
                    Outcome::Forwarded
                }
            },
        };

        if let Err(e) = self.sender.send(&event, &attributes).await {
            PipelineStats::incr(&self.stats.send_failures);
            warn!(request_id = %event.request.id, error = %e, "failed to send event");
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sender::MockSender;
    use chrono::{DateTime, Utc};
    use common::SendError;
    use std::time::Duration;
    use tokio::io::BufReader;

    const T0: &str = "2024-05-01T10:00:00Z";
    const T1: &str = "2024-05-01T10:00:01Z";

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn pipeline(mock: MockSender, policy: MissPolicy) -> Pipeline {
        Pipeline::new(
            CorrelationCache::new(Duration::from_secs(10)),
            Arc::new(mock),
            policy,
        )
    }

    fn request(id: &str) -> String {
        format!(
            r#"{{"type":"request","time":"{T0}","request":{{"id":"{id}","operation":"read","path":"secret/a"}}}}"#
        )
    }

    fn response(id: &str) -> String {
        format!(r#"{{"type":"response","time":"{T1}","error":"","request":{{"id":"{id}"}}}}"#)
    }

    #[tokio::test]
    async fn correlated_exchange_dispatches_once_with_start_time() {
        let mut mock = MockSender::new();
        mock.expect_send()
            .withf(|event, attrs| {
                event.request.id == "r1"
                    && event.event_type == EventType::Response
                    && event.start_time == Some(ts(T0))
                    && attrs.contains_key("request.id")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let p = pipeline(mock, MissPolicy::Drop);
        let input = format!("{}\n{}\n", request("r1"), response("r1"));
        let err = p.run(BufReader::new(input.as_bytes())).await;

        assert!(matches!(err, TransportError::ConnectionClosed));
        let stats = p.stats();
        assert_eq!(stats.records.load(Ordering::Relaxed), 2);
        assert_eq!(stats.pending.load(Ordering::Relaxed), 1);
        assert_eq!(stats.dispatched.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unmatched_response_is_a_miss_and_not_sent() {
        let mut mock = MockSender::new();
        mock.expect_send().times(0);

        let p = pipeline(mock, MissPolicy::Drop);
        let err = p.process_line(response("r2").as_bytes()).await.unwrap_err();
        assert!(matches!(err, RecordError::CorrelationMiss { ref request_id } if request_id == "r2"));

        let input = format!("{}\n", response("r2"));
        p.run(BufReader::new(input.as_bytes())).await;
        assert_eq!(p.stats().misses.load(Ordering::Relaxed), 1);
        assert_eq!(p.stats().dispatched.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn forward_policy_sends_miss_without_start_time() {
        let mut mock = MockSender::new();
        mock.expect_send()
            .withf(|event, _| event.request.id == "r2" && event.start_time.is_none())
            .times(1)
            .returning(|_, _| Ok(()));

        let p = pipeline(mock, MissPolicy::Forward);
        let outcome = p.process_line(response("r2").as_bytes()).await.unwrap();
        assert_eq!(outcome, Outcome::Forwarded);
    }

    #[tokio::test]
    async fn second_response_for_same_id_misses() {
        let mut mock = MockSender::new();
        mock.expect_send().times(1).returning(|_, _| Ok(()));

        let p = pipeline(mock, MissPolicy::Drop);
        p.process_line(request("r1").as_bytes()).await.unwrap();
        p.process_line(response("r1").as_bytes()).await.unwrap();
        assert!(p.process_line(response("r1").as_bytes()).await.is_err());
    }

    #[tokio::test]
    async fn malformed_lines_do_not_stop_the_loop() {
        let mut mock = MockSender::new();
        mock.expect_send().times(1).returning(|_, _| Ok(()));

        let p = pipeline(mock, MissPolicy::Drop);
        let input = format!(
            "not json\n[1,2]\n{{\"type\":7}}\n\n{}\n{}\n",
            request("r1"),
            response("r1")
        );
        p.run(BufReader::new(input.as_bytes())).await;

        let stats = p.stats();
        assert_eq!(stats.malformed.load(Ordering::Relaxed), 3);
        assert_eq!(stats.dispatched.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn unknown_types_are_skipped() {
        let mut mock = MockSender::new();
        mock.expect_send().times(0);

        let p = pipeline(mock, MissPolicy::Drop);
        let outcome = p
            .process_line(br#"{"type":"audit","request":{"id":"r1"}}"#)
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::Skipped);
    }

    #[tokio::test]
    async fn send_failure_is_counted_not_fatal() {
        let mut mock = MockSender::new();
        mock.expect_send()
            .times(2)
            .returning(|_, _| Err(SendError::backend("honeycomb", "503")));

        let p = pipeline(mock, MissPolicy::Drop);
        let input = format!(
            "{}\n{}\n{}\n{}\n",
            request("r1"),
            response("r1"),
            request("r2"),
            response("r2")
        );
        p.run(BufReader::new(input.as_bytes())).await;

        let stats = p.stats();
        assert_eq!(stats.send_failures.load(Ordering::Relaxed), 2);
        assert_eq!(stats.dispatched.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn trailing_fragment_is_discarded() {
        let mut mock = MockSender::new();
        mock.expect_send().times(0);

        let p = pipeline(mock, MissPolicy::Drop);
        let input = format!("{}\n{}", request("r1"), response("r1"));
        let err = p.run(BufReader::new(input.as_bytes())).await;

        assert!(matches!(err, TransportError::ConnectionClosed));
        assert_eq!(p.stats().records.load(Ordering::Relaxed), 1);
    }
}
