//! Persistence stage
//!
//! A single worker drains the result queue into the durable log in queue
//! order. Failed writes are retried with a fixed backoff; once attempts are
//! exhausted the record is counted as lost, a `PersistenceFailed` event goes
//! out to the host, and the worker carries on with the next result.

use super::queue::{Dequeued, WorkQueue};
use super::stats::{bump, PipelineStats};
use crate::error::Error;
use crate::sink::LogSink;
use chatsense_common::events::{ChatsenseEvent, EventBus};
use chatsense_common::{ClassificationResult, LogRecord};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub(crate) struct PersistenceStage {
    pub(crate) results: Arc<WorkQueue<ClassificationResult>>,
    pub(crate) sink: Box<dyn LogSink>,
    pub(crate) max_attempts: u32,
    pub(crate) backoff: Duration,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) events: EventBus,
    /// Running count of lost records; never skips an update
    pub(crate) losses: watch::Sender<u64>,
}

/// Append with retries
///
/// Returns the number of attempts used, or the last error together with the
/// attempt count once every attempt has failed.
pub async fn append_with_retry(
    sink: &mut dyn LogSink,
    record: &LogRecord,
    max_attempts: u32,
    backoff: Duration,
) -> Result<u32, (u32, Error)> {
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match sink.append(record).await {
            Ok(()) => return Ok(attempt),
            Err(e) if attempt >= max_attempts => return Err((attempt, e)),
            Err(e) => {
                warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "Log write failed, retrying in {:?}",
                    backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// Worker loop; returns once the result queue is closed and drained
pub(crate) async fn run_persistence(mut stage: PersistenceStage) {
    let location = stage.sink.describe();
    debug!(sink = %location, "Persistence worker started");

    while let Some(Dequeued { item: result, .. }) = stage.results.pop().await {
        let record = LogRecord::from(&result);

        match append_with_retry(stage.sink.as_mut(), &record, stage.max_attempts, stage.backoff)
            .await
        {
            Ok(attempts) => {
                bump(&stage.stats.persisted);
                stage
                    .stats
                    .write_retries
                    .fetch_add(u64::from(attempts - 1), Ordering::Relaxed);
                stage.events.emit_lossy(ChatsenseEvent::recorded(&result));
            }
            Err((attempts, e)) => {
                bump(&stage.stats.lost);
                stage.losses.send_modify(|lost| *lost += 1);
                stage
                    .stats
                    .write_retries
                    .fetch_add(u64::from(attempts.saturating_sub(1)), Ordering::Relaxed);
                error!(
                    source_id = %result.source_id,
                    arrival_order = result.arrival_order,
                    attempts,
                    error = %e,
                    "Log write failed permanently, result lost"
                );
                stage.events.emit_lossy(ChatsenseEvent::PersistenceFailed {
                    source_id: result.source_id.clone(),
                    arrival_order: result.arrival_order,
                    attempts,
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
            }
        }

        stage.results.task_done();
    }

    if let Err(e) = stage.sink.flush().await {
        warn!(sink = %location, error = %e, "Final log flush failed");
    }

    info!(sink = %location, "Persistence worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chatsense_common::SentimentLabel;

    struct FailingSink {
        failures_left: u32,
        written: Vec<LogRecord>,
        calls: u32,
    }

    #[async_trait]
    impl LogSink for FailingSink {
        async fn append(&mut self, record: &LogRecord) -> crate::error::Result<()> {
            self.calls += 1;
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(Error::Persistence("disk full".to_string()));
            }
            self.written.push(record.clone());
            Ok(())
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    fn record() -> LogRecord {
        LogRecord {
            source_id: "chan1".to_string(),
            text: "hello".to_string(),
            label: SentimentLabel::Neutral,
            score: 0.5,
            latency_ms: 1.0,
        }
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failure() {
        let mut sink = FailingSink {
            failures_left: 2,
            written: Vec::new(),
            calls: 0,
        };

        let attempts = append_with_retry(&mut sink, &record(), 3, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(sink.written.len(), 1);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let mut sink = FailingSink {
            failures_left: 10,
            written: Vec::new(),
            calls: 0,
        };

        let outcome = append_with_retry(&mut sink, &record(), 3, Duration::from_millis(1)).await;
        let (attempts, _) = outcome.unwrap_err();
        assert_eq!(attempts, 3);
        assert_eq!(sink.calls, 3);
        assert!(sink.written.is_empty());
    }
}
