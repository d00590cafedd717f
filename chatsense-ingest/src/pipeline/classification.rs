//! Classification stage
//!
//! Workers take events from the intake queue, run the classifier on the
//! blocking thread pool, and hand exactly one result per event to the result
//! queue. A classifier failure of any kind (error, malformed output, panic,
//! timeout) becomes an `Error` result for that event and the worker moves on.

use super::queue::{Dequeued, PushOutcome, WorkQueue};
use super::stats::{bump, PipelineStats};
use crate::classifier::{top_ranked, Classifier, ClassifierError, ScoredLabel};
use chatsense_common::events::{ChatsenseEvent, EventBus};
use chatsense_common::{ClassificationResult, RawEvent, SentimentLabel};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Top label, its score, and the wall-clock classifier time in milliseconds
pub type Classification = (SentimentLabel, f64, f64);

/// Classifier call on the blocking pool
type BlockingCall = JoinHandle<(Result<Vec<ScoredLabel>, ClassifierError>, Duration)>;

/// Run `classifier` on `text` off the async worker threads
///
/// Latency covers only the classifier call, measured on the blocking thread.
/// A call that times out is detached and holds its blocking thread until the
/// classifier returns; pipeline workers wait for it instead.
pub async fn classify_isolated(
    classifier: Arc<dyn Classifier>,
    text: String,
    timeout: Option<Duration>,
) -> Result<Classification, ClassifierError> {
    classify_tracked(classifier, text, timeout).await.0
}

/// As `classify_isolated`, also handing back a call that outlived its timeout
async fn classify_tracked(
    classifier: Arc<dyn Classifier>,
    text: String,
    timeout: Option<Duration>,
) -> (Result<Classification, ClassifierError>, Option<BlockingCall>) {
    let mut call: BlockingCall = tokio::task::spawn_blocking(move || {
        let started = Instant::now();
        let ranked = classifier.classify(&text);
        (ranked, started.elapsed())
    });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut call).await {
            Ok(joined) => joined,
            Err(_) => return (Err(ClassifierError::Timeout(limit)), Some(call)),
        },
        None => call.await,
    };

    let outcome = joined
        .map_err(|e| ClassifierError::Panicked(e.to_string()))
        .and_then(|(ranked, elapsed)| {
            let (label, score) = top_ranked(&ranked?)?;
            Ok((label, score, elapsed.as_secs_f64() * 1000.0))
        });
    (outcome, None)
}

/// How finished results reach the result queue
pub(crate) enum ResultRelease {
    /// Push as soon as a worker finishes
    Immediate,
    /// Hold results until every earlier ticket has been released
    Ordered(Mutex<ReorderBuffer>),
}

#[derive(Default)]
pub(crate) struct ReorderBuffer {
    next_ticket: u64,
    pending: BTreeMap<u64, ClassificationResult>,
}

impl ResultRelease {
    pub(crate) fn new(workers: usize, preserve_order: bool) -> Self {
        // A single worker already finishes in queue order
        if preserve_order && workers > 1 {
            ResultRelease::Ordered(Mutex::new(ReorderBuffer::default()))
        } else {
            ResultRelease::Immediate
        }
    }

    fn release(
        &self,
        ticket: u64,
        result: ClassificationResult,
        results: &WorkQueue<ClassificationResult>,
    ) {
        match self {
            ResultRelease::Immediate => push_result(results, result),
            ResultRelease::Ordered(buffer) => {
                // Pushed under the lock so queue order matches ticket order
                let mut buffer = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                buffer.pending.insert(ticket, result);
                loop {
                    let next = buffer.next_ticket;
                    let Some(ready) = buffer.pending.remove(&next) else {
                        break;
                    };
                    buffer.next_ticket += 1;
                    push_result(results, ready);
                }
            }
        }
    }
}

fn push_result(results: &WorkQueue<ClassificationResult>, result: ClassificationResult) {
    // The result queue is unbounded and only closed after every worker exits
    if let PushOutcome::Closed(result) = results.push(result) {
        error!(
            source_id = %result.source_id,
            arrival_order = result.arrival_order,
            "Result queue closed before classification finished; result dropped"
        );
    }
}

/// Shared state of the classification workers
pub(crate) struct ClassificationStage {
    pub(crate) intake: Arc<WorkQueue<RawEvent>>,
    pub(crate) results: Arc<WorkQueue<ClassificationResult>>,
    pub(crate) classifier: Arc<dyn Classifier>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) release: ResultRelease,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) events: EventBus,
}

impl ClassificationStage {
    /// Classify one event; also returns a timed-out call still holding the classifier
    async fn classify_event(&self, event: RawEvent) -> (ClassificationResult, Option<BlockingCall>) {
        let (outcome, straggler) =
            classify_tracked(Arc::clone(&self.classifier), event.text.clone(), self.timeout).await;

        bump(&self.stats.classified);

        match outcome {
            Ok((label, score, latency_ms)) => {
                debug!(
                    source_id = %event.source_id,
                    arrival_order = event.arrival_order,
                    label = %label,
                    score,
                    latency_ms,
                    "Classified"
                );
                (
                    ClassificationResult::classified(event, label, score, latency_ms),
                    straggler,
                )
            }
            Err(e) => {
                bump(&self.stats.classification_errors);
                warn!(
                    source_id = %event.source_id,
                    arrival_order = event.arrival_order,
                    classifier = self.classifier.name(),
                    error = %e,
                    "Classification failed, recording Error result"
                );
                self.events.emit_lossy(ChatsenseEvent::ClassificationFailed {
                    source_id: event.source_id.clone(),
                    arrival_order: event.arrival_order,
                    reason: e.to_string(),
                    timestamp: Utc::now(),
                });
                (ClassificationResult::failed(event), straggler)
            }
        }
    }
}

/// Worker loop; returns once intake is closed and drained
pub(crate) async fn run_worker(worker_id: usize, stage: Arc<ClassificationStage>) {
    debug!(worker_id, "Classification worker started");

    while let Some(Dequeued { ticket, item }) = stage.intake.pop().await {
        let (result, straggler) = stage.classify_event(item).await;
        // Result is queued before the event counts as done so drain checks never see a gap
        stage.release.release(ticket, result, &stage.results);
        stage.intake.task_done();

        // One classifier call per worker, even after a timeout
        if let Some(call) = straggler {
            debug!(worker_id, "Waiting for timed-out classifier call to return");
            if let Err(e) = call.await {
                warn!(worker_id, error = %e, "Timed-out classifier call ended abnormally");
            }
        }
    }

    debug!(worker_id, "Classification worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatsense_common::ChatMessage;

    fn result(order: u64) -> ClassificationResult {
        let event = RawEvent::from_message(ChatMessage::new("chan1", "viewer", "hi"), order);
        ClassificationResult::classified(event, SentimentLabel::Neutral, 0.5, 1.0)
    }

    #[tokio::test]
    async fn test_classify_isolated_reads_top_label() {
        let classifier: Arc<dyn Classifier> =
            Arc::new(|_: &str| -> Result<Vec<ScoredLabel>, ClassifierError> {
                Ok(vec![
                    ScoredLabel::new("Positive", 0.91),
                    ScoredLabel::new("Neutral", 0.09),
                ])
            });

        let (label, score, latency_ms) = classify_isolated(classifier, "hello world".into(), None)
            .await
            .unwrap();
        assert_eq!(label, SentimentLabel::Positive);
        assert_eq!(score, 0.91);
        assert!(latency_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_classify_isolated_contains_panic() {
        let classifier: Arc<dyn Classifier> =
            Arc::new(|_: &str| -> Result<Vec<ScoredLabel>, ClassifierError> {
                panic!("model crashed")
            });

        let outcome = classify_isolated(classifier, "boom".into(), None).await;
        assert!(matches!(outcome, Err(ClassifierError::Panicked(_))));
    }

    #[tokio::test]
    async fn test_classify_isolated_times_out() {
        let classifier: Arc<dyn Classifier> =
            Arc::new(|_: &str| -> Result<Vec<ScoredLabel>, ClassifierError> {
                std::thread::sleep(Duration::from_millis(200));
                Ok(vec![ScoredLabel::new("Neutral", 1.0)])
            });

        let outcome =
            classify_isolated(classifier, "slow".into(), Some(Duration::from_millis(20))).await;
        assert_eq!(outcome, Err(ClassifierError::Timeout(Duration::from_millis(20))));
    }

    #[tokio::test]
    async fn test_ordered_release_waits_for_earlier_tickets() {
        let release = ResultRelease::new(3, true);
        let results = WorkQueue::unbounded("results");

        release.release(2, result(2), &results);
        release.release(1, result(1), &results);
        assert!(results.is_empty());

        release.release(0, result(0), &results);
        assert_eq!(results.len(), 3);
        for expected in 0..3 {
            assert_eq!(results.pop().await.unwrap().item.arrival_order, expected);
        }
    }

    #[test]
    fn test_single_worker_releases_immediately() {
        let release = ResultRelease::new(1, true);
        assert!(matches!(release, ResultRelease::Immediate));

        let results = WorkQueue::unbounded("results");
        release.release(5, result(5), &results);
        assert_eq!(results.len(), 1);
    }
}
