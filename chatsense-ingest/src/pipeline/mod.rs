//! Ingestion pipeline
//!
//! ```text
//! offer ─► filter ─► intake queue ─► classification workers ─► result queue ─► persistence worker ─► log
//! ```
//!
//! `offer` never waits: it is called from the event source's delivery
//! context. Every admitted event yields exactly one result (an `Error` result
//! when the classifier fails) unless it is evicted from a full intake queue.
//! Results reach the log in admission order with one worker, or with several
//! workers and `preserve_order` set.

pub mod classification;
pub mod persistence;
pub mod queue;
pub mod stats;

pub use classification::classify_isolated;
pub use persistence::append_with_retry;
pub use queue::{Dequeued, PushOutcome, WorkQueue};
pub use stats::{PipelineSnapshot, PipelineStats};

use crate::classifier::Classifier;
use crate::filter::{EventFilter, FilterVerdict};
use crate::sink::LogSink;
use chatsense_common::config::{OverflowPolicy, PipelineSettings};
use chatsense_common::events::{ChatsenseEvent, DropReason, EventBus};
use chatsense_common::{ChatMessage, ClassificationResult, RawEvent};
use chrono::Utc;
use classification::{ClassificationStage, ResultRelease};
use persistence::PersistenceStage;
use serde::Serialize;
use stats::bump;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pipeline sizing and failure handling
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub intake_capacity: usize,
    pub overflow: OverflowPolicy,
    pub workers: usize,
    pub preserve_order: bool,
    pub classify_timeout: Option<Duration>,
    pub max_write_attempts: u32,
    pub retry_backoff: Duration,
    pub shutdown_grace: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from(&PipelineSettings::default())
    }
}

impl From<&PipelineSettings> for PipelineConfig {
    fn from(settings: &PipelineSettings) -> Self {
        Self {
            intake_capacity: settings.intake_capacity,
            overflow: settings.overflow,
            workers: settings.workers,
            preserve_order: settings.preserve_order,
            classify_timeout: settings.classify_timeout(),
            max_write_attempts: settings.max_write_attempts,
            retry_backoff: settings.retry_backoff(),
            shutdown_grace: settings.shutdown_grace(),
        }
    }
}

/// What happened to an offered message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Queued for classification
    Admitted { arrival_order: u64 },
    /// Queued; the oldest queued event was evicted to make room
    AdmittedWithEviction { arrival_order: u64, evicted_order: u64 },
    /// Rejected by the event filter
    Filtered(FilterVerdict),
    /// Intake full and the drop-newest policy applies
    Rejected { arrival_order: u64 },
    /// Pipeline no longer accepts events
    ShuttingDown,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(
            self,
            Admission::Admitted { .. } | Admission::AdmittedWithEviction { .. }
        )
    }
}

/// Outcome of `Pipeline::shutdown`
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    /// Grace period expired and workers were aborted
    pub forced: bool,
    pub stats: PipelineSnapshot,
}

struct WorkerHandles {
    classifiers: Vec<JoinHandle<()>>,
    persistence: JoinHandle<()>,
}

pub struct Pipeline {
    config: PipelineConfig,
    filter: EventFilter,
    intake: Arc<WorkQueue<RawEvent>>,
    results: Arc<WorkQueue<ClassificationResult>>,
    stats: Arc<PipelineStats>,
    events: EventBus,
    next_arrival: AtomicU64,
    accepting: AtomicBool,
    losses: watch::Receiver<u64>,
    workers: Mutex<Option<WorkerHandles>>,
}

impl Pipeline {
    /// Build the queues and spawn the workers
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(
        config: PipelineConfig,
        filter: EventFilter,
        classifier: Arc<dyn Classifier>,
        sink: Box<dyn LogSink>,
        events: EventBus,
    ) -> Self {
        let worker_count = config.workers.max(1);
        let intake = Arc::new(WorkQueue::bounded(
            "intake",
            config.intake_capacity,
            config.overflow,
        ));
        let results = Arc::new(WorkQueue::unbounded("results"));
        let stats = Arc::new(PipelineStats::new());
        let (loss_tx, losses) = watch::channel(0);

        let stage = Arc::new(ClassificationStage {
            intake: Arc::clone(&intake),
            results: Arc::clone(&results),
            classifier: Arc::clone(&classifier),
            timeout: config.classify_timeout,
            release: ResultRelease::new(worker_count, config.preserve_order),
            stats: Arc::clone(&stats),
            events: events.clone(),
        });

        let classifiers = (0..worker_count)
            .map(|worker_id| {
                tokio::spawn(classification::run_worker(worker_id, Arc::clone(&stage)))
            })
            .collect();

        let persistence = tokio::spawn(persistence::run_persistence(PersistenceStage {
            results: Arc::clone(&results),
            sink,
            max_attempts: config.max_write_attempts,
            backoff: config.retry_backoff,
            stats: Arc::clone(&stats),
            events: events.clone(),
            losses: loss_tx,
        }));

        info!(
            classifier = classifier.name(),
            workers = worker_count,
            intake_capacity = config.intake_capacity,
            overflow = ?config.overflow,
            preserve_order = config.preserve_order,
            "Pipeline started"
        );

        Self {
            config,
            filter,
            intake,
            results,
            stats,
            events,
            next_arrival: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            losses,
            workers: Mutex::new(Some(WorkerHandles {
                classifiers,
                persistence,
            })),
        }
    }

    /// Filter a message and admit it if it passes
    ///
    /// Non-blocking; safe to call from the event source callback.
    pub fn offer(&self, message: ChatMessage) -> Admission {
        bump(&self.stats.offered);

        let arrival_order = self.next_arrival.fetch_add(1, Ordering::SeqCst);
        let event = RawEvent::from_message(message, arrival_order);

        let verdict = self
            .filter
            .verdict(&event.source_id, &event.author_id, &event.text);
        if !verdict.is_accept() {
            bump(&self.stats.filtered);
            debug!(source_id = %event.source_id, ?verdict, "Message filtered");
            return Admission::Filtered(verdict);
        }

        self.admit(event)
    }

    /// Place an already-filtered event on the intake queue
    pub fn admit(&self, event: RawEvent) -> Admission {
        if !self.accepting.load(Ordering::SeqCst) {
            return self.refuse_shutting_down(&event);
        }

        let arrival_order = event.arrival_order;
        match self.intake.push(event) {
            PushOutcome::Queued => {
                bump(&self.stats.admitted);
                Admission::Admitted { arrival_order }
            }
            PushOutcome::Evicted(oldest) => {
                bump(&self.stats.admitted);
                bump(&self.stats.evicted);
                self.report_overflow(&oldest, DropReason::QueueFullDropOldest);
                Admission::AdmittedWithEviction {
                    arrival_order,
                    evicted_order: oldest.arrival_order,
                }
            }
            PushOutcome::Rejected(event) => {
                bump(&self.stats.rejected_full);
                self.report_overflow(&event, DropReason::QueueFullDropNewest);
                Admission::Rejected { arrival_order }
            }
            PushOutcome::Closed(event) => self.refuse_shutting_down(&event),
        }
    }

    fn report_overflow(&self, dropped: &RawEvent, reason: DropReason) {
        warn!(
            source_id = %dropped.source_id,
            arrival_order = dropped.arrival_order,
            capacity = self.config.intake_capacity,
            ?reason,
            "Intake queue full, event dropped"
        );
        self.events.emit_lossy(ChatsenseEvent::EventDropped {
            source_id: dropped.source_id.clone(),
            arrival_order: dropped.arrival_order,
            reason,
            timestamp: Utc::now(),
        });
    }

    fn refuse_shutting_down(&self, event: &RawEvent) -> Admission {
        bump(&self.stats.rejected_shutdown);
        debug!(
            source_id = %event.source_id,
            arrival_order = event.arrival_order,
            "Pipeline shutting down, event refused"
        );
        self.events.emit_lossy(ChatsenseEvent::EventDropped {
            source_id: event.source_id.clone(),
            arrival_order: event.arrival_order,
            reason: DropReason::ShuttingDown,
            timestamp: Utc::now(),
        });
        Admission::ShuttingDown
    }

    /// Admitted events not yet classified and persisted
    pub fn unfinished(&self) -> usize {
        self.intake.unfinished() + self.results.unfinished()
    }

    /// Both queues empty and nothing in flight
    pub fn is_drained(&self) -> bool {
        self.unfinished() == 0
    }

    /// Wait until every admitted event has been classified and persisted
    pub async fn wait_drained(&self) {
        loop {
            self.intake.wait_idle().await;
            // Every classified event is on the result queue before intake goes idle
            self.results.wait_idle().await;
            if self.is_drained() {
                return;
            }
        }
    }

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.stats
            .snapshot(self.intake.len(), self.results.len(), self.unfinished())
    }

    /// Watch the number of records lost to permanent log write failures
    ///
    /// Unlike `PersistenceFailed` on the event bus, a slow reader cannot miss
    /// a loss here; it only sees the latest count.
    pub fn subscribe_losses(&self) -> watch::Receiver<u64> {
        self.losses.clone()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Stop intake and let both stages drain in order, bounded by the grace period
    ///
    /// Classification finishes before the result queue closes, so every
    /// classified event still reaches the log. If the grace period expires
    /// the remaining workers are aborted and the report is marked forced.
    /// Calling this again is a no-op that returns the current counters.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown_within(self.config.shutdown_grace).await
    }

    /// `shutdown` with an explicit grace period
    ///
    /// Workers that are already finished are reaped even with a zero grace.
    pub async fn shutdown_within(&self, grace: Duration) -> ShutdownReport {
        self.accepting.store(false, Ordering::SeqCst);

        let handles = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        let Some(mut handles) = handles else {
            return ShutdownReport {
                forced: false,
                stats: self.snapshot(),
            };
        };

        info!(
            queued = self.intake.len(),
            unfinished = self.unfinished(),
            "Pipeline shutting down"
        );
        self.intake.close();

        let drained = tokio::time::timeout(grace, async {
            for handle in handles.classifiers.iter_mut() {
                if let Err(e) = handle.await {
                    error!(error = %e, "Classification worker ended abnormally");
                }
            }
            self.results.close();
            if let Err(e) = (&mut handles.persistence).await {
                error!(error = %e, "Persistence worker ended abnormally");
            }
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                ?grace,
                unfinished = self.unfinished(),
                "Shutdown grace period expired, aborting workers"
            );
            self.results.close();
            for handle in &handles.classifiers {
                handle.abort();
            }
            handles.persistence.abort();
        }

        let report = ShutdownReport {
            forced: !drained,
            stats: self.snapshot(),
        };
        info!(
            forced = report.forced,
            persisted = report.stats.persisted,
            lost = report.stats.lost,
            "Pipeline stopped"
        );
        report
    }
}
