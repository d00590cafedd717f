//! Channel session lifecycle
//!
//! Owns the `Idle → Joining → Active → Leaving → Idle` cycle against one
//! event source. Only messages from the active channel, delivered while the
//! session is `Active`, are offered to the pipeline. A leave unsubscribes,
//! waits a short settle period for in-flight deliveries, then waits for the
//! pipeline to drain before reporting `Idle`.
//!
//! At most one join or leave transition runs at a time. A join requested
//! while a leave is in progress is queued and starts once the session is
//! idle; any other overlapping request is refused as busy.

use crate::error::{Error, Result};
use crate::pipeline::{Pipeline, ShutdownReport};
use crate::source::{ChatSource, MessageHandler};
use chatsense_common::config::SessionSettings;
use chatsense_common::events::{ChatsenseEvent, EventBus};
use chatsense_common::{ChatMessage, SessionState};
use chrono::Utc;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Normalize an operator-supplied channel name
///
/// Channel names are case-insensitive and surrounding whitespace is ignored.
pub fn normalize_source_id(raw: &str) -> Result<String> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return Err(Error::InvalidInput("channel name must not be empty".to_string()));
    }
    if normalized.chars().any(char::is_whitespace) {
        return Err(Error::InvalidInput(format!(
            "channel name must be a single word: '{}'",
            raw.trim()
        )));
    }
    Ok(normalized)
}

/// Session timing
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub join_timeout: Duration,
    pub leave_settle: Duration,
    /// `None` waits for the drain indefinitely
    pub drain_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&SessionSettings::default())
    }
}

impl From<&SessionSettings> for SessionConfig {
    fn from(settings: &SessionSettings) -> Self {
        Self {
            join_timeout: settings.join_timeout(),
            leave_settle: settings.leave_settle(),
            drain_timeout: settings.drain_timeout(),
        }
    }
}

/// How a join request was taken up
#[derive(Debug)]
pub enum JoinOutcome {
    /// Session is active on the channel
    Joined { source_id: String },
    /// Queued behind the leave in progress
    Queued(PendingJoin),
}

/// Handle to a join that starts once the current leave finishes
#[derive(Debug)]
pub struct PendingJoin {
    source_id: String,
    reply: oneshot::Receiver<Result<()>>,
}

impl PendingJoin {
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Wait for the queued join to run and complete
    pub async fn wait(self) -> Result<()> {
        self.reply.await.unwrap_or(Err(Error::ShuttingDown))
    }
}

/// Outcome of a completed leave
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaveReport {
    pub source_id: String,
    /// Pipeline drained before the session went idle
    pub drained: bool,
    /// Work still outstanding when the session went idle
    pub unfinished: usize,
}

/// Point-in-time view of the session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub source_id: Option<String>,
    pub pending_join: Option<String>,
    pub shutting_down: bool,
}

struct QueuedJoin {
    source_id: String,
    reply: oneshot::Sender<Result<()>>,
}

struct SessionStatus {
    state: SessionState,
    source_id: Option<String>,
    pending_join: Option<QueuedJoin>,
    /// Task running a queued join; reaped at shutdown
    join_task: Option<JoinHandle<()>>,
    shutting_down: bool,
}

struct SessionInner {
    source: Arc<dyn ChatSource>,
    pipeline: Arc<Pipeline>,
    config: SessionConfig,
    events: EventBus,
    status: Mutex<SessionStatus>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Change state; caller holds the status lock
    fn transition(&self, status: &mut SessionStatus, new_state: SessionState) {
        let old_state = status.state;
        if old_state == new_state {
            return;
        }
        status.state = new_state;
        self.state_tx.send_replace(new_state);

        info!(
            source_id = status.source_id.as_deref().unwrap_or("-"),
            "Session {} → {}",
            old_state,
            new_state
        );
        self.events.emit_lossy(ChatsenseEvent::SessionStateChanged {
            source_id: status.source_id.clone(),
            old_state,
            new_state,
            timestamp: Utc::now(),
        });
    }

    /// Admission gate for source deliveries
    fn deliver(&self, message: ChatMessage) {
        // Held while offering so a leave cannot slip between the check and the push
        let status = self.lock();
        let from_active = status.state == SessionState::Active
            && status
                .source_id
                .as_deref()
                .is_some_and(|id| message.source_id.trim().eq_ignore_ascii_case(id));

        if from_active {
            self.pipeline.offer(message);
        } else {
            debug!(
                source_id = %message.source_id,
                state = %status.state,
                "Ignoring message outside the active session"
            );
        }
    }
}

/// Session manager handle; clones share the same session
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionInner>,
}

impl SessionManager {
    pub fn new(
        source: Arc<dyn ChatSource>,
        pipeline: Arc<Pipeline>,
        config: SessionConfig,
    ) -> Self {
        let events = pipeline.events().clone();
        let (state_tx, _) = watch::channel(SessionState::Idle);

        Self {
            inner: Arc::new(SessionInner {
                source,
                pipeline,
                config,
                events,
                status: Mutex::new(SessionStatus {
                    state: SessionState::Idle,
                    source_id: None,
                    pending_join: None,
                    join_task: None,
                    shutting_down: false,
                }),
                state_tx,
            }),
        }
    }

    /// Register the delivery callback with the event source
    pub async fn connect(&self) -> Result<()> {
        let session: Weak<SessionInner> = Arc::downgrade(&self.inner);
        let handler: MessageHandler = Arc::new(move |message| {
            if let Some(inner) = session.upgrade() {
                inner.deliver(message);
            }
        });

        self.inner.source.connect(handler).await?;
        info!(source = self.inner.source.name(), "Connected to event source");
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let status = self.inner.lock();
        SessionSnapshot {
            state: status.state,
            source_id: status.source_id.clone(),
            pending_join: status.pending_join.as_ref().map(|p| p.source_id.clone()),
            shutting_down: status.shutting_down,
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Watch state changes
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.inner.pipeline
    }

    /// Join a channel
    ///
    /// From `Idle` the join runs now and fails fast after the join timeout,
    /// returning the session to `Idle`. During a leave the join is queued
    /// and runs once the session is idle.
    pub async fn request_join(&self, source_id: &str) -> Result<JoinOutcome> {
        let source_id = normalize_source_id(source_id)?;

        {
            let mut status = self.inner.lock();
            if status.shutting_down {
                return Err(Error::ShuttingDown);
            }

            match status.state {
                SessionState::Idle => {
                    status.source_id = Some(source_id.clone());
                    self.inner.transition(&mut status, SessionState::Joining);
                }
                SessionState::Leaving => {
                    if let Some(queued) = &status.pending_join {
                        return Err(Error::SessionBusy(format!(
                            "join of '{}' already queued",
                            queued.source_id
                        )));
                    }
                    let (reply, rx) = oneshot::channel();
                    status.pending_join = Some(QueuedJoin {
                        source_id: source_id.clone(),
                        reply,
                    });
                    info!(%source_id, "Join queued until leave completes");
                    return Ok(JoinOutcome::Queued(PendingJoin {
                        source_id,
                        reply: rx,
                    }));
                }
                SessionState::Joining | SessionState::Active => {
                    return Err(Error::SessionBusy(format!(
                        "session is {} on '{}'; leave first",
                        status.state,
                        status.source_id.as_deref().unwrap_or("")
                    )));
                }
            }
        }

        self.run_join(source_id.clone()).await?;
        Ok(JoinOutcome::Joined { source_id })
    }

    /// Join for a session already claimed in `Joining`
    async fn run_join(&self, source_id: String) -> Result<()> {
        let join_timeout = self.inner.config.join_timeout;
        let joined =
            tokio::time::timeout(join_timeout, self.inner.source.join(&source_id)).await;

        let failure = match joined {
            Ok(Ok(())) => {
                let aborted = {
                    let mut status = self.inner.lock();
                    if status.shutting_down {
                        status.source_id = None;
                        self.inner.transition(&mut status, SessionState::Idle);
                        true
                    } else {
                        self.inner.transition(&mut status, SessionState::Active);
                        false
                    }
                };
                if !aborted {
                    return Ok(());
                }

                // Shutdown started mid-join; undo the subscription
                if let Err(e) = self.inner.source.leave(&source_id).await {
                    warn!(%source_id, error = %e, "Leave after aborted join failed");
                }
                return Err(Error::ShuttingDown);
            }
            Ok(Err(e)) => Error::JoinRejected {
                source_id: source_id.clone(),
                reason: e.to_string(),
            },
            // A late completion is harmless: deliveries are gated on Active
            Err(_) => Error::JoinTimeout(source_id.clone(), join_timeout),
        };

        warn!(%source_id, error = %failure, "Join failed");
        {
            let mut status = self.inner.lock();
            status.source_id = None;
            self.inner.transition(&mut status, SessionState::Idle);
        }
        self.inner.events.emit_lossy(ChatsenseEvent::JoinFailed {
            source_id,
            reason: failure.to_string(),
            timestamp: Utc::now(),
        });
        Err(failure)
    }

    /// Leave the active channel and wait for its queued work to drain
    pub async fn request_leave(&self) -> Result<LeaveReport> {
        let source_id = {
            let mut status = self.inner.lock();
            if status.shutting_down {
                return Err(Error::ShuttingDown);
            }
            self.claim_leave(&mut status)?
        };
        Ok(self.run_leave(source_id).await)
    }

    fn claim_leave(&self, status: &mut SessionStatus) -> Result<String> {
        match status.state {
            SessionState::Active => {
                let source_id = status.source_id.clone().unwrap_or_default();
                self.inner.transition(status, SessionState::Leaving);
                Ok(source_id)
            }
            SessionState::Idle => Err(Error::InvalidState("no active session to leave".to_string())),
            SessionState::Joining | SessionState::Leaving => Err(Error::SessionBusy(format!(
                "session is {}",
                status.state
            ))),
        }
    }

    async fn run_leave(&self, source_id: String) -> LeaveReport {
        if let Err(e) = self.inner.source.leave(&source_id).await {
            // Deliveries are already gated off; keep going
            warn!(%source_id, error = %e, "Event source leave failed");
        }

        tokio::time::sleep(self.inner.config.leave_settle).await;

        let pipeline = &self.inner.pipeline;
        let drained = match self.inner.config.drain_timeout {
            Some(limit) => tokio::time::timeout(limit, pipeline.wait_drained())
                .await
                .is_ok(),
            None => {
                pipeline.wait_drained().await;
                true
            }
        };

        let unfinished = pipeline.unfinished();
        if !drained {
            warn!(%source_id, unfinished, "Drain timed out, going idle with work outstanding");
            self.inner.events.emit_lossy(ChatsenseEvent::DrainTimedOut {
                source_id: source_id.clone(),
                unfinished,
                timestamp: Utc::now(),
            });
        }

        {
            let mut status = self.inner.lock();
            status.source_id = None;
            self.inner.transition(&mut status, SessionState::Idle);

            match status.pending_join.take() {
                Some(queued) if status.shutting_down => {
                    let _ = queued.reply.send(Err(Error::ShuttingDown));
                }
                Some(queued) => {
                    // Claimed under the same lock so no other request takes the idle slot
                    status.source_id = Some(queued.source_id.clone());
                    self.inner.transition(&mut status, SessionState::Joining);

                    // Stored before the lock is released so shutdown always finds it
                    let manager = self.clone();
                    status.join_task = Some(tokio::spawn(async move {
                        let outcome = manager.run_join(queued.source_id).await;
                        let _ = queued.reply.send(outcome);
                    }));
                }
                None => {}
            }
        }

        info!(%source_id, drained, "Left channel");
        LeaveReport {
            source_id,
            drained,
            unfinished,
        }
    }

    /// Leave the current channel (if any) and join another
    pub async fn switch_to(&self, source_id: &str) -> Result<JoinOutcome> {
        let target = normalize_source_id(source_id)?;

        let current = {
            let status = self.inner.lock();
            match status.state {
                SessionState::Idle => None,
                SessionState::Active => status.source_id.clone(),
                SessionState::Joining | SessionState::Leaving => {
                    return Err(Error::SessionBusy(format!("session is {}", status.state)));
                }
            }
        };

        if current.as_deref() == Some(target.as_str()) {
            return Ok(JoinOutcome::Joined { source_id: target });
        }
        if current.is_some() {
            self.request_leave().await?;
        }
        self.request_join(&target).await
    }

    /// Stop the session for good
    ///
    /// Refuses new commands, leaves the active channel with a drain, waits for
    /// a queued join to wind down, then shuts the pipeline down. The whole
    /// sequence shares the pipeline's grace period: once it runs out the
    /// session is forced idle, the pipeline workers are aborted, and the
    /// report is marked forced.
    pub async fn shutdown(&self) -> ShutdownReport {
        self.inner.lock().shutting_down = true;

        let grace = self.inner.pipeline.config().shutdown_grace;
        let started = Instant::now();

        let settled = tokio::time::timeout(grace, self.settle_for_shutdown())
            .await
            .is_ok();
        if !settled {
            warn!(
                ?grace,
                unfinished = self.inner.pipeline.unfinished(),
                "Shutdown grace period expired while leaving"
            );
            self.force_idle();
        }

        let remaining = grace.saturating_sub(started.elapsed());
        let mut report = self.inner.pipeline.shutdown_within(remaining).await;
        report.forced |= !settled;
        report
    }

    /// Leave (with drain) and reap the queued join task
    async fn settle_for_shutdown(&self) {
        let mut state_rx = self.subscribe_state();

        loop {
            let leave = {
                let mut status = self.inner.lock();
                match status.state {
                    SessionState::Idle => break,
                    SessionState::Active => self.claim_leave(&mut status).ok(),
                    SessionState::Joining | SessionState::Leaving => None,
                }
            };

            match leave {
                Some(source_id) => {
                    self.run_leave(source_id).await;
                }
                None => {
                    // Wait for the in-flight transition to settle
                    let _ = state_rx.changed().await;
                }
            }
        }

        let task = self.inner.lock().join_task.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Queued join task ended abnormally");
            }
        }
    }

    /// Drop whatever transition was cut short by the grace period
    fn force_idle(&self) {
        let mut status = self.inner.lock();
        if let Some(task) = status.join_task.take() {
            task.abort();
        }
        if let Some(queued) = status.pending_join.take() {
            let _ = queued.reply.send(Err(Error::ShuttingDown));
        }
        status.source_id = None;
        self.inner.transition(&mut status, SessionState::Idle);
    }
}
