//! Status events and the broadcast event bus
//!
//! Pipeline stages and the session manager report what happened here; the
//! operator console and any other observer subscribe. Nothing in the data
//! path waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::{ClassificationResult, SentimentLabel, SessionState};

/// Why an event never reached classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Intake queue full, oldest queued event evicted
    QueueFullDropOldest,
    /// Intake queue full, incoming event rejected
    QueueFullDropNewest,
    /// Pipeline is shutting down
    ShuttingDown,
}

/// chatsense status events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ChatsenseEvent {
    /// Session moved between lifecycle states
    SessionStateChanged {
        source_id: Option<String>,
        old_state: SessionState,
        new_state: SessionState,
        timestamp: DateTime<Utc>,
    },

    /// Join attempt timed out or was rejected; session is back to idle
    JoinFailed {
        source_id: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Leave finished before the queues emptied
    DrainTimedOut {
        source_id: String,
        unfinished: usize,
        timestamp: DateTime<Utc>,
    },

    /// Admitted event discarded before classification
    EventDropped {
        source_id: String,
        arrival_order: u64,
        reason: DropReason,
        timestamp: DateTime<Utc>,
    },

    /// Classifier failed; an `Error` result was produced instead
    ClassificationFailed {
        source_id: String,
        arrival_order: u64,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Result appended to the durable log
    ResultRecorded {
        source_id: String,
        text: String,
        label: SentimentLabel,
        score: f64,
        latency_ms: f64,
        arrival_order: u64,
        timestamp: DateTime<Utc>,
    },

    /// Log write exhausted its retries; the result is lost
    PersistenceFailed {
        source_id: String,
        arrival_order: u64,
        attempts: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl ChatsenseEvent {
    /// Status event for a result that reached the log
    pub fn recorded(result: &ClassificationResult) -> Self {
        ChatsenseEvent::ResultRecorded {
            source_id: result.source_id.clone(),
            text: result.text.clone(),
            label: result.label,
            score: result.score,
            latency_ms: result.latency_ms,
            arrival_order: result.arrival_order,
            timestamp: Utc::now(),
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over `tokio::sync::broadcast`. Cloning the bus shares the
/// same channel. Slow subscribers lag and miss events; emitters never block.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChatsenseEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use chatsense_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ChatsenseEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ChatsenseEvent,
    ) -> Result<usize, broadcast::error::SendError<ChatsenseEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: ChatsenseEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.emit(ChatsenseEvent::JoinFailed {
            source_id: "nonexistentxyz".to_string(),
            reason: "timed out".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            ChatsenseEvent::JoinFailed { source_id, .. } => assert_eq!(source_id, "nonexistentxyz"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.subscriber_count(), 0);

        let event = ChatsenseEvent::DrainTimedOut {
            source_id: "chan1".to_string(),
            unfinished: 3,
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ChatsenseEvent::SessionStateChanged {
            source_id: Some("chan1".to_string()),
            old_state: SessionState::Joining,
            new_state: SessionState::Active,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "SessionStateChanged");
        assert_eq!(json["new_state"], "ACTIVE");
    }
}
