//! Chat event and classification data model
//!
//! Data flows one way through these types:
//! `ChatMessage` (from the event source) → `RawEvent` (admitted to intake)
//! → `ClassificationResult` (one per admitted event) → `LogRecord` (one row in the log).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Inbound chat message as delivered by the event source callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Channel the message was posted in
    pub source_id: String,
    /// Account that posted the message (display name)
    pub author_id: String,
    /// Message body
    pub text: String,
}

impl ChatMessage {
    pub fn new(
        source_id: impl Into<String>,
        author_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            author_id: author_id.into(),
            text: text.into(),
        }
    }
}

/// One inbound text event prior to classification
///
/// Immutable once created. `arrival_order` is assigned by the pipeline from a
/// monotonic counter at admission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub source_id: String,
    pub author_id: String,
    pub text: String,
    pub arrival_order: u64,
}

impl RawEvent {
    /// Build a raw event from an inbound message and its arrival position
    pub fn from_message(message: ChatMessage, arrival_order: u64) -> Self {
        Self {
            source_id: message.source_id,
            author_id: message.author_id,
            text: message.text,
            arrival_order,
        }
    }
}

/// Sentiment category attached to a classification result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
    /// Classifier failed for this event
    Error,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "Positive",
            SentimentLabel::Neutral => "Neutral",
            SentimentLabel::Negative => "Negative",
            SentimentLabel::Error => "Error",
        }
    }

    /// Map a label emitted by a sentiment model to a category
    ///
    /// Accepts the category names in any case and the positional names of a
    /// 3-label classification head (`LABEL_0` = Negative, `LABEL_1` = Neutral,
    /// `LABEL_2` = Positive). Returns `None` for anything else; a model never
    /// produces `Error` itself.
    pub fn from_model_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("positive") || label.eq_ignore_ascii_case("label_2") {
            Some(SentimentLabel::Positive)
        } else if label.eq_ignore_ascii_case("neutral") || label.eq_ignore_ascii_case("label_1") {
            Some(SentimentLabel::Neutral)
        } else if label.eq_ignore_ascii_case("negative") || label.eq_ignore_ascii_case("label_0")
        {
            Some(SentimentLabel::Negative)
        } else {
            None
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SentimentLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("error") {
            return Ok(SentimentLabel::Error);
        }
        Self::from_model_label(s)
            .ok_or_else(|| Error::InvalidInput(format!("Unknown sentiment label: {}", s)))
    }
}

/// Lifecycle state of the channel session
///
/// Cycles `Idle → Joining → Active → Leaving → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SessionState {
    /// No source subscribed
    Idle,
    /// Join outstanding against the event source
    Joining,
    /// Events from the subscribed source are flowing
    Active,
    /// Unsubscribed, draining queued work
    Leaving,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "IDLE",
            SessionState::Joining => "JOINING",
            SessionState::Active => "ACTIVE",
            SessionState::Leaving => "LEAVING",
        };
        f.write_str(name)
    }
}

/// Labeled and scored outcome for one admitted `RawEvent`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub source_id: String,
    pub text: String,
    pub label: SentimentLabel,
    /// Confidence of the top-ranked label (0.0-1.0)
    pub score: f64,
    /// Wall-clock classifier time in milliseconds
    pub latency_ms: f64,
    /// Arrival position of the originating event
    pub arrival_order: u64,
    pub classified_at: DateTime<Utc>,
}

impl ClassificationResult {
    /// Successful classification of `event`
    pub fn classified(event: RawEvent, label: SentimentLabel, score: f64, latency_ms: f64) -> Self {
        Self {
            source_id: event.source_id,
            text: event.text,
            label,
            score,
            latency_ms,
            arrival_order: event.arrival_order,
            classified_at: Utc::now(),
        }
    }

    /// Placeholder result for an event the classifier could not handle
    pub fn failed(event: RawEvent) -> Self {
        Self::classified(event, SentimentLabel::Error, 0.0, 0.0)
    }

    pub fn is_error(&self) -> bool {
        self.label == SentimentLabel::Error
    }
}

/// One row of the append-only classification log
///
/// Field order is the column order of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub source_id: String,
    pub text: String,
    pub label: SentimentLabel,
    pub score: f64,
    pub latency_ms: f64,
}

impl From<&ClassificationResult> for LogRecord {
    fn from(result: &ClassificationResult) -> Self {
        Self {
            source_id: result.source_id.clone(),
            text: result.text.clone(),
            label: result.label,
            score: result.score,
            latency_ms: result.latency_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_label_mapping() {
        assert_eq!(SentimentLabel::from_model_label("positive"), Some(SentimentLabel::Positive));
        assert_eq!(SentimentLabel::from_model_label("NEUTRAL"), Some(SentimentLabel::Neutral));
        assert_eq!(SentimentLabel::from_model_label("Negative"), Some(SentimentLabel::Negative));
        assert_eq!(SentimentLabel::from_model_label("LABEL_0"), Some(SentimentLabel::Negative));
        assert_eq!(SentimentLabel::from_model_label("label_2"), Some(SentimentLabel::Positive));
        assert_eq!(SentimentLabel::from_model_label("error"), None);
        assert_eq!(SentimentLabel::from_model_label("joy"), None);
    }

    #[test]
    fn test_label_from_str_accepts_error() {
        assert_eq!("Error".parse::<SentimentLabel>().unwrap(), SentimentLabel::Error);
        assert_eq!("positive".parse::<SentimentLabel>().unwrap(), SentimentLabel::Positive);
        assert!("mixed".parse::<SentimentLabel>().is_err());
    }

    #[test]
    fn test_failed_result_has_zero_score_and_latency() {
        let event = RawEvent::from_message(ChatMessage::new("chan1", "viewer", "hello"), 7);
        let result = ClassificationResult::failed(event);

        assert!(result.is_error());
        assert_eq!(result.score, 0.0);
        assert_eq!(result.latency_ms, 0.0);
        assert_eq!(result.arrival_order, 7);
        assert_eq!(result.text, "hello");
    }

    #[test]
    fn test_log_record_keeps_result_fields() {
        let event = RawEvent::from_message(ChatMessage::new("chan1", "viewer", "hello world"), 0);
        let result = ClassificationResult::classified(event, SentimentLabel::Positive, 0.91, 12.5);
        let record = LogRecord::from(&result);

        assert_eq!(record.source_id, "chan1");
        assert_eq!(record.text, "hello world");
        assert_eq!(record.label, SentimentLabel::Positive);
        assert_eq!(record.score, 0.91);
        assert_eq!(record.latency_ms, 12.5);
    }
}
