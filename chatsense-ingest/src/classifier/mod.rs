//! Classifier seam
//!
//! The classifier is an opaque, synchronous, possibly slow function from text
//! to a ranked list of labels. The pipeline only ever reads the top-ranked
//! entry and never calls a classifier on an async worker thread.

pub mod lexicon;

pub use lexicon::LexiconClassifier;

use chatsense_common::SentimentLabel;
use std::time::Duration;
use thiserror::Error;

/// One ranked entry of classifier output
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredLabel {
    /// Label as named by the model (e.g. "positive", "LABEL_2")
    pub label: String,
    /// Confidence (0.0-1.0)
    pub score: f64,
}

impl ScoredLabel {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            score,
        }
    }
}

/// Classifier failures; all of them map to an `Error` result for the event
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClassifierError {
    #[error("Classifier failed: {0}")]
    Failed(String),

    #[error("Malformed classifier output: {0}")]
    Malformed(String),

    #[error("Classifier timed out after {0:?}")]
    Timeout(Duration),

    #[error("Classifier panicked: {0}")]
    Panicked(String),
}

/// Text classifier
///
/// Implementations may block for tens to hundreds of milliseconds. They are
/// shared between workers, so any interior state must be synchronized.
pub trait Classifier: Send + Sync + 'static {
    /// Rank labels for `text`, best first
    fn classify(&self, text: &str) -> Result<Vec<ScoredLabel>, ClassifierError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "classifier"
    }
}

impl<F> Classifier for F
where
    F: Fn(&str) -> Result<Vec<ScoredLabel>, ClassifierError> + Send + Sync + 'static,
{
    fn classify(&self, text: &str) -> Result<Vec<ScoredLabel>, ClassifierError> {
        self(text)
    }
}

/// Interpret the top-ranked entry of classifier output
pub fn top_ranked(ranked: &[ScoredLabel]) -> Result<(SentimentLabel, f64), ClassifierError> {
    let top = ranked
        .first()
        .ok_or_else(|| ClassifierError::Malformed("empty ranking".to_string()))?;

    let label = SentimentLabel::from_model_label(&top.label)
        .ok_or_else(|| ClassifierError::Malformed(format!("unknown label '{}'", top.label)))?;

    if !top.score.is_finite() || !(0.0..=1.0).contains(&top.score) {
        return Err(ClassifierError::Malformed(format!(
            "score {} outside [0, 1]",
            top.score
        )));
    }

    Ok((label, top.score))
}
