//! Classifier doubles

use chatsense_ingest::classifier::{Classifier, ClassifierError, ScoredLabel};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Always ranks `label` first with `score`
pub fn fixed_classifier(label: &'static str, score: f64) -> Arc<dyn Classifier> {
    Arc::new(move |_: &str| -> Result<Vec<ScoredLabel>, ClassifierError> {
        Ok(vec![
            ScoredLabel::new(label, score),
            ScoredLabel::new("Neutral", (1.0 - score) / 2.0),
        ])
    })
}

/// Sleeps (blocking) before answering; counts calls
pub struct SlowClassifier {
    pub delay: Duration,
    pub calls: AtomicUsize,
}

impl SlowClassifier {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for SlowClassifier {
    fn classify(&self, _text: &str) -> Result<Vec<ScoredLabel>, ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        Ok(vec![ScoredLabel::new("Neutral", 0.6)])
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Returns an error for one specific text, Positive otherwise
pub struct FailOn(pub &'static str);

impl Classifier for FailOn {
    fn classify(&self, text: &str) -> Result<Vec<ScoredLabel>, ClassifierError> {
        if text == self.0 {
            return Err(ClassifierError::Failed("model error".to_string()));
        }
        Ok(vec![ScoredLabel::new("Positive", 0.8)])
    }
}

/// Panics for one specific text, Negative otherwise
pub struct PanicOn(pub &'static str);

impl Classifier for PanicOn {
    fn classify(&self, text: &str) -> Result<Vec<ScoredLabel>, ClassifierError> {
        if text == self.0 {
            panic!("classifier crashed on '{}'", text);
        }
        Ok(vec![ScoredLabel::new("Negative", 0.7)])
    }
}
