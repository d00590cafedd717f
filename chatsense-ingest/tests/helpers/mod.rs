//! Test helper modules for chatsense-ingest integration tests
//!
//! Provides scripted stand-ins for the collaborators at the pipeline's seams:
//! - ScriptedSource: event source with controllable join behavior
//! - Classifiers: fixed, slow, failing, and panicking
//! - Sinks: in-memory and flaky log sinks

#![allow(dead_code)]

pub mod classifiers;
pub mod scripted_source;
pub mod sinks;

pub use classifiers::{fixed_classifier, FailOn, PanicOn, SlowClassifier};
pub use scripted_source::{JoinBehavior, ScriptedSource};
pub use sinks::{FlakySink, MemorySink};

use chatsense_common::events::EventBus;
use chatsense_ingest::classifier::Classifier;
use chatsense_ingest::filter::EventFilter;
use chatsense_ingest::sink::LogSink;
use chatsense_ingest::{Pipeline, PipelineConfig};
use std::sync::Arc;
use std::time::Duration;

/// Pipeline config with short retry backoff and grace, suited to tests
pub fn test_config() -> PipelineConfig {
    PipelineConfig {
        retry_backoff: Duration::from_millis(1),
        shutdown_grace: Duration::from_secs(5),
        ..PipelineConfig::default()
    }
}

/// Start a pipeline with the default filter
pub fn start_pipeline(
    config: PipelineConfig,
    classifier: Arc<dyn Classifier>,
    sink: Box<dyn LogSink>,
) -> Arc<Pipeline> {
    Arc::new(Pipeline::start(
        config,
        EventFilter::default(),
        classifier,
        sink,
        EventBus::new(256),
    ))
}

/// Poll `condition` until it holds or `timeout` expires
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
