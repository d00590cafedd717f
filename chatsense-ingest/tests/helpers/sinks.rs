//! Log sink doubles

use async_trait::async_trait;
use chatsense_common::LogRecord;
use chatsense_ingest::sink::LogSink;
use chatsense_ingest::{Error, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Keeps records in memory; clones share the same storage
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<LogRecord>>>,
    write_delay: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Each append takes `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            records: Arc::default(),
            write_delay: Some(delay),
        }
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn texts(&self) -> Vec<String> {
        self.records().into_iter().map(|r| r.text).collect()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    async fn append(&mut self, record: &LogRecord) -> Result<()> {
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Fails appends whose text is listed (always) or the first `transient` appends
#[derive(Clone, Default)]
pub struct FlakySink {
    pub inner: MemorySink,
    transient: Arc<Mutex<u32>>,
    always_fail: Arc<Vec<String>>,
    attempts: Arc<Mutex<u32>>,
}

impl FlakySink {
    /// First `failures` appends fail, later ones succeed
    pub fn failing_first(failures: u32) -> Self {
        Self {
            transient: Arc::new(Mutex::new(failures)),
            ..Self::default()
        }
    }

    /// Appends of these texts never succeed
    pub fn rejecting(texts: &[&str]) -> Self {
        Self {
            always_fail: Arc::new(texts.iter().map(|t| t.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        *self.attempts.lock().unwrap()
    }
}

#[async_trait]
impl LogSink for FlakySink {
    async fn append(&mut self, record: &LogRecord) -> Result<()> {
        *self.attempts.lock().unwrap() += 1;

        if self.always_fail.contains(&record.text) {
            return Err(Error::Persistence("disk full".to_string()));
        }

        {
            let mut transient = self.transient.lock().unwrap();
            if *transient > 0 {
                *transient -= 1;
                return Err(Error::Persistence("temporarily unavailable".to_string()));
            }
        }

        self.inner.append(record).await
    }

    fn describe(&self) -> String {
        "flaky".to_string()
    }
}
