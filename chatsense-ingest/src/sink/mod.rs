//! Durable classification log
//!
//! A sink appends one `LogRecord` per result and never rewrites earlier rows.
//! Only the persistence worker holds a sink, so appends are serialized.

pub mod csv;
pub mod sqlite;

pub use self::csv::CsvLogSink;
pub use self::sqlite::SqliteLogSink;

use crate::error::Result;
use async_trait::async_trait;
use chatsense_common::config::{SinkKind, SinkSettings};
use chatsense_common::LogRecord;
use tracing::info;
use uuid::Uuid;

/// Append-only record store
#[async_trait]
pub trait LogSink: Send {
    /// Append one record; an `Ok` return means the row is durable
    async fn append(&mut self, record: &LogRecord) -> Result<()>;

    /// Push buffered data to storage
    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Human-readable location, for logs
    fn describe(&self) -> String;
}

/// Open the sink named by the settings
pub async fn open_sink(settings: &SinkSettings, run_id: Uuid) -> Result<Box<dyn LogSink>> {
    let sink: Box<dyn LogSink> = match settings.kind {
        SinkKind::Csv => Box::new(CsvLogSink::open(&settings.path).await?),
        SinkKind::Sqlite => Box::new(SqliteLogSink::open(&settings.path, run_id).await?),
    };
    info!(run_id = %run_id, "Classification log: {}", sink.describe());
    Ok(sink)
}
