//! CSV classification log
//!
//! Rows are `source_id,text,label,score,latency_ms` with no header line. The
//! file is opened in append mode, so earlier runs are never overwritten, and
//! every row is flushed before `append` returns.

use super::LogSink;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chatsense_common::LogRecord;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;

pub struct CsvLogSink {
    path: PathBuf,
    file: File,
}

impl CsvLogSink {
    /// Open (creating if needed) the log file for appending
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Encode one record as a CSV line (quoted as needed, newline-terminated)
pub fn encode_row(record: &LogRecord) -> Result<Vec<u8>> {
    let mut writer = ::csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.serialize(record)?;
    writer
        .into_inner()
        .map_err(|e| Error::Persistence(format!("CSV buffer: {}", e)))
}

/// Read back every row of a CSV log
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>> {
    let mut reader = ::csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(path)?;

    let mut records = Vec::new();
    for row in reader.deserialize() {
        records.push(row?);
    }
    Ok(records)
}

#[async_trait]
impl LogSink for CsvLogSink {
    async fn append(&mut self, record: &LogRecord) -> Result<()> {
        let row = encode_row(record)?;
        self.file.write_all(&row).await?;
        self.file.flush().await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("csv:{}", self.path.display())
    }
}
