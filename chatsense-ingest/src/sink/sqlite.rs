//! SQLite classification log
//!
//! Rows go to an append-only `classification_log` table, tagged with the run
//! that wrote them. Each `append` is a single autocommitted INSERT.

use super::LogSink;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chatsense_common::{LogRecord, SentimentLabel};
use chrono::Utc;
use sqlx::SqlitePool;
use std::path::Path;
use uuid::Uuid;

pub struct SqliteLogSink {
    pool: SqlitePool,
    run_id: Uuid,
    location: String,
}

impl SqliteLogSink {
    /// Open (creating if needed) the database at `path`
    pub async fn open(path: &Path, run_id: Uuid) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // mode=rwc: read, write, create
        let db_url = format!("sqlite://{}?mode=rwc", path.display());
        tracing::debug!("Connecting to classification log: {}", db_url);

        let pool = SqlitePool::connect(&db_url).await?;
        Self::with_pool(pool, run_id, format!("sqlite:{}", path.display())).await
    }

    /// Use an existing pool; creates the table if missing
    pub async fn with_pool(pool: SqlitePool, run_id: Uuid, location: String) -> Result<Self> {
        init_tables(&pool).await?;
        Ok(Self {
            pool,
            run_id,
            location,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Records written by this run, in insertion order
    pub async fn records(&self) -> Result<Vec<LogRecord>> {
        records_for_run(&self.pool, self.run_id).await
    }
}

async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS classification_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            text TEXT NOT NULL,
            label TEXT NOT NULL,
            score REAL NOT NULL,
            latency_ms REAL NOT NULL,
            recorded_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_classification_log_run ON classification_log(run_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Read back the rows one run wrote
pub async fn records_for_run(pool: &SqlitePool, run_id: Uuid) -> Result<Vec<LogRecord>> {
    let rows: Vec<(String, String, String, f64, f64)> = sqlx::query_as(
        r#"
        SELECT source_id, text, label, score, latency_ms
        FROM classification_log
        WHERE run_id = ?
        ORDER BY id
        "#,
    )
    .bind(run_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|(source_id, text, label, score, latency_ms)| {
            let label = label
                .parse::<SentimentLabel>()
                .map_err(|e| Error::Persistence(format!("Bad label in log: {}", e)))?;
            Ok(LogRecord {
                source_id,
                text,
                label,
                score,
                latency_ms,
            })
        })
        .collect()
}

#[async_trait]
impl LogSink for SqliteLogSink {
    async fn append(&mut self, record: &LogRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO classification_log
                (run_id, source_id, text, label, score, latency_ms, recorded_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(self.run_id.to_string())
        .bind(&record.source_id)
        .bind(&record.text)
        .bind(record.label.as_str())
        .bind(record.score)
        .bind(record.latency_ms)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn describe(&self) -> String {
        self.location.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_runs_are_kept_apart() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("log.db");

        let first_run = Uuid::new_v4();
        let mut first = SqliteLogSink::open(&path, first_run).await.unwrap();
        first
            .append(&LogRecord {
                source_id: "chan1".into(),
                text: "gg".into(),
                label: SentimentLabel::Positive,
                score: 0.7,
                latency_ms: 3.0,
            })
            .await
            .unwrap();

        let mut second = SqliteLogSink::open(&path, Uuid::new_v4()).await.unwrap();
        second
            .append(&LogRecord {
                source_id: "chan2".into(),
                text: "boring".into(),
                label: SentimentLabel::Negative,
                score: 0.6,
                latency_ms: 4.0,
            })
            .await
            .unwrap();

        let rows = first.records().await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "gg");
        assert_eq!(second.records().await.unwrap()[0].label, SentimentLabel::Negative);
    }
}
