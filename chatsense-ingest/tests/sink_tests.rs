//! Durable log integration tests (CSV and SQLite)

mod helpers;

use chatsense_common::config::{SinkKind, SinkSettings};
use chatsense_common::{ChatMessage, SentimentLabel};
use chatsense_ingest::sink::{csv::read_log, open_sink, sqlite::records_for_run, SqliteLogSink};
use helpers::*;
use tempfile::TempDir;
use uuid::Uuid;

#[tokio::test]
async fn test_pipeline_appends_csv_rows() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("logs").join("chat_sentiment.csv");
    let settings = SinkSettings {
        kind: SinkKind::Csv,
        path: path.clone(),
    };

    let sink = open_sink(&settings, Uuid::new_v4()).await.unwrap();
    let pipeline = start_pipeline(test_config(), fixed_classifier("Positive", 0.91), sink);
    pipeline.offer(ChatMessage::new("chan1", "viewer42", "hello world"));
    pipeline.offer(ChatMessage::new("chan1", "viewer42", "!help"));
    pipeline.offer(ChatMessage::new("chan1", "viewer42", "commas, \"quotes\", and all"));
    pipeline.shutdown().await;

    let contents = std::fs::read_to_string(&path).unwrap();
    assert!(contents.starts_with("chan1,hello world,Positive,0.91,"));

    let rows = read_log(&path).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[1].text, "commas, \"quotes\", and all");
    assert_eq!(rows[1].label, SentimentLabel::Positive);
}

#[tokio::test]
async fn test_csv_log_is_appended_across_runs() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("chat_sentiment.csv");
    let settings = SinkSettings {
        kind: SinkKind::Csv,
        path: path.clone(),
    };

    for text in ["first run", "second run"] {
        let sink = open_sink(&settings, Uuid::new_v4()).await.unwrap();
        let pipeline = start_pipeline(test_config(), fixed_classifier("Neutral", 0.6), sink);
        pipeline.offer(ChatMessage::new("chan1", "viewer", text));
        pipeline.shutdown().await;
    }

    let texts: Vec<String> = read_log(&path).unwrap().into_iter().map(|r| r.text).collect();
    assert_eq!(texts, vec!["first run".to_string(), "second run".to_string()]);
}

#[tokio::test]
async fn test_pipeline_writes_sqlite_rows_for_its_run() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("chat_sentiment.db");
    let run_id = Uuid::new_v4();
    let settings = SinkSettings {
        kind: SinkKind::Sqlite,
        path: path.clone(),
    };

    let sink = open_sink(&settings, run_id).await.unwrap();
    let pipeline = start_pipeline(test_config(), fixed_classifier("Negative", 0.8), sink);
    for text in ["so boring", "this is mid", "worst stream"] {
        pipeline.offer(ChatMessage::new("chan1", "viewer", text));
    }
    let report = pipeline.shutdown().await;
    assert_eq!(report.stats.persisted, 3);

    let reader = SqliteLogSink::open(&path, Uuid::new_v4()).await.unwrap();
    let rows = records_for_run(reader.pool(), run_id).await.unwrap();
    let texts: Vec<&str> = rows.iter().map(|r| r.text.as_str()).collect();
    assert_eq!(texts, vec!["so boring", "this is mid", "worst stream"]);
    assert!(rows.iter().all(|r| r.label == SentimentLabel::Negative));
    assert!(reader.records().await.unwrap().is_empty());
}
