//! Chat capture replay
//!
//! Plays back a recorded chat capture as if it were live. The capture is a
//! headerless CSV file with `channel,text` or `channel,author,text` rows.
//! Joining a channel that does not appear in the capture never completes,
//! which is how an unreachable channel behaves on a live chat service.

use super::{ChatSource, MessageHandler};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chatsense_common::ChatMessage;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Author recorded for two-column capture rows
const UNKNOWN_AUTHOR: &str = "viewer";

pub struct ReplaySource {
    channels: HashMap<String, Arc<Vec<ChatMessage>>>,
    interval: Duration,
    repeat: bool,
    handler: Mutex<Option<MessageHandler>>,
    playing: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl ReplaySource {
    /// Load a capture file
    pub fn load(path: &Path, interval: Duration, repeat: bool) -> Result<Self> {
        let mut reader = ::csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)?;

        let mut messages = Vec::new();
        for (line, row) in reader.records().enumerate() {
            let row = row?;
            let message = match row.len() {
                2 => ChatMessage::new(&row[0], UNKNOWN_AUTHOR, &row[1]),
                3 => ChatMessage::new(&row[0], &row[1], &row[2]),
                n => {
                    warn!(line = line + 1, fields = n, "Skipping capture row with unexpected shape");
                    continue;
                }
            };
            messages.push(message);
        }

        info!(
            path = %path.display(),
            messages = messages.len(),
            "Loaded chat capture"
        );
        Ok(Self::from_messages(messages, interval, repeat))
    }

    /// Build from in-memory messages; channel names are matched case-insensitively
    pub fn from_messages(messages: Vec<ChatMessage>, interval: Duration, repeat: bool) -> Self {
        let mut grouped: HashMap<String, Vec<ChatMessage>> = HashMap::new();
        for message in messages {
            let channel = message.source_id.trim().to_lowercase();
            grouped.entry(channel).or_default().push(message);
        }

        Self {
            channels: grouped
                .into_iter()
                .map(|(channel, messages)| (channel, Arc::new(messages)))
                .collect(),
            interval,
            repeat,
            handler: Mutex::new(None),
            playing: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Channels present in the capture
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Channels currently being played back
    pub fn playing(&self) -> Vec<String> {
        let mut names: Vec<String> = self.playing_lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stop every playback task
    pub fn close(&self) {
        self.shutdown.cancel();
        self.playing_lock().clear();
    }

    fn playing_lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.playing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_handler(&self) -> Option<MessageHandler> {
        self.handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

async fn play(
    channel: String,
    messages: Arc<Vec<ChatMessage>>,
    handler: MessageHandler,
    interval: Duration,
    repeat: bool,
    cancel: CancellationToken,
) {
    debug!(%channel, "Replay started");

    'outer: loop {
        for message in messages.iter() {
            tokio::select! {
                _ = cancel.cancelled() => break 'outer,
                _ = tokio::time::sleep(interval) => handler(message.clone()),
            }
        }
        if !repeat {
            break;
        }
    }

    debug!(%channel, "Replay stopped");
}

#[async_trait]
impl ChatSource for ReplaySource {
    async fn connect(&self, handler: MessageHandler) -> Result<()> {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
        Ok(())
    }

    async fn join(&self, source_id: &str) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Source("replay source closed".to_string()));
        }

        let channel = source_id.trim().to_lowercase();
        let Some(messages) = self.channels.get(&channel).cloned() else {
            debug!(%channel, "Channel not in capture, join will not complete");
            std::future::pending::<()>().await;
            return Ok(());
        };

        let handler = self
            .current_handler()
            .ok_or_else(|| Error::Source("join before connect".to_string()))?;

        let cancel = self.shutdown.child_token();
        if let Some(previous) = self.playing_lock().insert(channel.clone(), cancel.clone()) {
            previous.cancel();
        }

        tokio::spawn(play(
            channel,
            messages,
            handler,
            self.interval,
            self.repeat,
            cancel,
        ));
        Ok(())
    }

    async fn leave(&self, source_id: &str) -> Result<()> {
        let channel = source_id.trim().to_lowercase();
        if let Some(cancel) = self.playing_lock().remove(&channel) {
            cancel.cancel();
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "replay"
    }
}
