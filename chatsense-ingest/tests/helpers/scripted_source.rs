//! Event source with scripted join behavior

use async_trait::async_trait;
use chatsense_common::ChatMessage;
use chatsense_ingest::source::{ChatSource, MessageHandler};
use chatsense_ingest::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum JoinBehavior {
    /// Join completes after the delay
    Succeed(Duration),
    /// Join never completes
    Hang,
    /// Join fails with the reason
    Reject(String),
}

/// Event source driven by the test
///
/// Channels join immediately unless scripted otherwise. Messages are pushed
/// with `emit`, which calls the registered handler synchronously.
#[derive(Default)]
pub struct ScriptedSource {
    handler: Mutex<Option<MessageHandler>>,
    behaviors: Mutex<HashMap<String, JoinBehavior>>,
    joins: Mutex<Vec<String>>,
    leaves: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, channel: &str, behavior: JoinBehavior) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(channel.to_string(), behavior);
        self
    }

    /// Deliver a message as the live source would
    pub fn emit(&self, channel: &str, author: &str, text: &str) {
        let handler = self.handler.lock().unwrap().clone();
        if let Some(handler) = handler {
            handler(ChatMessage::new(channel, author, text));
        }
    }

    pub fn joins(&self) -> Vec<String> {
        self.joins.lock().unwrap().clone()
    }

    pub fn leaves(&self) -> Vec<String> {
        self.leaves.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSource for ScriptedSource {
    async fn connect(&self, handler: MessageHandler) -> Result<()> {
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    async fn join(&self, source_id: &str) -> Result<()> {
        self.joins.lock().unwrap().push(source_id.to_string());
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(source_id)
            .cloned()
            .unwrap_or(JoinBehavior::Succeed(Duration::ZERO));

        match behavior {
            JoinBehavior::Succeed(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            JoinBehavior::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
            JoinBehavior::Reject(reason) => Err(Error::Source(reason)),
        }
    }

    async fn leave(&self, source_id: &str) -> Result<()> {
        self.leaves.lock().unwrap().push(source_id.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
