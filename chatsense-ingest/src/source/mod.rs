//! Chat event source seam
//!
//! A source delivers messages through a callback registered once with
//! `connect`, and subscribes to channels with `join`/`leave`. The session
//! manager bounds `join` with its own timeout, so a source may leave a join
//! for a channel it cannot reach pending forever.

pub mod replay;

pub use replay::ReplaySource;

use crate::error::Result;
use async_trait::async_trait;
use chatsense_common::ChatMessage;
use std::sync::Arc;

/// Delivery callback; must not block
pub type MessageHandler = Arc<dyn Fn(ChatMessage) + Send + Sync>;

#[async_trait]
pub trait ChatSource: Send + Sync {
    /// Register the delivery callback; replaces any earlier one
    async fn connect(&self, handler: MessageHandler) -> Result<()>;

    /// Subscribe to a channel; completes once messages will flow
    async fn join(&self, source_id: &str) -> Result<()>;

    /// Unsubscribe from a channel
    async fn leave(&self, source_id: &str) -> Result<()>;

    /// Name used in logs
    fn name(&self) -> &str;
}
