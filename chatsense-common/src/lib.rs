//! # chatsense common library
//!
//! Shared code for the chatsense crates:
//! - Chat event and classification data model
//! - Status events and the broadcast event bus
//! - TOML bootstrap configuration
//! - Common error type

pub mod config;
pub mod error;
pub mod events;
pub mod types;

pub use error::{Error, Result};
pub use types::{
    ChatMessage, ClassificationResult, LogRecord, RawEvent, SentimentLabel, SessionState,
};
