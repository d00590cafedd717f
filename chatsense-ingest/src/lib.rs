//! chatsense-ingest: live chat sentiment ingestion
//!
//! Subscribes to one chat channel at a time, filters out automation and
//! command traffic, classifies each remaining message, and appends every
//! result to a durable log.

pub mod api;
pub mod classifier;
pub mod console;
pub mod error;
pub mod filter;
pub mod pipeline;
pub mod session;
pub mod sink;
pub mod source;

pub use error::{ApiError, ApiResult, Error, Result};
pub use pipeline::{Admission, Pipeline, PipelineConfig, PipelineSnapshot, ShutdownReport};
pub use session::{JoinOutcome, LeaveReport, SessionConfig, SessionManager, SessionSnapshot};

use axum::Router;
use chatsense_common::events::EventBus;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Channel session (and through it, the pipeline)
    pub session: SessionManager,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Identifier of this run
    pub run_id: Uuid,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(session: SessionManager, run_id: Uuid) -> Self {
        let event_bus = session.pipeline().events().clone();
        Self {
            session,
            event_bus,
            run_id,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::session_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
}
