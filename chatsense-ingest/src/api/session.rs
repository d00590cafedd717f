//! Session control endpoints
//!
//! - `GET  /status`          session and pipeline snapshot
//! - `POST /session/join`    `{"source_id": "..."}`; 200 when joined, 202 when queued behind a leave
//! - `POST /session/leave`   leave and wait for the drain
//! - `POST /session/switch`  `{"source_id": "..."}`; leave the current channel, then join

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ApiResult;
use crate::pipeline::PipelineSnapshot;
use crate::session::{JoinOutcome, LeaveReport, SessionSnapshot};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct JoinRequest {
    pub source_id: String,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    pub source_id: String,
    /// `true` when the join waits for a leave in progress
    pub queued: bool,
    pub session: SessionSnapshot,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session: SessionSnapshot,
    pub pipeline: PipelineSnapshot,
}

/// GET /status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        session: state.session.snapshot(),
        pipeline: state.session.pipeline().snapshot(),
    })
}

fn join_response(state: &AppState, outcome: JoinOutcome) -> (StatusCode, Json<JoinResponse>) {
    let (status, source_id, queued) = match outcome {
        JoinOutcome::Joined { source_id } => (StatusCode::OK, source_id, false),
        // The queued join completes in the background
        JoinOutcome::Queued(pending) => {
            (StatusCode::ACCEPTED, pending.source_id().to_string(), true)
        }
    };

    (
        status,
        Json(JoinResponse {
            source_id,
            queued,
            session: state.session.snapshot(),
        }),
    )
}

/// POST /session/join
pub async fn join_session(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<(StatusCode, Json<JoinResponse>)> {
    info!(source_id = %request.source_id, "Join requested via API");
    let outcome = state.session.request_join(&request.source_id).await?;
    Ok(join_response(&state, outcome))
}

/// POST /session/leave
pub async fn leave_session(State(state): State<AppState>) -> ApiResult<Json<LeaveReport>> {
    info!("Leave requested via API");
    let report = state.session.request_leave().await?;
    Ok(Json(report))
}

/// POST /session/switch
pub async fn switch_session(
    State(state): State<AppState>,
    Json(request): Json<JoinRequest>,
) -> ApiResult<(StatusCode, Json<JoinResponse>)> {
    info!(source_id = %request.source_id, "Switch requested via API");
    let outcome = state.session.switch_to(&request.source_id).await?;
    Ok(join_response(&state, outcome))
}

/// Build session routes
pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(get_status))
        .route("/session/join", post(join_session))
        .route("/session/leave", post(leave_session))
        .route("/session/switch", post(switch_session))
}
