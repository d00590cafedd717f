//! Server-Sent Events stream of status events

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

/// GET /events
///
/// Streams every `ChatsenseEvent` as JSON, with the variant name as the SSE
/// event type. Clients that fall behind skip the events they missed.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_value(&event) {
                    Ok(value) => {
                        let event_type = value["type"].as_str().unwrap_or("event").to_string();
                        debug!("SSE: Broadcasting {}", event_type);
                        yield Ok(Event::default().event(event_type).data(value.to_string()));
                    }
                    Err(e) => warn!("SSE: Failed to serialize event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE client lagging, events skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
