//! Server-Sent Events (SSE) utilities
//!
//! Shared SSE helpers for VFD services: JSON event encoding and the
//! standard keep-alive policy.

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::time::Duration;
use tracing::warn;

/// Heartbeat interval used by every SSE endpoint
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Encode a payload as a named SSE event carrying JSON data
///
/// Returns `None` (and logs) if the payload cannot be serialized, so a
/// single bad event never tears down the stream.
pub fn json_event<T: Serialize>(event_type: &str, payload: &T) -> Option<Event> {
    match serde_json::to_string(payload) {
        Ok(json) => Some(Event::default().event(event_type).data(json)),
        Err(e) => {
            warn!("SSE: Failed to serialize event {}: {}", event_type, e);
            None
        }
    }
}

/// Wrap an event stream with the standard heartbeat keep-alive
pub fn with_heartbeat<S>(stream: S) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(HEARTBEAT_INTERVAL)
            .text("heartbeat"),
    )
}
