//! Progress streaming over SSE and WebSocket
//!
//! Both transports carry the same [`ProgressEvent`] JSON. SSE serves one job
//! per connection; the WebSocket multiplexes jobs through
//! `{"type": "subscribe" | "unsubscribe", "analysis_id": ...}` messages.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::{sse::Event, IntoResponse, Sse},
    routing::get,
    Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vfd_common::sse::{json_event, with_heartbeat};

use crate::error::ApiResult;
use crate::models::AnalysisId;
use crate::workflow::JobCoordinator;
use crate::AppState;

/// Outgoing messages buffered per WebSocket connection
const OUTBOX_CAPACITY: usize = 128;

/// GET /progress/{analysis_id}/events
///
/// Replays the latest event, then streams live ones; the stream closes
/// after the terminal `complete` or `error` event.
pub async fn progress_events(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>> + Send + 'static>> {
    let id = AnalysisId::parse(&raw_id)?;
    info!(analysis_id = %id, "SSE progress client connected");

    let events = state
        .coordinator
        .subscribe(&id)
        .await
        .into_stream()
        .filter_map(|event| async move {
            json_event(event.event_type(), &event).map(Ok::<_, Infallible>)
        });

    Ok(with_heartbeat(events))
}

/// Client → server WebSocket message
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe { analysis_id: String },
    Unsubscribe { analysis_id: String },
    Ping,
}

/// Server → client control replies (progress events are sent as is)
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ControlMessage {
    Subscribed { analysis_id: String },
    Unsubscribed { analysis_id: String },
    Pong,
    /// Malformed or unsupported client message
    InvalidMessage { message: String },
}

impl ControlMessage {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!("Failed to encode control message: {}", e);
            r#"{"type":"invalid_message","message":"internal encoding error"}"#.to_string()
        })
    }
}

/// Subscriptions of one WebSocket connection
struct WsSession {
    coordinator: Arc<JobCoordinator>,
    outbox: mpsc::Sender<String>,
    forwarders: HashMap<AnalysisId, JoinHandle<()>>,
}

impl WsSession {
    fn new(coordinator: Arc<JobCoordinator>, outbox: mpsc::Sender<String>) -> Self {
        Self {
            coordinator,
            outbox,
            forwarders: HashMap::new(),
        }
    }

    /// Handle one text frame, returning the control reply
    async fn handle(&mut self, text: &str) -> ControlMessage {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                return ControlMessage::InvalidMessage {
                    message: format!("unrecognised message: {}", e),
                }
            }
        };

        match message {
            ClientMessage::Subscribe { analysis_id } => match AnalysisId::parse(&analysis_id) {
                Ok(id) => {
                    self.subscribe(id).await;
                    ControlMessage::Subscribed { analysis_id }
                }
                Err(e) => ControlMessage::InvalidMessage {
                    message: e.to_string(),
                },
            },
            ClientMessage::Unsubscribe { analysis_id } => {
                if let Ok(id) = AnalysisId::parse(&analysis_id) {
                    if let Some(forwarder) = self.forwarders.remove(&id) {
                        forwarder.abort();
                    }
                }
                ControlMessage::Unsubscribed { analysis_id }
            }
            ClientMessage::Ping => ControlMessage::Pong,
        }
    }

    /// Forward one job's events into the outbox until its terminal event
    async fn subscribe(&mut self, id: AnalysisId) {
        let events = self.coordinator.subscribe(&id).await.into_stream();
        let outbox = self.outbox.clone();
        let job = id.clone();
        let forwarder = tokio::spawn(async move {
            futures::pin_mut!(events);
            while let Some(event) = events.next().await {
                let json = match serde_json::to_string(&event) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!(analysis_id = %job, "Failed to encode progress event: {}", e);
                        continue;
                    }
                };
                if outbox.send(json).await.is_err() {
                    break;
                }
            }
            debug!(analysis_id = %job, "WebSocket forwarder finished");
        });

        // re-subscribing replaces the previous forwarder
        if let Some(previous) = self.forwarders.insert(id, forwarder) {
            previous.abort();
        }
    }

    fn close(self) {
        for (_, forwarder) in self.forwarders {
            forwarder.abort();
        }
    }
}

/// GET /ws
pub async fn progress_socket(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, state.coordinator.clone()))
}

async fn serve_socket(mut socket: WebSocket, coordinator: Arc<JobCoordinator>) {
    info!("WebSocket progress client connected");
    let (outbox, mut pending) = mpsc::channel::<String>(OUTBOX_CAPACITY);
    let mut session = WsSession::new(coordinator, outbox);

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let reply = session.handle(&text).await.to_json();
                    if socket.send(Message::Text(reply)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let reply = ControlMessage::InvalidMessage {
                        message: "binary frames are not supported".to_string(),
                    };
                    if socket.send(Message::Text(reply.to_json())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("WebSocket receive error: {}", e);
                    break;
                }
            },
            Some(json) = pending.recv() => {
                if socket.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    }

    session.close();
    info!("WebSocket progress client disconnected");
}

/// Build progress streaming routes
pub fn progress_routes() -> Router<AppState> {
    Router::new()
        .route("/progress/:analysis_id/events", get(progress_events))
        .route("/ws", get(progress_socket))
}
