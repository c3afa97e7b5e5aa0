//! Job progress WebSocket channel.
//!
//! Binds one socket to topic `job:{job_id}`: progress events published by
//! the worker reach the client as JSON messages; the client keeps the
//! connection warm with `{"type":"ping"}`. The server is stateless across
//! reconnects — a client that drops simply re-opens and re-subscribes.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::jobs::job_topic;
use crate::state::ForgeState;

/// `GET /ws/jobs/{job_id}` — upgrade into a progress subscription.
pub async fn job_progress_socket(
    State(state): State<Arc<ForgeState>>,
    Path(job_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_channel(state, job_id, socket))
}

async fn run_channel(state: Arc<ForgeState>, job_id: String, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();
    let client_id = format!("job-watch-{}", Uuid::new_v4());
    let topic = job_topic(&job_id);

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.ws.connect(&client_id, tx);
    state.ws.subscribe(&client_id, &topic);
    tracing::debug!("Client '{}' watching topic '{}'", client_id, topic);

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => {
                let is_ping = serde_json::from_str::<serde_json::Value>(text.as_str())
                    .ok()
                    .and_then(|v| v.get("type").and_then(|t| t.as_str().map(String::from)))
                    .is_some_and(|t| t == "ping");
                if is_ping {
                    state.ws.send(&client_id, &json!({ "type": "pong" }));
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.ws.unsubscribe(&client_id, &topic);
    state.ws.disconnect(&client_id);
    writer.abort();
}
