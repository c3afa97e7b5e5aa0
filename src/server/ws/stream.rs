//! Realtime per-frame WebSocket analyzer.
//!
//! One cooperative session per client. Frames are dispatched serially in
//! receive order; a bounded backlog between the socket reader and the
//! dispatcher absorbs bursts and drops oldest frames under overload,
//! signalling `BACKPRESSURE` once per overflow episode. Protocol errors
//! keep the socket open; disconnect aborts in-flight dispatch at the next
//! cooperative point.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::{ErrorKind, ForgeError};
use crate::plugins::ToolInput;
use crate::plugins::registry::PluginRegistry;
use crate::sanitize::decode_image_base64;
use crate::server::ws::manager::{OutboundSender, WsManager};
use crate::state::ForgeState;

/// Client-to-server protocol messages.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Frame {
        #[serde(default)]
        frame_id: Option<String>,
        data: String,
        #[serde(default)]
        tool: Option<String>,
    },
    SwitchPlugin {
        plugin: String,
    },
    Subscribe {
        topic: String,
    },
    Ping,
}

/// Server-to-client protocol messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Connected {
        client_id: String,
        plugin: String,
    },
    Result {
        #[serde(skip_serializing_if = "Option::is_none")]
        frame_id: Option<String>,
        payload: Value,
        processing_time_ms: f64,
    },
    PluginSwitched {
        plugin: String,
    },
    Error {
        kind: String,
        message: String,
    },
    Pong,
}

/// Per-session counters surfaced through diagnostics. Only finite values
/// ever land here.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionStats {
    pub frames_received: u64,
    pub detections_total: u64,
    pub processing_time_ms_sum: f64,
    pub errors: u64,
}

/// A frame waiting for dispatch.
#[derive(Debug, Clone)]
pub struct PendingFrame {
    pub frame_id: Option<String>,
    pub data: String,
    pub tool: Option<String>,
}

/// Bounded drop-oldest frame queue between reader and dispatcher.
#[derive(Debug)]
pub struct Backlog {
    queue: VecDeque<PendingFrame>,
    depth: usize,
    overflow_active: bool,
}

impl Backlog {
    pub fn new(depth: usize) -> Self {
        Self {
            queue: VecDeque::new(),
            depth: depth.max(1),
            overflow_active: false,
        }
    }

    /// Enqueue a frame. Returns `true` when this push started an overflow
    /// episode (the caller emits one BACKPRESSURE error for it).
    pub fn push(&mut self, frame: PendingFrame) -> bool {
        self.queue.push_back(frame);
        if self.queue.len() <= self.depth {
            return false;
        }
        self.queue.pop_front();
        if self.overflow_active {
            false
        } else {
            self.overflow_active = true;
            true
        }
    }

    pub fn pop(&mut self) -> Option<PendingFrame> {
        let frame = self.queue.pop_front();
        if self.queue.is_empty() {
            // Episode ends once the backlog fully drains.
            self.overflow_active = false;
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// One client's analyzer session: active plugin, outbound channel, stats.
pub struct StreamSession {
    pub client_id: String,
    registry: PluginRegistry,
    ws: Arc<WsManager>,
    active_plugin: String,
    out: OutboundSender,
    pub stats: SessionStats,
}

impl StreamSession {
    pub fn new(
        client_id: String,
        registry: PluginRegistry,
        ws: Arc<WsManager>,
        active_plugin: String,
        out: OutboundSender,
    ) -> Self {
        Self {
            client_id,
            registry,
            ws,
            active_plugin,
            out,
            stats: SessionStats::default(),
        }
    }

    pub fn active_plugin(&self) -> &str {
        &self.active_plugin
    }

    pub fn send(&self, msg: &ServerMessage) {
        if let Ok(text) = serde_json::to_string(msg) {
            let _ = self.out.send(text);
        }
    }

    fn send_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.stats.errors += 1;
        self.send(&ServerMessage::Error {
            kind: kind.as_tag().to_string(),
            message: message.into(),
        });
    }

    /// Handle one control message; `Frame` messages are returned for the
    /// backlog instead of being processed inline.
    pub async fn handle_message(&mut self, msg: ClientMessage) -> Option<PendingFrame> {
        match msg {
            ClientMessage::Ping => {
                self.send(&ServerMessage::Pong);
                None
            }
            ClientMessage::Subscribe { topic } => {
                self.ws.subscribe(&self.client_id, &topic);
                None
            }
            ClientMessage::SwitchPlugin { plugin } => {
                // The session stays on the current plugin when the new one
                // is unknown; the socket stays open either way.
                match self.registry.get(&plugin).await {
                    Ok(_) => {
                        self.active_plugin = plugin.clone();
                        self.send(&ServerMessage::PluginSwitched { plugin });
                    }
                    Err(e) => self.send_error(ErrorKind::PluginNotFound, e.message),
                }
                None
            }
            ClientMessage::Frame {
                frame_id,
                data,
                tool,
            } => {
                self.stats.frames_received += 1;
                Some(PendingFrame {
                    frame_id,
                    data,
                    tool,
                })
            }
        }
    }

    /// Decode, dispatch, and answer one frame. Serial per session.
    pub async fn dispatch(&mut self, frame: PendingFrame) {
        let bytes = match decode_image_base64(&frame.data) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.send_error(e.kind, e.message);
                return;
            }
        };

        let entry = match self.registry.get(&self.active_plugin).await {
            Ok(entry) => entry,
            Err(e) => {
                self.send_error(ErrorKind::PluginNotFound, e.message);
                return;
            }
        };

        // Legacy compatibility: a frame without a tool name dispatches to
        // the plugin's first declared tool, with a warning.
        let tool = match frame.tool {
            Some(tool) => tool,
            None => match entry.first_tool() {
                Some(first) => {
                    tracing::warn!(
                        "Client '{}' sent a frame without a tool; using '{}/{}'",
                        self.client_id,
                        self.active_plugin,
                        first
                    );
                    first.to_string()
                }
                None => {
                    self.send_error(
                        ErrorKind::ToolNotFound,
                        format!("plugin '{}' declares no tools", self.active_plugin),
                    );
                    return;
                }
            },
        };

        let mut data = json!({});
        if let Some(frame_id) = &frame.frame_id {
            data["frame_id"] = json!(frame_id);
        }
        let input = ToolInput::with_image(data, bytes);

        let started = Instant::now();
        let plugin = self.active_plugin.clone();
        match self.registry.call(&plugin, &tool, input).await {
            Ok(payload) => {
                let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                if elapsed_ms.is_finite() {
                    self.stats.processing_time_ms_sum += elapsed_ms;
                }
                if let Some(detections) = payload.get("detections").and_then(Value::as_array) {
                    self.stats.detections_total += detections.len() as u64;
                }
                self.send(&ServerMessage::Result {
                    frame_id: frame.frame_id,
                    payload,
                    processing_time_ms: elapsed_ms.max(0.0),
                });
            }
            Err(e) => self.send_error(e.kind, e.message),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub plugin: Option<String>,
}

/// `GET /v1/stream?plugin=<id>` — upgrade into an analyzer session.
pub async fn stream_socket(
    State(state): State<Arc<ForgeState>>,
    Query(query): Query<StreamQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| run_session(state, query.plugin, socket))
}

/// Resolve the plugin a fresh session starts on.
async fn initial_plugin(
    state: &ForgeState,
    requested: Option<String>,
) -> Result<String, ForgeError> {
    let candidate = match requested.or_else(|| state.options().realtime.default_plugin.clone()) {
        Some(name) => name,
        None => state
            .plugin_registry
            .names()
            .await
            .into_iter()
            .next()
            .ok_or_else(|| ForgeError::plugin_not_found("", Vec::new()))?,
    };
    state.plugin_registry.get(&candidate).await?;
    Ok(candidate)
}

async fn run_session(state: Arc<ForgeState>, requested: Option<String>, socket: WebSocket) {
    let (mut sink, mut stream) = socket.split();

    let active_plugin = match initial_plugin(&state, requested).await {
        Ok(plugin) => plugin,
        Err(e) => {
            let frame = json!({ "type": "error", "kind": e.kind.as_tag(), "message": e.message });
            let _ = sink.send(Message::Text(frame.to_string().into())).await;
            let _ = sink.close().await;
            return;
        }
    };

    let client_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    state.ws.connect(&client_id, tx.clone());

    // Writer: one task owns the sink; everything else sends through the
    // channel registered with the manager.
    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    let options = state.options();
    let idle_timeout = Duration::from_secs(options.realtime.idle_timeout_secs.max(1));
    let session = Arc::new(tokio::sync::Mutex::new(StreamSession::new(
        client_id.clone(),
        state.plugin_registry.clone(),
        Arc::clone(&state.ws),
        active_plugin.clone(),
        tx,
    )));

    session.lock().await.send(&ServerMessage::Connected {
        client_id: client_id.clone(),
        plugin: active_plugin,
    });

    let backlog = Arc::new(std::sync::Mutex::new(Backlog::new(
        options.realtime.backlog_depth,
    )));
    let notify = Arc::new(Notify::new());
    let cancel = CancellationToken::new();

    // Dispatcher: pops frames in FIFO order and processes them serially.
    let dispatcher = {
        let session = Arc::clone(&session);
        let backlog = Arc::clone(&backlog);
        let notify = Arc::clone(&notify);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let frame = backlog.lock().unwrap_or_else(|e| e.into_inner()).pop();
                match frame {
                    Some(frame) => {
                        let mut guard = session.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = guard.dispatch(frame) => {}
                        }
                    }
                    None => {
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = notify.notified() => {}
                        }
                    }
                }
            }
        })
    };

    // Reader loop: control messages inline, frames into the backlog.
    loop {
        let received = tokio::time::timeout(idle_timeout, stream.next()).await;
        let message = match received {
            Err(_) => {
                tracing::debug!("Closing idle session '{}'", client_id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(_))) => break,
            Ok(Some(Ok(message))) => message,
        };

        match message {
            Message::Text(text) => {
                let parsed: Result<ClientMessage, _> = serde_json::from_str(text.as_str());
                match parsed {
                    Ok(msg) => {
                        let pending = session.lock().await.handle_message(msg).await;
                        if let Some(frame) = pending {
                            let overflowed = backlog
                                .lock()
                                .unwrap_or_else(|e| e.into_inner())
                                .push(frame);
                            if overflowed {
                                session.lock().await.send_error(
                                    ErrorKind::Backpressure,
                                    "frame backlog overflowed; oldest frames dropped",
                                );
                            }
                            notify.notify_one();
                        }
                    }
                    Err(e) => {
                        session
                            .lock()
                            .await
                            .send_error(ErrorKind::Protocol, format!("invalid message: {}", e));
                    }
                }
            }
            Message::Binary(_) => {
                session
                    .lock()
                    .await
                    .send_error(ErrorKind::Protocol, "binary frames are not supported");
            }
            Message::Close(_) => break,
            // WebSocket-level ping/pong is handled by the transport.
            Message::Ping(_) | Message::Pong(_) => {}
        }
    }

    cancel.cancel();
    notify.notify_one();
    let _ = dispatcher.await;
    state.ws.disconnect(&client_id);
    writer.abort();
}
