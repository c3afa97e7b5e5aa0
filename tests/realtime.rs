mod common;

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use forgesyte::sanitize::encode_image_base64;
use forgesyte::server::ws::stream::{Backlog, ClientMessage, PendingFrame, StreamSession};
use forgesyte::state::ForgeState;

fn parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap()
}

async fn session(state: &Arc<ForgeState>) -> (StreamSession, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = StreamSession::new(
        "client-1".to_string(),
        state.plugin_registry.clone(),
        Arc::clone(&state.ws),
        "frame-probe".to_string(),
        tx,
    );
    (session, rx)
}

fn frame_message(frame_id: &str, jpeg: &[u8], tool: Option<&str>) -> ClientMessage {
    serde_json::from_value(serde_json::json!({
        "type": "frame",
        "frame_id": frame_id,
        "data": encode_image_base64(jpeg),
        "tool": tool,
    }))
    .unwrap()
}

#[test]
fn protocol_messages_parse_by_tag() {
    assert!(matches!(
        serde_json::from_str::<ClientMessage>(r#"{"type":"ping"}"#).unwrap(),
        ClientMessage::Ping
    ));
    assert!(matches!(
        serde_json::from_str::<ClientMessage>(r#"{"type":"switch_plugin","plugin":"motion"}"#)
            .unwrap(),
        ClientMessage::SwitchPlugin { .. }
    ));
    // Raw non-JSON text and unknown tags are protocol errors.
    assert!(serde_json::from_str::<ClientMessage>("hello there").is_err());
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"mystery"}"#).is_err());
    // A frame without data is structurally invalid.
    assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"frame"}"#).is_err());
}

#[tokio::test]
async fn ping_answers_pong() {
    let state = common::state_with_builtins().await;
    let (mut session, mut rx) = session(&state).await;
    let pending = session.handle_message(ClientMessage::Ping).await;
    assert!(pending.is_none());
    assert_eq!(parse(&rx.recv().await.unwrap())["type"], "pong");
}

#[tokio::test]
/// Switching to an unknown plugin errors without losing the session's
/// current plugin.
async fn switch_plugin_validates_the_target() {
    let state = common::state_with_builtins().await;
    let (mut session, mut rx) = session(&state).await;

    session
        .handle_message(ClientMessage::SwitchPlugin {
            plugin: "motion".to_string(),
        })
        .await;
    let ok = parse(&rx.recv().await.unwrap());
    assert_eq!(ok["type"], "plugin_switched");
    assert_eq!(session.active_plugin(), "motion");

    session
        .handle_message(ClientMessage::SwitchPlugin {
            plugin: "ghost".to_string(),
        })
        .await;
    let err = parse(&rx.recv().await.unwrap());
    assert_eq!(err["type"], "error");
    assert_eq!(err["kind"], "PLUGIN_NOT_FOUND");
    assert_eq!(session.active_plugin(), "motion");
    assert_eq!(session.stats.errors, 1);
}

#[tokio::test]
/// Frames dispatch serially and responses keep the receive order.
async fn responses_preserve_frame_order() {
    let state = common::state_with_builtins().await;
    let (mut session, mut rx) = session(&state).await;

    for (i, level) in [40u8, 120, 220].iter().enumerate() {
        let msg = frame_message(&format!("f{}", i), &common::tiny_jpeg(*level, 8), Some("probe"));
        let pending = session.handle_message(msg).await.expect("frame queued");
        session.dispatch(pending).await;
    }

    for i in 0..3 {
        let reply = parse(&rx.recv().await.unwrap());
        assert_eq!(reply["type"], "result", "reply {}: {:?}", i, reply);
        assert_eq!(reply["frame_id"], format!("f{}", i));
        assert!(reply["processing_time_ms"].as_f64().unwrap() >= 0.0);
        assert!(reply["payload"]["luma"]["mean"].is_number());
    }
    assert_eq!(session.stats.frames_received, 3);
    assert!(session.stats.processing_time_ms_sum.is_finite());
}

#[tokio::test]
/// A frame without a tool falls back to the first declared tool of the
/// active plugin (the documented legacy path).
async fn missing_tool_uses_first_declared_tool() {
    let state = common::state_with_builtins().await;
    let (mut session, mut rx) = session(&state).await;

    let msg = frame_message("f0", &common::tiny_jpeg(77, 8), None);
    let pending = session.handle_message(msg).await.unwrap();
    session.dispatch(pending).await;

    let reply = parse(&rx.recv().await.unwrap());
    assert_eq!(reply["type"], "result");
    // frame-probe declares "probe" first; its output carries dimensions.
    assert_eq!(reply["payload"]["width"], 8);
}

#[tokio::test]
/// Bad base64 data errors without closing anything; the next frame works.
async fn invalid_frame_data_is_recoverable() {
    let state = common::state_with_builtins().await;
    let (mut session, mut rx) = session(&state).await;

    let bad = PendingFrame {
        frame_id: Some("bad".to_string()),
        data: "!!!not-base64!!!".to_string(),
        tool: Some("probe".to_string()),
    };
    session.dispatch(bad).await;
    let err = parse(&rx.recv().await.unwrap());
    assert_eq!(err["type"], "error");
    assert_eq!(err["kind"], "INVALID_INPUT");

    let good = session
        .handle_message(frame_message("ok", &common::tiny_jpeg(50, 8), Some("probe")))
        .await
        .unwrap();
    session.dispatch(good).await;
    assert_eq!(parse(&rx.recv().await.unwrap())["type"], "result");
    assert_eq!(session.stats.errors, 1);
}

#[test]
/// The backlog drops oldest frames beyond its depth and signals one
/// BACKPRESSURE per overflow episode.
fn backlog_drops_oldest_once_per_episode() {
    let mut backlog = Backlog::new(2);
    let frame = |id: &str| PendingFrame {
        frame_id: Some(id.to_string()),
        data: String::new(),
        tool: None,
    };

    assert!(!backlog.push(frame("a")));
    assert!(!backlog.push(frame("b")));
    // Third frame overflows: "a" is dropped and the episode starts.
    assert!(backlog.push(frame("c")));
    // Still the same episode: no second signal.
    assert!(!backlog.push(frame("d")));
    assert_eq!(backlog.len(), 2);

    assert_eq!(backlog.pop().unwrap().frame_id.as_deref(), Some("c"));
    assert_eq!(backlog.pop().unwrap().frame_id.as_deref(), Some("d"));
    assert!(backlog.pop().is_none());

    // Drained: a new overflow is a new episode.
    assert!(!backlog.push(frame("e")));
    assert!(!backlog.push(frame("f")));
    assert!(backlog.push(frame("g")));
}

#[tokio::test]
/// Session subscriptions reach the shared topic registry.
async fn subscribe_joins_topics() {
    let state = common::state_with_builtins().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.ws.connect("client-1", tx);
    let (mut session, _session_rx) = session(&state).await;

    session
        .handle_message(ClientMessage::Subscribe {
            topic: "job:abc".to_string(),
        })
        .await;
    assert_eq!(state.ws.subscriber_count("job:abc"), 1);

    state
        .ws
        .broadcast("job:abc", &serde_json::json!({ "current_frame": 1 }));
    let event = parse(&rx.recv().await.unwrap());
    assert_eq!(event["current_frame"], 1);
}
