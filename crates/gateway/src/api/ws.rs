//! WebSocket endpoint for the persistent bidirectional client transport.
//!
//! Flow: client connects to `/v1/ws`, sends `{"type":"req", id, method,
//! params}` requests (`chat.send`, `chat.abort`); the gateway replies with
//! a matching `res` frame and fans out the session's event log as `event`
//! frames. Grounded on the donor's node WebSocket loop
//! (`nodes/ws.rs`): split sink/stream, a writer task draining an outbound
//! channel, a reader loop dispatching inbound frames.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use sa_domain::event::Frame;

use crate::state::AppState;

pub async fn chat_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
struct ChatSendParams {
    message: String,
    user_id: String,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    agent_id: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    files: Option<Vec<String>>,
    #[serde(default)]
    #[allow(dead_code)]
    variables: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ChatAbortParams {
    session_id: String,
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(128);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let Ok(json) = serde_json::to_string(&frame) else { continue };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_stream.next().await {
        let Message::Text(text) = msg else {
            if matches!(msg, Message::Close(_)) {
                break;
            }
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Frame>(&text) else {
            tracing::debug!("ignoring unparseable WS frame");
            continue;
        };
        let Frame::Request { id, method, params } = frame else {
            continue;
        };
        dispatch(&state, &outbound_tx, id, method, params).await;
    }

    writer.abort();
}

async fn dispatch(
    state: &AppState,
    outbound_tx: &mpsc::Sender<Frame>,
    id: String,
    method: String,
    params: serde_json::Value,
) {
    match method.as_str() {
        "chat.send" => {
            let parsed: ChatSendParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => {
                    let _ = outbound_tx
                        .send(Frame::Response { id, ok: false, payload: None, error: Some(e.to_string()) })
                        .await;
                    return;
                }
            };
            let conversation_id = parsed.conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            match state.sessions.start(conversation_id, parsed.user_id, parsed.message).await {
                Ok(summary) => {
                    let _ = outbound_tx
                        .send(Frame::Response {
                            id,
                            ok: true,
                            payload: Some(serde_json::json!({ "session_id": summary.session_id })),
                            error: None,
                        })
                        .await;
                    spawn_event_forwarder(state, outbound_tx.clone(), summary.session_id);
                }
                Err(e) => {
                    let _ = outbound_tx
                        .send(Frame::Response { id, ok: false, payload: None, error: Some(e.to_string()) })
                        .await;
                }
            }
        }
        "chat.abort" => {
            let parsed: ChatAbortParams = match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => {
                    let _ = outbound_tx
                        .send(Frame::Response { id, ok: false, payload: None, error: Some(e.to_string()) })
                        .await;
                    return;
                }
            };
            let result = state.sessions.stop(&parsed.session_id).await;
            let _ = outbound_tx
                .send(match result {
                    Ok(()) => Frame::Response { id, ok: true, payload: None, error: None },
                    Err(e) => Frame::Response { id, ok: false, payload: None, error: Some(e.to_string()) },
                })
                .await;
        }
        other => {
            let _ = outbound_tx
                .send(Frame::Response {
                    id,
                    ok: false,
                    payload: None,
                    error: Some(format!("unknown method \"{other}\"")),
                })
                .await;
        }
    }
}

/// Fan the session's event log out onto this connection's outbound channel
/// until the session ends or the connection's writer hangs up.
fn spawn_event_forwarder(state: &AppState, outbound_tx: mpsc::Sender<Frame>, session_id: String) {
    let Some(sub) = state.sessions.subscribe(&session_id, None) else { return };
    tokio::spawn(async move {
        let mut rx = sub.receiver;
        while let Some(ev) = rx.recv().await {
            let seq = ev.seq;
            let event_type = ev.event_type;
            let payload = match serde_json::to_value(&ev) {
                Ok(v) => v,
                Err(_) => continue,
            };
            if outbound_tx
                .send(Frame::Event { event: event_type, payload, seq })
                .await
                .is_err()
            {
                break;
            }
        }
    });
}
