//! `POST /chat` — start a session and stream its event log back as SSE.
//!
//! Same params as the WS `chat.send` method (see [`crate::api::ws`]); the
//! response carries the same event envelopes, one per `data:` line,
//! terminated by an `event: done` frame.

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::stream::Stream;
use serde::Deserialize;

use sa_domain::event::EventType;

use crate::api::envelope::from_core_error;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Response {
    let conversation_id = body.conversation_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let summary = match state.sessions.start(conversation_id, body.user_id, body.message).await {
        Ok(s) => s,
        Err(e) => return from_core_error(e),
    };

    let sub = match state.sessions.subscribe(&summary.session_id, None) {
        Some(s) => s,
        None => return from_core_error(sa_domain::error::Error::SessionNotFound(summary.session_id)),
    };

    let stream = async_stream::stream! {
        let mut rx = sub.receiver;
        while let Some(ev) = rx.recv().await {
            let done = ev.event_type == EventType::Done;
            yield Ok::<_, std::convert::Infallible>(
                SseEvent::default().json_data(&ev).unwrap_or_else(|_| SseEvent::default()),
            );
            if done {
                break;
            }
        }
    };

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<SseEvent, std::convert::Infallible>> + Send>> =
        Box::pin(stream);

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
