//! The `{ code, message, data }` response wrapper every HTTP handler in
//! §6.2 returns, success or failure alike.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use sa_domain::error::Error as CoreError;

#[derive(Serialize)]
pub struct Envelope<T: Serialize> {
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    Json(Envelope { code: 200, message: "ok".into(), data: Some(data) }).into_response()
}

pub fn no_content() -> Response {
    (StatusCode::NO_CONTENT, ()).into_response()
}

/// Map a core [`Error`](CoreError) to its HTTP status and envelope body.
pub fn from_core_error(err: CoreError) -> Response {
    let status = match &err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::ConversationBusy(_) => StatusCode::CONFLICT,
        CoreError::SessionNotFound(_) | CoreError::SkillNotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Auth(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = Envelope::<()> { code: status.as_u16(), message: err.to_string(), data: None };
    (status, Json(body)).into_response()
}
