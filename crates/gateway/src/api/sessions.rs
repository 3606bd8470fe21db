//! Session control surface: stop, confirm-continue, rollback, human
//! confirmation, and read-only lookup.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::response::{Json, Response};
use serde::Deserialize;

use crate::api::envelope::{from_core_error, no_content, ok};
use crate::state::AppState;

pub async fn stop(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.stop(&id).await {
        Ok(()) => no_content(),
        Err(e) => from_core_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct ConfirmContinueBody {
    pub approved: bool,
}

pub async fn confirm_continue(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ConfirmContinueBody>,
) -> Response {
    if !body.approved {
        return match state.sessions.stop(&id).await {
            Ok(()) => no_content(),
            Err(e) => from_core_error(e),
        };
    }
    match state.sessions.confirm_continue(&id).await {
        Ok(()) => no_content(),
        Err(e) => from_core_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct RollbackBody {
    #[serde(default)]
    pub select: Option<HashSet<String>>,
}

pub async fn rollback(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<RollbackBody>,
) -> Response {
    match state.sessions.rollback(&id, body.select).await {
        Ok(outcomes) => ok(outcomes),
        Err(e) => from_core_error(e),
    }
}

pub async fn get_session(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.sessions.get(&id) {
        Some(summary) => ok(summary),
        None => from_core_error(sa_domain::error::Error::SessionNotFound(id)),
    }
}

pub async fn list_sessions(State(state): State<AppState>) -> Response {
    ok(state.sessions.list_active())
}

#[derive(Debug, Deserialize)]
pub struct HumanConfirmationBody {
    pub request_id: String,
    pub response: bool,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

pub async fn human_confirmation(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<HumanConfirmationBody>,
) -> Response {
    let _ = body.metadata; // carried for audit logging by callers, not consulted here
    match state.sessions.respond_hitl(&session_id, &body.request_id, body.response).await {
        Ok(()) => no_content(),
        Err(e) => from_core_error(e),
    }
}
