pub mod auth;
pub mod chat;
pub mod envelope;
pub mod sessions;
pub mod ws;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no auth required) and **protected**
/// (gated behind the `SA_API_TOKEN` bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/v1/health", get(health));

    let protected = Router::new()
        .route("/v1/chat", post(chat::chat))
        .route("/v1/ws", get(ws::chat_ws))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/sessions/:id/stop", post(sessions::stop))
        .route(
            "/v1/sessions/:id/confirm_continue",
            post(sessions::confirm_continue),
        )
        .route("/v1/sessions/:id/rollback", post(sessions::rollback))
        .route(
            "/v1/sessions/:id/human-confirmation",
            post(sessions::human_confirmation),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}
