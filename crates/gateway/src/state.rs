use std::sync::Arc;

use sa_domain::config::Config;
use sa_sessions::SessionManager;

/// Shared application state passed to all API handlers.
///
/// Thin by design: almost everything a handler needs to do — start a
/// session, subscribe to its events, stop it, resume it — is a method on
/// [`SessionManager`], which owns the whole session arena behind its own
/// `Arc`. The gateway only adds the config (read once at startup for the
/// CORS/rate-limit/auth knobs below) and the token hash auth reads per
/// request.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionManager>,
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
}
