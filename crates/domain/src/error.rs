/// Shared error type used across all crates in the agent execution core.
///
/// This is the *infrastructure* error channel: a constructed `Error` always
/// means the turn terminates with a transport-level `error` event. Business
/// failures (bad tool args, unmet preconditions, ambiguous intent) never
/// become an `Error` — they flow through `ErrorClassification::Business` in
/// [`crate::model`] and are handled by the backtrack ladder instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("validation: {0}")]
    Validation(String),

    #[error("network: {0}")]
    Network(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider overloaded: {0}")]
    Overloaded(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("config: {0}")]
    Config(String),

    #[error("snapshot store full: {0}")]
    SnapshotFull(String),

    #[error("conversation busy: {0}")]
    ConversationBusy(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("skill not found: {0}")]
    SkillNotFound(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("human-in-the-loop request aborted: {0}")]
    HitlAborted(String),

    #[error("internal: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
