//! Process-wide ownership of running sessions.
//!
//! `sa-core` knows how to run one turn; this crate knows who is allowed to
//! start one, keeps every session's [`sa_domain::model::Session`] alive on
//! its own background task for the session's whole lifetime, and is the
//! only thing both the WebSocket/SSE transport and the HTTP control
//! endpoints talk to.

pub mod manager;
pub mod summary;

pub use manager::SessionManager;
pub use summary::{SessionState, SessionSummary, SuspendKind};
