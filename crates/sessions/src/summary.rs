//! Read-only view of a running session, published by its driver task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sa_domain::event::SessionStatus;

/// Why a session is currently parked, mirroring [`sa_core::terminator::SuspendReason`]
/// and the tool-level HITL case (which carries the pending `request_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendKind {
    ConsecutiveFailures,
    BacktrackExhaustedConfirm,
    IntentClarifyRequest,
    LongRunningConfirm,
    CostLimitConfirm,
    CostUrgentConfirm,
    HumanConfirmation { request_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Active,
    Suspended { reason: SuspendKind },
    Finished { status: SessionStatus },
}

/// Snapshot of a session's public fields, cheap to clone and safe to hand
/// out to HTTP/WS handlers without touching the owning driver task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub turn_index: u32,
    pub usage_usd: f64,
    pub state: SessionState,
}
