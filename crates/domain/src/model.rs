//! Per-session data model: `Session`, `RuntimeContext`, and the small value
//! types threaded between the executor, terminator, backtrack manager, and
//! snapshot store. Message/content shapes live in [`crate::tool`]; this
//! module is the execution-state layer built on top of them.

use crate::tool::Message;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One end-to-end execution triggered by a single incoming `chat.send`.
///
/// Mutated only by the owning executor task; every other holder (the
/// façade, the HTTP/WS handlers) goes through `SessionManager` and only
/// ever sees a clone of the immutable fields or acts through the
/// cancellation handle.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub conversation_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub turn_index: u32,
    pub stop_reason: Option<String>,
    pub usage_usd: f64,
    pub context: RuntimeContext,
    pub cancel: CancelHandle,
}

impl Session {
    pub fn new(session_id: impl Into<String>, conversation_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            conversation_id: conversation_id.into(),
            user_id: user_id.into(),
            started_at: Utc::now(),
            turn_index: 0,
            stop_reason: None,
            usage_usd: 0.0,
            context: RuntimeContext::default(),
            cancel: CancelHandle::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.stop_reason.is_none() && !self.cancel.is_cancelled()
    }
}

/// Shared cancellation signal. One per session; cloned into every task that
/// needs to observe a user-initiated stop (model stream reader, tool
/// executor, backtrack manager's model calls).
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The per-session mutable working set threaded through one turn after
/// another by the RVR-B executor.
#[derive(Debug, Clone, Default)]
pub struct RuntimeContext {
    pub messages: Vec<Message>,
    pub plan: Option<Plan>,
    pub total_backtracks: u32,
    pub backtracks_exhausted: bool,
    pub backtrack_token_count: u64,
    pub last_terminator_decision: Option<String>,
    pub injector_outputs: HashMap<InjectorPhase, Vec<String>>,
    pub long_running_confirmed: bool,
    pub consecutive_failures: u32,
    /// Tool calls from the current assistant message not yet dispatched,
    /// stashed when one of them suspended for HITL confirmation so
    /// `RVRBExecutor::resume_hitl` can pick the turn back up mid-loop
    /// instead of re-querying the model.
    pub pending_tool_calls: Vec<crate::tool::ToolCall>,
    pub pending_message_id: Option<String>,
    pub pending_hitl_request_id: Option<String>,
    pub pending_finish_reason: Option<String>,
    pub pending_has_unresolved: bool,
}

impl RuntimeContext {
    pub fn turns(&self) -> u32 {
        self.messages
            .iter()
            .filter(|m| m.role == crate::tool::Role::Assistant)
            .count() as u32
    }
}

/// Optional todo tree attached to a `RuntimeContext` for complex turns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub items: Vec<PlanItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: String,
    pub description: String,
    pub done: bool,
}

/// Injector pipeline phase, used to tag prompt fragments with where in the
/// three-phase pipeline they were produced and with which cache strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InjectorPhase {
    SystemRole,
    HistorySummary,
    ToolDefinitions,
    SkillFocus,
    UserMemory,
    PlaybookHint,
    KnowledgeContext,
    PlanTodo,
    PageEditor,
}

/// Cache strategy tag attached to each injector's output fragment; fragments
/// are concatenated stable-first so the provider's prompt cache prefix
/// stays long across turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheStrategy {
    Stable,
    Session,
    Dynamic,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InjectorFragment {
    pub phase: InjectorPhase,
    pub strategy: CacheStrategy,
    pub text: String,
}

/// Derived classification of an incoming user message, produced by the
/// IntentAnalyzer and consumed at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub complexity: Complexity,
    pub skip_memory: bool,
    pub is_follow_up: bool,
    pub wants_to_stop: bool,
    pub wants_rollback: bool,
    pub relevant_skill_groups: HashSet<String>,
}

impl IntentResult {
    pub fn needs_plan(&self) -> bool {
        self.complexity != Complexity::Simple
    }

    /// Deterministic fallback used when the analyzer's cache/model layers
    /// fail or time out; failure here is non-fatal to session start.
    pub fn fallback() -> Self {
        Self {
            complexity: Complexity::Medium,
            skip_memory: false,
            is_follow_up: false,
            wants_to_stop: false,
            wants_rollback: false,
            relevant_skill_groups: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
}

/// A single dispatched tool call and its lifecycle, tracked by the tool
/// executor for the duration of one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool_use_id: String,
    pub name: String,
    pub input: serde_json::Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_blocks: Vec<crate::tool::ContentPart>,
    pub classification: Option<ErrorClassification>,
    pub snapshot_ids: HashSet<String>,
}

impl ToolInvocation {
    pub fn new(tool_use_id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            tool_use_id: tool_use_id.into(),
            name: name.into(),
            input,
            started_at: Utc::now(),
            finished_at: None,
            result_blocks: Vec::new(),
            classification: None,
            snapshot_ids: HashSet::new(),
        }
    }
}

/// A classified failure: either retried-and-exhausted infrastructure trouble,
/// or a business-level failure that the backtrack manager can reason about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind_group")]
pub enum ErrorClassification {
    Infrastructure {
        kind: InfrastructureKind,
        retry_after: Option<u64>,
    },
    Business {
        kind: BusinessKind,
    },
}

impl ErrorClassification {
    pub fn is_business(&self) -> bool {
        matches!(self, ErrorClassification::Business { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfrastructureKind {
    RateLimit,
    Network,
    Provider5xx,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusinessKind {
    WrongTool,
    BadParam,
    EmptyResult,
    ValidationFailed,
    IntentUnclear,
}

/// Strategy chosen by the BacktrackManager in response to a classified
/// business failure. Ordered weakest-to-strongest; escalation within one
/// fingerprint is monotonic — see `BacktrackManager::escalate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktrackDecision {
    ParamAdjust,
    ToolReplace,
    ContextEnrich,
    PlanReplan,
    IntentClarify,
    GiveUp,
}

impl BacktrackDecision {
    pub const LADDER: [BacktrackDecision; 6] = [
        BacktrackDecision::ParamAdjust,
        BacktrackDecision::ToolReplace,
        BacktrackDecision::ContextEnrich,
        BacktrackDecision::PlanReplan,
        BacktrackDecision::IntentClarify,
        BacktrackDecision::GiveUp,
    ];
}

/// Captured original bytes for every path touched by a session's
/// file-mutating tools, keyed by absolute path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub files: HashMap<String, CapturedFile>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedFile {
    /// `None` when the path did not exist at capture time (rollback of a
    /// `file_create` deletes the file rather than restoring bytes).
    pub original_bytes: Option<Vec<u8>>,
    pub sha256: Option<String>,
    pub size: u64,
}

/// One mutating operation performed by a tool, with enough data to invert it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub session_id: String,
    pub tool_use_id: String,
    pub kind: OperationKind,
    pub targets: HashSet<String>,
    pub inverse: InverseData,
    pub committed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    FileWrite,
    FileCreate,
    FileDelete,
    FileRename,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum InverseData {
    /// Restore exactly these bytes at this path.
    RestoreBytes { path: String, bytes: Vec<u8> },
    /// Delete the path (undoes a file_create).
    DeletePath { path: String },
    /// Undo a rename by renaming back.
    RestorePath { from: String, to: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intent_result_fallback_needs_plan_matches_medium() {
        let r = IntentResult::fallback();
        assert_eq!(r.complexity, Complexity::Medium);
        assert!(r.needs_plan());
    }

    #[test]
    fn simple_complexity_does_not_need_plan() {
        let r = IntentResult {
            complexity: Complexity::Simple,
            skip_memory: false,
            is_follow_up: false,
            wants_to_stop: false,
            wants_rollback: false,
            relevant_skill_groups: HashSet::new(),
        };
        assert!(!r.needs_plan());
    }

    #[test]
    fn cancel_handle_reflects_across_clones() {
        let handle = CancelHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_cancelled());
        clone.cancel();
        assert!(handle.is_cancelled());
    }

    #[test]
    fn backtrack_ladder_is_monotonically_ordered() {
        for window in BacktrackDecision::LADDER.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn session_is_active_until_cancelled_or_stopped() {
        let session = Session::new("s1", "c1", "u1");
        assert!(session.is_active());
        session.cancel.cancel();
        assert!(!session.is_active());
    }
}
