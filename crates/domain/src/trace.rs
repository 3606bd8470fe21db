use serde::Serialize;

/// Structured trace events emitted across all crates in the agent execution core.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ContextBuilt {
        total_injected_chars: usize,
        files_included: usize,
        files_truncated_per_file: usize,
        files_truncated_total_cap: usize,
        files_excluded: usize,
        skills_index_chars: usize,
        stable_fragment_chars: usize,
        bootstrap_included: bool,
    },
    SkillDocLoaded {
        skill_name: String,
        doc_chars: usize,
    },
    WorkspaceFileRead {
        filename: String,
        raw_chars: usize,
        cache_hit: bool,
    },
    BootstrapCompleted {
        workspace_id: String,
    },
    LlmRequest {
        provider: String,
        model: String,
        role: String,
        streaming: bool,
        duration_ms: u64,
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
    LlmFallback {
        from_provider: String,
        from_model: String,
        to_provider: String,
        to_model: String,
        reason: String,
    },
    SessionResolved {
        session_id: String,
        is_new: bool,
    },
    TurnStarted {
        session_id: String,
        turn_id: String,
        attempt: u32,
    },
    ToolDispatched {
        session_id: String,
        turn_id: String,
        tool_name: String,
        call_id: String,
    },
    ErrorClassified {
        session_id: String,
        turn_id: String,
        class: String,
        signal: String,
    },
    BacktrackChosen {
        session_id: String,
        turn_id: String,
        strategy: String,
        attempt: u32,
    },
    TerminatorVerdict {
        session_id: String,
        turn_id: String,
        condition: String,
        action: String,
    },
    SnapshotCaptured {
        session_id: String,
        turn_id: String,
        operation_id: String,
        path: String,
        bytes: usize,
    },
    RollbackCompleted {
        session_id: String,
        turn_id: String,
        operations_reverted: usize,
    },
    HitlRequested {
        session_id: String,
        turn_id: String,
        reason: String,
    },
    HitlResolved {
        session_id: String,
        turn_id: String,
        approved: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sa_event");
    }
}
