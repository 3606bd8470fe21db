//! The RVR-B (React–Validate–Reflect-with-Backtrack) per-session turn loop.
//!
//! Grounded on the donor's `runtime/turn.rs` spawn-and-drain shape (a
//! provider stream translated chunk by chunk into wire events, cancellation
//! checked at chunk/tool/turn boundaries, cost estimated from per-model
//! pricing) but diverging from it in the two places the contract demands:
//! tool calls are dispatched one at a time in arrival order instead of via
//! `join_all`, and every suspension point returns control to the caller
//! (`SessionManager`) instead of blocking the task on an in-process
//! oneshot.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use serde_json::{json, Value};

use sa_contextpack::InjectorInput;
use sa_domain::config::ModelPricing;
use sa_domain::event::EventType;
use sa_domain::model::{IntentResult, Session};
use sa_domain::stream::{StreamEvent, Usage};
use sa_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall};
use sa_events::EventBroadcaster;
use sa_providers::traits::{ChatRequest, LlmProvider};

use crate::backtrack::{self, BacktrackManager};
use crate::terminator::{AdaptiveTerminator, HaltDecision, StopReason, SuspendReason, TerminationInputs};
use crate::tool_executor::{ExecutionStep, ToolExecutor, ToolRegistry};

/// Everything one session's executor run needs, assembled by the façade
/// (`ChatService`) once per session from process-wide singletons plus the
/// role's resolved provider/model. `Clone`able so `SessionManager` can keep
/// one copy per session and hand it to `RVRBExecutor::new` again whenever a
/// suspended session is re-entered.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub model: Option<String>,
    pub broadcaster: Arc<EventBroadcaster>,
    pub tool_executor: Arc<ToolExecutor>,
    pub tool_registry: Arc<ToolRegistry>,
    pub terminator: AdaptiveTerminator,
    pub pricing: std::collections::HashMap<String, ModelPricing>,
    pub system_role: String,
    /// `None` when no skills directory was configured or it failed to
    /// load; the skill-focus injector is simply skipped then (same
    /// non-fatal-fallback spirit as `IntentAnalyzer`'s failure path).
    pub skills: Option<Arc<sa_skills::SkillsRegistry>>,
}

/// How a `run` call ended. `Suspended` callers must stash `backtrack` and
/// `deps`/re-invoke `run` once the matching resume signal arrives; the
/// executor itself holds no state across a suspension.
pub enum TurnOutcome {
    Finished { reason: StopReason },
    /// `reason` is `None` for a tool-level HITL confirmation (`request_id`
    /// set) and `Some` for every terminator-driven suspend (`request_id`
    /// unset — those resume via `confirm_continue`, not a tool decision).
    Suspended { reason: Option<SuspendReason>, request_id: Option<String> },
}

pub struct RVRBExecutor {
    deps: ExecutorDeps,
}

impl RVRBExecutor {
    pub fn new(deps: ExecutorDeps) -> Self {
        Self { deps }
    }

    fn emit(&self, session: &Session, event_type: EventType, message_id: Option<String>, data: Value) {
        self.deps
            .broadcaster
            .emit(&session.session_id, &session.conversation_id, event_type, message_id, data);
    }

    /// Drive `session` through turns until it finishes or suspends.
    /// `intent` is the cached classification computed once at session
    /// start; it is not re-derived per turn. Safe to call again after a
    /// terminator-driven suspend (cost/long-running/intent-clarify/
    /// backtrack-exhausted confirms all land here with an empty tool
    /// queue); a tool-level HITL suspend instead resumes through
    /// [`Self::resume_hitl`], which stashed the unresolved part of the
    /// turn on `RuntimeContext` rather than losing it.
    pub async fn run(&self, session: &mut Session, intent: &IntentResult) -> TurnOutcome {
        let started = Instant::now();
        let mut last_event_at = Instant::now();
        let mut backtrack = BacktrackManager::new();

        if session.turn_index == 0 {
            self.emit(session, EventType::SessionStart, None, json!({}));
            self.emit(session, EventType::ConversationStart, None, json!({}));
        }

        loop {
            if session.cancel.is_cancelled() {
                return self.finish_cancelled(session);
            }
            session.turn_index += 1;

            // ── BUILDING_PROMPT ──────────────────────────────────────
            let defs = self.deps.tool_registry.definitions();
            let skills_index = self
                .deps
                .skills
                .as_ref()
                .map(|registry| registry.render_ready_index());
            let injector_input = InjectorInput {
                ctx: &session.context,
                intent,
                system_role: &self.deps.system_role,
                history_summary: None,
                tool_definitions: &defs,
                skills_index: skills_index.as_deref(),
                user_memory: None,
                playbook_hint: None,
                knowledge_context: None,
                page_editor: None,
            };
            let (system_prompt, _fragments) = sa_contextpack::compose(&injector_input);

            let mut messages = Vec::with_capacity(session.context.messages.len() + 1);
            messages.push(Message::system("system", system_prompt));
            messages.extend(session.context.messages.iter().cloned());

            let req = ChatRequest {
                messages,
                tools: defs,
                temperature: None,
                max_tokens: None,
                json_mode: false,
                model: self.deps.model.clone(),
            };

            // ── CALLING_MODEL / STREAMING_CONTENT ────────────────────
            let message_id = uuid::Uuid::new_v4().to_string();
            self.emit(session, EventType::MessageStart, Some(message_id.clone()), json!({}));

            let stream = match self.deps.provider.chat_stream(req).await {
                Ok(s) => s,
                Err(e) => {
                    self.emit(
                        session,
                        EventType::Error,
                        Some(message_id.clone()),
                        json!({"kind": "network_error", "message": e.to_string()}),
                    );
                    self.emit(session, EventType::MessageStop, Some(message_id.clone()), json!({}));
                    return self.finish(session, StopReason::Timeout);
                }
            };

            let drained = self.drain_stream(session, &message_id, stream).await;
            last_event_at = Instant::now();
            if drained.cancelled {
                return self.finish_cancelled(session);
            }

            let assistant_message = drained.into_message(message_id.clone());
            session.context.messages.push(assistant_message.clone());
            if let (Some(model), Some(usage)) = (assistant_message.model.as_deref(), &assistant_message.usage) {
                if let Some(pricing) = self.deps.pricing.get(model) {
                    session.usage_usd += pricing.estimate_cost(usage.prompt_tokens, usage.completion_tokens);
                }
            }

            // ── EXECUTING_TOOLS (serial) + EVALUATING ────────────────
            let tool_calls = extract_tool_calls(&assistant_message.content);
            let finish_reason = assistant_message.stop_reason.clone();
            let has_unresolved = assistant_message.content.has_unresolved_tool_use();
            let pricing_known = assistant_message
                .model
                .as_deref()
                .map(|m| self.deps.pricing.contains_key(m))
                .unwrap_or(false);

            match self
                .drive_tool_calls(
                    session,
                    &mut backtrack,
                    started,
                    &mut last_event_at,
                    &message_id,
                    &tool_calls,
                    None,
                    finish_reason.as_deref(),
                    has_unresolved,
                    pricing_known,
                )
                .await
            {
                ControlFlow::Continue(()) => continue,
                ControlFlow::Break(outcome) => return outcome,
            }
        }
    }

    /// Resume a turn suspended on a tool's HITL confirmation. `request_id`
    /// must match what `RuntimeContext::pending_hitl_request_id` stashed
    /// when the turn suspended; a stale or duplicate `request_id` (e.g. two
    /// `respond_hitl` calls racing for the same request) is a no-op rather
    /// than double-applying the human's decision — idempotence required by
    /// the testable-properties list.
    pub async fn resume_hitl(
        &self,
        session: &mut Session,
        intent: &IntentResult,
        request_id: &str,
        approved: bool,
    ) -> TurnOutcome {
        if session.context.pending_hitl_request_id.as_deref() != Some(request_id) {
            return TurnOutcome::Suspended {
                reason: None,
                request_id: session.context.pending_hitl_request_id.clone(),
            };
        }

        let Some(resolved) = self
            .deps
            .tool_executor
            .resume(&session.session_id, request_id, crate::tool_executor::HitlResponse { approved })
            .await
        else {
            return TurnOutcome::Suspended { reason: None, request_id: None };
        };

        let tool_calls = std::mem::take(&mut session.context.pending_tool_calls);
        let message_id = session.context.pending_message_id.take().unwrap_or_default();
        let finish_reason = session.context.pending_finish_reason.take();
        let has_unresolved = session.context.pending_has_unresolved;
        session.context.pending_has_unresolved = false;
        session.context.pending_hitl_request_id = None;

        let started = Instant::now();
        let mut last_event_at = Instant::now();
        let mut backtrack = BacktrackManager::new();
        let pricing_known = false; // recomputed fresh each `run()` turn; not meaningful mid-resume

        match self
            .drive_tool_calls(
                session,
                &mut backtrack,
                started,
                &mut last_event_at,
                &message_id,
                &tool_calls,
                Some(resolved),
                finish_reason.as_deref(),
                has_unresolved,
                pricing_known,
            )
            .await
        {
            ControlFlow::Continue(()) => Box::pin(self.run(session, intent)).await,
            ControlFlow::Break(outcome) => outcome,
        }
    }

    /// Serially dispatch `tool_calls` (resuming at index 0 with
    /// `preresolved_first` when given, e.g. the outcome of a just-approved
    /// HITL confirmation) and then run the terminator's EVALUATING step.
    /// Any call that itself suspends for confirmation stashes the rest —
    /// including itself — back onto `RuntimeContext` and returns
    /// `Break(Suspended)`; `Continue(())` means the caller should advance to
    /// the next turn's `BUILDING_PROMPT`.
    #[allow(clippy::too_many_arguments)]
    async fn drive_tool_calls(
        &self,
        session: &mut Session,
        backtrack: &mut BacktrackManager,
        started: Instant,
        last_event_at: &mut Instant,
        message_id: &str,
        tool_calls: &[ToolCall],
        mut preresolved_first: Option<ExecutionStep>,
        model_finish_reason: Option<&str>,
        has_unresolved_tool_use: bool,
        pricing_known: bool,
    ) -> ControlFlow<TurnOutcome> {
        for (i, call) in tool_calls.iter().enumerate() {
            if session.cancel.is_cancelled() {
                return ControlFlow::Break(self.finish_cancelled(session));
            }

            let step = match preresolved_first.take() {
                Some(s) if i == 0 => s,
                _ => {
                    let invocation =
                        sa_domain::model::ToolInvocation::new(call.call_id.clone(), call.tool_name.clone(), call.arguments.clone());
                    self.deps.tool_executor.execute(&session.session_id, invocation).await
                }
            };

            match step {
                ExecutionStep::Suspended { request_id } => {
                    session.context.pending_tool_calls = tool_calls[i..].to_vec();
                    session.context.pending_message_id = Some(message_id.to_string());
                    session.context.pending_hitl_request_id = Some(request_id.clone());
                    session.context.pending_finish_reason = model_finish_reason.map(str::to_string);
                    session.context.pending_has_unresolved = has_unresolved_tool_use;
                    self.emit(
                        session,
                        EventType::ConfirmationRequest,
                        Some(message_id.to_string()),
                        json!({"request_id": request_id, "tool_name": call.tool_name, "call_id": call.call_id}),
                    );
                    session.stop_reason = Some("hitl_pending".into());
                    return ControlFlow::Break(TurnOutcome::Suspended {
                        reason: None,
                        request_id: Some(request_id),
                    });
                }
                ExecutionStep::Completed { content, is_error, classification } => {
                    self.record_tool_result(session, call, &content, is_error);

                    if is_error {
                        if let Some(class) = classification {
                            if class.is_business() {
                                session.context.consecutive_failures += 1;
                                let fp = backtrack::fingerprint(&call.tool_name, &call.arguments, &class);
                                let decision = backtrack
                                    .decide(Some(self.deps.provider.as_ref()), &fp, &call.tool_name, &content)
                                    .await;
                                session.context.total_backtracks += 1;
                                session.context.last_terminator_decision = Some(format!("{decision:?}"));
                                backtrack.apply_reflection(&mut session.context, &fp, &call.call_id, &call.tool_name);
                                if backtrack.is_exhausted(&fp) {
                                    session.context.backtracks_exhausted = true;
                                }
                            }
                        }
                    } else {
                        session.context.consecutive_failures = 0;
                    }
                }
            }
        }

        // ── EVALUATING ────────────────────────────────────────────────
        // Any business failure has already had BACKTRACKING applied inline
        // above (reflection pushed, ladder advanced); the terminator still
        // runs its full ordered check below so a consecutive-failure or
        // exhausted-ladder suspend is never skipped just because this turn
        // also had a failure.
        let inputs = TerminationInputs {
            ctx: &session.context,
            elapsed: started.elapsed(),
            idle_for: last_event_at.elapsed(),
            usage_usd: session.usage_usd,
            pricing_known,
            model_finish_reason,
            has_unresolved_tool_use,
            user_requested_stop: session.cancel.is_cancelled(),
        };
        *last_event_at = Instant::now();

        // The warn tier never suspends (see `cost_signal` doc comment) so it
        // would otherwise never reach the wire; the confirm/urgent tiers ride
        // along inside `evaluate`'s `Suspend` below.
        if self.deps.terminator.cost_signal(&inputs) == crate::terminator::CostSignal::Warn {
            self.emit(session, EventType::CostWarn, None, json!({"usage_usd": session.usage_usd}));
        }

        match self.deps.terminator.evaluate(&inputs) {
            HaltDecision::Continue => ControlFlow::Continue(()),
            HaltDecision::Stop { reason } => ControlFlow::Break(self.finish(session, reason)),
            HaltDecision::Suspend { reason } => {
                session.stop_reason = Some(format!("{reason:?}"));
                self.emit_suspend(session, reason);
                ControlFlow::Break(TurnOutcome::Suspended { reason: Some(reason), request_id: None })
            }
        }
    }

    fn record_tool_result(&self, session: &mut Session, call: &ToolCall, content: &str, is_error: bool) {
        let mut msg = Message::tool_result(uuid::Uuid::new_v4().to_string(), call.call_id.clone(), content.to_string());
        if let MessageContent::Parts(parts) = &mut msg.content {
            if let Some(ContentPart::ToolResult { is_error: flag, .. }) = parts.first_mut() {
                *flag = is_error;
            }
        }
        self.emit(
            session,
            EventType::ContentStart,
            None,
            json!({"type": "tool_result", "tool_use_id": call.call_id}),
        );
        self.emit(
            session,
            EventType::ContentStop,
            None,
            json!({"tool_use_id": call.call_id, "is_error": is_error}),
        );
        session.context.messages.push(msg);
    }

    fn emit_suspend(&self, session: &Session, reason: SuspendReason) {
        let event_type = match reason {
            SuspendReason::ConsecutiveFailures => EventType::RollbackOptions,
            SuspendReason::BacktrackExhaustedConfirm => EventType::BacktrackExhaustedConfirm,
            SuspendReason::IntentClarifyRequest => EventType::IntentClarifyRequest,
            SuspendReason::LongRunningConfirm => EventType::LongRunningConfirm,
            SuspendReason::CostLimitConfirm => EventType::CostLimitConfirm,
            SuspendReason::CostUrgentConfirm => EventType::CostUrgentConfirm,
        };
        self.emit(session, event_type, None, json!({}));
    }

    fn finish(&self, session: &mut Session, reason: StopReason) -> TurnOutcome {
        let status = match reason {
            StopReason::ModelEnd => "completed",
            StopReason::UserStop => "cancelled",
            StopReason::MaxTurns | StopReason::Timeout => "failed",
        };
        session.stop_reason = Some(format!("{reason:?}"));
        self.emit(session, EventType::ConversationStop, None, json!({}));
        self.emit(session, EventType::SessionEnd, None, json!({"status": status}));
        self.emit(session, EventType::Done, None, json!({}));
        TurnOutcome::Finished { reason }
    }

    fn finish_cancelled(&self, session: &mut Session) -> TurnOutcome {
        session.stop_reason = Some("user_requested".into());
        self.emit(session, EventType::SessionStopped, None, json!({"reason": "user_requested"}));
        self.emit(session, EventType::ConversationStop, None, json!({}));
        self.emit(session, EventType::SessionEnd, None, json!({"status": "cancelled"}));
        self.emit(session, EventType::Done, None, json!({}));
        TurnOutcome::Finished { reason: StopReason::UserStop }
    }

    /// Translate one model stream into wire `content_*` events plus the
    /// assembled assistant message. Checks cancellation at each chunk
    /// boundary (suspension point (a) in the concurrency model).
    async fn drain_stream(
        &self,
        session: &Session,
        message_id: &str,
        mut stream: sa_domain::stream::BoxStream<'static, sa_domain::error::Result<StreamEvent>>,
    ) -> DrainedTurn {
        let mut text = String::new();
        let mut text_started = false;
        let mut tool_calls: Vec<PendingToolCall> = Vec::new();
        let mut usage = None;
        let mut finish_reason = None;
        let mut model = self.deps.model.clone();

        while let Some(event) = stream.next().await {
            if session.cancel.is_cancelled() {
                return DrainedTurn {
                    text,
                    tool_calls,
                    usage,
                    finish_reason,
                    model,
                    cancelled: true,
                };
            }

            match event {
                Ok(StreamEvent::Token { text: chunk }) => {
                    if !text_started {
                        text_started = true;
                        self.emit(session, EventType::ContentStart, Some(message_id.to_string()), json!({"index": 0, "type": "text"}));
                    }
                    text.push_str(&chunk);
                    self.emit(
                        session,
                        EventType::ContentDelta,
                        Some(message_id.to_string()),
                        json!({"index": 0, "delta": chunk}),
                    );
                }
                Ok(StreamEvent::ToolCallStarted { call_id, tool_name }) => {
                    let index = tool_calls.len() as u32 + 1;
                    tool_calls.push(PendingToolCall {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        index,
                        arguments: Value::Null,
                    });
                    self.emit(
                        session,
                        EventType::ContentStart,
                        Some(message_id.to_string()),
                        json!({"index": index, "type": "tool_use", "id": call_id, "name": tool_name}),
                    );
                }
                Ok(StreamEvent::ToolCallDelta { call_id, delta }) => {
                    if let Some(pending) = tool_calls.iter().find(|t| t.call_id == call_id) {
                        self.emit(
                            session,
                            EventType::ContentDelta,
                            Some(message_id.to_string()),
                            json!({"index": pending.index, "delta": delta}),
                        );
                    }
                }
                Ok(StreamEvent::ToolCallFinished { call_id, arguments, .. }) => {
                    if let Some(pending) = tool_calls.iter_mut().find(|t| t.call_id == call_id) {
                        pending.arguments = arguments;
                        self.emit(
                            session,
                            EventType::ContentStop,
                            Some(message_id.to_string()),
                            json!({"index": pending.index}),
                        );
                    }
                }
                Ok(StreamEvent::Done { usage: u, finish_reason: f }) => {
                    usage = u;
                    finish_reason = f;
                }
                Ok(StreamEvent::Error { message }) => {
                    self.emit(
                        session,
                        EventType::Error,
                        Some(message_id.to_string()),
                        json!({"kind": "overloaded_error", "message": message}),
                    );
                    finish_reason = Some("error".into());
                    break;
                }
                Err(e) => {
                    self.emit(
                        session,
                        EventType::Error,
                        Some(message_id.to_string()),
                        json!({"kind": "network_error", "message": e.to_string()}),
                    );
                    finish_reason = Some("error".into());
                    break;
                }
            }
        }

        if text_started {
            self.emit(session, EventType::ContentStop, Some(message_id.to_string()), json!({"index": 0}));
        }
        self.emit(session, EventType::MessageStop, Some(message_id.to_string()), json!({}));
        if model.is_none() {
            model = Some("unknown".into());
        }

        DrainedTurn {
            text,
            tool_calls,
            usage,
            finish_reason,
            model,
            cancelled: false,
        }
    }
}

struct PendingToolCall {
    call_id: String,
    tool_name: String,
    index: u32,
    arguments: Value,
}

struct DrainedTurn {
    text: String,
    tool_calls: Vec<PendingToolCall>,
    usage: Option<Usage>,
    finish_reason: Option<String>,
    model: Option<String>,
    cancelled: bool,
}

impl DrainedTurn {
    fn into_message(self, message_id: String) -> Message {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(ContentPart::Text { index: 0, text: self.text });
        }
        for call in &self.tool_calls {
            parts.push(ContentPart::ToolUse {
                index: call.index as usize,
                id: call.call_id.clone(),
                name: call.tool_name.clone(),
                input: call.arguments.clone(),
            });
        }

        let content = if parts.is_empty() {
            MessageContent::Text(String::new())
        } else {
            MessageContent::Parts(parts)
        };

        Message {
            id: message_id,
            role: Role::Assistant,
            content,
            model: self.model,
            usage: self.usage,
            stop_reason: self.finish_reason,
        }
    }
}

fn extract_tool_calls(content: &MessageContent) -> Vec<ToolCall> {
    match content {
        MessageContent::Text(_) => Vec::new(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolUse { id, name, input, .. } => Some(ToolCall {
                    call_id: id.clone(),
                    tool_name: name.clone(),
                    arguments: input.clone(),
                }),
                _ => None,
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_tool_calls_ignores_text_only_content() {
        let content = MessageContent::Text("hello".into());
        assert!(extract_tool_calls(&content).is_empty());
    }

    #[test]
    fn extract_tool_calls_pulls_tool_use_blocks_in_order() {
        let content = MessageContent::Parts(vec![
            ContentPart::Text { index: 0, text: "ok".into() },
            ContentPart::ToolUse { index: 1, id: "c1".into(), name: "file_read".into(), input: json!({"path": "a"}) },
            ContentPart::ToolUse { index: 2, id: "c2".into(), name: "file_write".into(), input: json!({"path": "b"}) },
        ]);
        let calls = extract_tool_calls(&content);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_id, "c1");
        assert_eq!(calls[1].tool_name, "file_write");
    }
}
