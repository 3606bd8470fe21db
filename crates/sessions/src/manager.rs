//! Owns every live [`Session`] by id, enforces one active session per
//! conversation, and drives each one on its own background task.
//!
//! Grounded on the donor's `runtime/session_lock.rs` (semaphore-of-one
//! keyed by conversation) and `runtime/cancel.rs` (per-session cancel
//! token), generalized into the full owning registry the core crate's
//! module doc says belongs here: `sa-core` has an opinion about how one
//! turn runs, not about who owns the session table.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot, watch};

use sa_core::terminator::SuspendReason;
use sa_core::{AdaptiveTerminator, ExecutorDeps, IntentAnalyzer, RVRBExecutor, ToolExecutor, ToolRegistry, TurnOutcome};
use sa_domain::config::ModelPricing;
use sa_domain::error::{Error, Result};
use sa_domain::event::SessionStatus;
use sa_domain::model::{IntentResult, Session};
use sa_domain::tool::Message;
use sa_events::{EventBroadcaster, SubscribeResult};
use sa_providers::ProviderRegistry;
use sa_snapshot::{RollbackOutcome, SnapshotStore};

use crate::summary::{SessionState, SessionSummary, SuspendKind};

/// One decision delivered to a parked session's driver task.
enum ControlMsg {
    ConfirmContinue { reply: oneshot::Sender<Result<()>> },
    RespondHitl { request_id: String, approved: bool, reply: oneshot::Sender<Result<()>> },
    Stop { reply: oneshot::Sender<Result<()>> },
}

struct ManagedSession {
    conversation_id: String,
    cancel: sa_domain::model::CancelHandle,
    control_tx: mpsc::Sender<ControlMsg>,
    status_rx: watch::Receiver<SessionSummary>,
}

struct Inner {
    sessions: RwLock<HashMap<String, Arc<ManagedSession>>>,
    busy: RwLock<HashMap<String, String>>,
    broadcaster: Arc<EventBroadcaster>,
    snapshots: Arc<SnapshotStore>,
    intent: Arc<IntentAnalyzer>,
    providers: Arc<ProviderRegistry>,
    tool_executor: Arc<ToolExecutor>,
    tool_registry: Arc<ToolRegistry>,
    terminator: AdaptiveTerminator,
    pricing: HashMap<String, ModelPricing>,
    system_role: String,
    executor_role: String,
    skills: Option<Arc<sa_skills::SkillsRegistry>>,
}

/// Process-wide session arena. `Clone` is cheap (one `Arc`) so every HTTP/WS
/// handler and the façade can hold their own copy.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        broadcaster: Arc<EventBroadcaster>,
        snapshots: Arc<SnapshotStore>,
        intent: Arc<IntentAnalyzer>,
        providers: Arc<ProviderRegistry>,
        tool_executor: Arc<ToolExecutor>,
        tool_registry: Arc<ToolRegistry>,
        terminator: AdaptiveTerminator,
        pricing: HashMap<String, ModelPricing>,
        system_role: impl Into<String>,
        skills: Option<Arc<sa_skills::SkillsRegistry>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: RwLock::new(HashMap::new()),
                busy: RwLock::new(HashMap::new()),
                broadcaster,
                snapshots,
                intent,
                providers,
                tool_executor,
                tool_registry,
                terminator,
                pricing,
                system_role: system_role.into(),
                executor_role: "executor".into(),
                skills,
            }),
        }
    }

    /// Start a new session for `conversation_id`. Fails with
    /// [`Error::ConversationBusy`] if that conversation already has a
    /// session running — a new one cannot start until the prior one
    /// finishes (or is stopped).
    pub async fn start(
        &self,
        conversation_id: impl Into<String>,
        user_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<SessionSummary> {
        let conversation_id = conversation_id.into();
        let user_id = user_id.into();

        if let Some(existing) = self.inner.busy.read().get(&conversation_id).cloned() {
            return Err(Error::ConversationBusy(format!(
                "conversation '{conversation_id}' already has an active session '{existing}'"
            )));
        }

        let provider = self.inner.providers.for_role(&self.inner.executor_role).ok_or_else(|| {
            Error::Config(format!("no provider configured for role '{}'", self.inner.executor_role))
        })?;
        let model = self.inner.providers.model_for_role(&self.inner.executor_role).map(str::to_string);

        let session_id = uuid::Uuid::new_v4().to_string();
        let mut session = Session::new(session_id.clone(), conversation_id.clone(), user_id);
        session
            .context
            .messages
            .push(Message::user(uuid::Uuid::new_v4().to_string(), message.into()));

        let deps = ExecutorDeps {
            provider,
            model,
            broadcaster: self.inner.broadcaster.clone(),
            tool_executor: self.inner.tool_executor.clone(),
            tool_registry: self.inner.tool_registry.clone(),
            terminator: self.inner.terminator.clone(),
            pricing: self.inner.pricing.clone(),
            system_role: self.inner.system_role.clone(),
            skills: self.inner.skills.clone(),
        };

        let cancel = session.cancel.clone();
        let (control_tx, control_rx) = mpsc::channel(8);
        let initial = summary_of(&session, SessionState::Active);
        let (status_tx, status_rx) = watch::channel(initial.clone());

        let managed = Arc::new(ManagedSession {
            conversation_id: conversation_id.clone(),
            cancel,
            control_tx,
            status_rx,
        });

        self.inner.sessions.write().insert(session_id.clone(), managed);
        self.inner.busy.write().insert(conversation_id, session_id.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let intent = inner.intent.analyze(&session.context.messages).await;
            drive_session(inner, session, deps, intent, control_rx, status_tx).await;
        });

        Ok(initial)
    }

    /// Current public state of a session, or `None` if it never existed.
    /// The driver task removes a session from the arena once it finishes,
    /// so a finished session is visible for one last `get`/`list_active`
    /// read (the value published right before it exits) and gone after.
    pub fn get(&self, session_id: &str) -> Option<SessionSummary> {
        self.inner.sessions.read().get(session_id).map(|m| m.status_rx.borrow().clone())
    }

    /// Every session this process currently considers active (not finished).
    pub fn list_active(&self) -> Vec<SessionSummary> {
        self.inner
            .sessions
            .read()
            .values()
            .map(|m| m.status_rx.borrow().clone())
            .filter(|s| !matches!(s.state, SessionState::Finished { .. }))
            .collect()
    }

    /// Subscribe to `session_id`'s event stream, replaying retained history
    /// after `after_seq`.
    pub fn subscribe(&self, session_id: &str, after_seq: Option<u64>) -> Option<SubscribeResult> {
        let conversation_id = self.inner.sessions.read().get(session_id)?.conversation_id.clone();
        Some(
            self.inner
                .broadcaster
                .subscribe(session_id, &conversation_id, after_seq.unwrap_or(0)),
        )
    }

    /// Request that `session_id` stop. Sets its cancellation flag and wakes
    /// the driver task if it is currently parked on a terminator suspend;
    /// the actual `session_end` event is emitted by the driver once the
    /// executor observes the flag.
    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let managed = self.session_or_not_found(session_id)?;
        managed.cancel.cancel();
        let (reply, rx) = oneshot::channel();
        if managed.control_tx.send(ControlMsg::Stop { reply }).await.is_err() {
            // Driver already exited (finished concurrently); cancellation
            // flag was pointless but harmless.
            return Ok(());
        }
        rx.await.map_err(|_| Error::Internal(anyhow::anyhow!("session driver dropped reply channel")))?
    }

    /// Resume a session parked on a terminator-driven suspend (cost ladder,
    /// long-running, backtrack-exhausted, intent-clarify). Not valid for a
    /// tool-level HITL suspend — use [`Self::respond_hitl`] for that.
    pub async fn confirm_continue(&self, session_id: &str) -> Result<()> {
        let managed = self.session_or_not_found(session_id)?;
        let (reply, rx) = oneshot::channel();
        managed
            .control_tx
            .send(ControlMsg::ConfirmContinue { reply })
            .await
            .map_err(|_| Error::SessionNotFound(session_id.to_string()))?;
        rx.await.map_err(|_| Error::Internal(anyhow::anyhow!("session driver dropped reply channel")))?
    }

    /// Deliver a human's decision on a suspended tool call.
    pub async fn respond_hitl(&self, session_id: &str, request_id: &str, approved: bool) -> Result<()> {
        let managed = self.session_or_not_found(session_id)?;
        let (reply, rx) = oneshot::channel();
        managed
            .control_tx
            .send(ControlMsg::RespondHitl {
                request_id: request_id.to_string(),
                approved,
                reply,
            })
            .await
            .map_err(|_| Error::SessionNotFound(session_id.to_string()))?;
        rx.await.map_err(|_| Error::Internal(anyhow::anyhow!("session driver dropped reply channel")))?
    }

    /// Reverse some or all of a session's uncommitted file mutations. Needs
    /// no coordination with the driver task — the snapshot store serializes
    /// itself per session — but only has an effect before the session
    /// finishes and commits (after which there is nothing left to reverse).
    pub async fn rollback(&self, session_id: &str, select: Option<HashSet<String>>) -> Result<Vec<RollbackOutcome>> {
        self.session_or_not_found(session_id)?;
        self.inner.snapshots.rollback(session_id, select.as_ref()).await
    }

    fn session_or_not_found(&self, session_id: &str) -> Result<Arc<ManagedSession>> {
        self.inner
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }
}

fn summary_of(session: &Session, state: SessionState) -> SessionSummary {
    SessionSummary {
        session_id: session.session_id.clone(),
        conversation_id: session.conversation_id.clone(),
        user_id: session.user_id.clone(),
        started_at: session.started_at,
        turn_index: session.turn_index,
        usage_usd: session.usage_usd,
        state,
    }
}

fn suspend_kind(reason: Option<SuspendReason>, request_id: Option<String>) -> SuspendKind {
    match (reason, request_id) {
        (None, Some(request_id)) => SuspendKind::HumanConfirmation { request_id },
        (Some(SuspendReason::ConsecutiveFailures), _) => SuspendKind::ConsecutiveFailures,
        (Some(SuspendReason::BacktrackExhaustedConfirm), _) => SuspendKind::BacktrackExhaustedConfirm,
        (Some(SuspendReason::IntentClarifyRequest), _) => SuspendKind::IntentClarifyRequest,
        (Some(SuspendReason::LongRunningConfirm), _) => SuspendKind::LongRunningConfirm,
        (Some(SuspendReason::CostLimitConfirm), _) => SuspendKind::CostLimitConfirm,
        (Some(SuspendReason::CostUrgentConfirm), _) => SuspendKind::CostUrgentConfirm,
        (None, None) => SuspendKind::HumanConfirmation { request_id: String::new() },
    }
}

fn status_of(reason: sa_core::terminator::StopReason) -> SessionStatus {
    use sa_core::terminator::StopReason;
    match reason {
        StopReason::ModelEnd => SessionStatus::Completed,
        StopReason::UserStop => SessionStatus::Cancelled,
        StopReason::MaxTurns | StopReason::Timeout => SessionStatus::Failed,
    }
}

/// The session's whole lifetime after `start`: run turns, publish status,
/// and park on `control_rx` across every suspend until the executor reports
/// `Finished`. Runs on its own spawned task so `SessionManager::start`
/// returns as soon as the first turn begins rather than blocking the caller
/// on the whole conversation.
async fn drive_session(
    inner: Arc<Inner>,
    mut session: Session,
    deps: ExecutorDeps,
    intent: IntentResult,
    mut control_rx: mpsc::Receiver<ControlMsg>,
    status_tx: watch::Sender<SessionSummary>,
) {
    let executor = RVRBExecutor::new(deps);
    let mut outcome = executor.run(&mut session, &intent).await;

    loop {
        match outcome {
            TurnOutcome::Finished { reason } => {
                let status = status_of(reason);
                let _ = status_tx.send(summary_of(&session, SessionState::Finished { status }));
                if let Err(e) = inner.snapshots.commit(&session.session_id).await {
                    tracing::warn!(session_id = %session.session_id, error = %e, "failed to commit snapshot on finish");
                }
                // A `stop()` call racing the executor's own cancellation check
                // may have already queued a `ControlMsg` before we got here —
                // the turn finished (possibly *because* of that same cancel
                // flag) without ever reading `control_rx`. Drain and ack
                // whatever is pending so the caller's `reply.await` resolves
                // to `Ok` instead of erroring on a dropped sender.
                while let Ok(msg) = control_rx.try_recv() {
                    match msg {
                        ControlMsg::Stop { reply } => {
                            let _ = reply.send(Ok(()));
                        }
                        ControlMsg::ConfirmContinue { reply } => {
                            let _ = reply.send(Err(Error::SessionNotFound(session.session_id.clone())));
                        }
                        ControlMsg::RespondHitl { reply, .. } => {
                            let _ = reply.send(Err(Error::SessionNotFound(session.session_id.clone())));
                        }
                    }
                }
                break;
            }
            TurnOutcome::Suspended { reason, request_id } => {
                let kind = suspend_kind(reason, request_id.clone());
                let _ = status_tx.send(summary_of(&session, SessionState::Suspended { reason: kind }));

                let Some(msg) = control_rx.recv().await else {
                    // Manager dropped; nothing left to do but stop quietly.
                    break;
                };

                outcome = match msg {
                    ControlMsg::Stop { reply } => {
                        session.cancel.cancel();
                        let next = executor.run(&mut session, &intent).await;
                        let _ = reply.send(Ok(()));
                        next
                    }
                    ControlMsg::ConfirmContinue { reply } => {
                        if reason.is_none() {
                            let _ = reply.send(Err(Error::Validation(
                                "session is parked on a tool confirmation, not a terminator suspend".into(),
                            )));
                            TurnOutcome::Suspended { reason, request_id }
                        } else {
                            if reason == Some(SuspendReason::LongRunningConfirm) {
                                session.context.long_running_confirmed = true;
                            }
                            let next = executor.run(&mut session, &intent).await;
                            let _ = reply.send(Ok(()));
                            next
                        }
                    }
                    ControlMsg::RespondHitl {
                        request_id: incoming_id,
                        approved,
                        reply,
                    } => {
                        if request_id.as_deref() != Some(incoming_id.as_str()) {
                            let _ = reply.send(Err(Error::Validation(format!(
                                "request_id '{incoming_id}' does not match the pending confirmation"
                            ))));
                            TurnOutcome::Suspended { reason, request_id }
                        } else {
                            let next = executor.resume_hitl(&mut session, &intent, &incoming_id, approved).await;
                            let _ = reply.send(Ok(()));
                            next
                        }
                    }
                };
            }
        }
    }

    inner.sessions.write().remove(&session.session_id);
    inner.busy.write().remove(&session.conversation_id);
}
