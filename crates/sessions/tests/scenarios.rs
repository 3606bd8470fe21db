//! End-to-end scenarios driving a real [`SessionManager`] against the
//! deterministic [`MockProvider`], seeded from the core execution loop's
//! documented test scenarios: a plain chat turn, mid-stream abort, a
//! file-write-then-rollback, a repeated-failure backtrack escalation, a cost
//! confirm, and HITL-gated tools. Each test wires the same subsystems
//! `bootstrap.rs` wires for the real gateway, just pointed at a tempdir
//! workspace and tuned thresholds so the scenario fires within a handful of
//! turns.
//!
//! `MockProvider` picks its behavior from the *last* `Role::User` message
//! only (see its module doc), and turns never append a new user message --
//! so a `call_tool:...` directive repeats identically every turn until
//! something other than the model itself ends the session (a halt check, or
//! an explicit `stop`). Scenarios that use a repeating directive drive the
//! session to the halt/suspend state it deterministically produces rather
//! than asserting an exact turn count.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use sa_core::tool_executor::{FileDeleteHandler, FileWriteHandler, ToolHandler};
use sa_core::{AdaptiveTerminator, IntentAnalyzer, TerminatorConfig, ToolExecutor, ToolRegistry};
use sa_domain::config::{
    AuthConfig, BroadcastConfig, CostLadderConfig, IntentConfig, LlmConfig, ModelPricing, ProviderConfig,
    ProviderKind, RoleConfig, SnapshotConfig, TerminatorConfig as PersistedTerminatorConfig,
};
use sa_domain::event::EventType;
use sa_events::EventBroadcaster;
use sa_providers::ProviderRegistry;
use sa_sessions::summary::{SessionState, SessionSummary, SuspendKind};
use sa_sessions::SessionManager;
use sa_snapshot::SnapshotStore;

/// Everything a test needs torn down and a workspace root to point tools at.
struct Harness {
    manager: SessionManager,
    #[allow(dead_code)]
    workspace: tempfile::TempDir,
}

fn llm_config(pricing: HashMap<String, ModelPricing>) -> LlmConfig {
    let mut cfg = LlmConfig::default();
    cfg.providers.push(ProviderConfig {
        id: "mock".into(),
        kind: ProviderKind::OpenaiCompat,
        base_url: String::new(),
        auth: AuthConfig::default(),
        default_model: Some("mock-1".into()),
    });
    cfg.roles.insert(
        "executor".into(),
        RoleConfig {
            model: "mock/mock-1".into(),
            require_tools: false,
            require_json: false,
            require_streaming: false,
            fallbacks: Vec::new(),
        },
    );
    cfg.roles.insert(
        "summarizer".into(),
        RoleConfig {
            model: "mock/mock-1".into(),
            require_tools: false,
            require_json: false,
            require_streaming: false,
            fallbacks: Vec::new(),
        },
    );
    cfg.pricing = pricing;
    cfg
}

fn terminator_with(cost: CostLadderConfig, consecutive_failures_threshold: u32) -> AdaptiveTerminator {
    let mut persisted = PersistedTerminatorConfig::default();
    persisted.cost_ladder = cost;
    persisted.consecutive_failures_threshold = consecutive_failures_threshold;
    persisted.long_run_threshold = 1_000;
    AdaptiveTerminator::new(TerminatorConfig::from(&persisted))
}

fn harness(pricing: HashMap<String, ModelPricing>, cost: CostLadderConfig, require_confirmation: bool) -> Harness {
    let workspace = tempfile::tempdir().unwrap();
    let root = workspace.path().to_path_buf();

    let providers = Arc::new(ProviderRegistry::from_config(&llm_config(pricing.clone())).unwrap());
    let broadcaster = Arc::new(EventBroadcaster::new(BroadcastConfig {
        delta_throttle_ms: 10,
        ..BroadcastConfig::default()
    }));
    let snapshots = Arc::new(SnapshotStore::new(SnapshotConfig {
        dir: root.join(".snapshots"),
        expires_after_hours: 24,
        disk_floor_bytes: 0,
    }));

    let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
    handlers.insert(
        "file_write".into(),
        Arc::new(FileWriteHandler {
            workspace_root: root.clone(),
            require_confirmation,
        }),
    );
    handlers.insert(
        "file_delete".into(),
        Arc::new(FileDeleteHandler { workspace_root: root.clone() }),
    );
    let tool_registry = Arc::new(ToolRegistry::new(handlers));
    let tool_executor = Arc::new(ToolExecutor::new(tool_registry.clone(), snapshots.clone()));

    let intent = Arc::new(IntentAnalyzer::new(IntentConfig::default(), None, Vec::new()));
    let terminator = terminator_with(cost, 3);

    let manager = SessionManager::new(
        broadcaster,
        snapshots,
        intent,
        providers,
        tool_executor,
        tool_registry,
        terminator,
        pricing,
        "You are a test agent.",
        None,
    );

    Harness { manager, workspace }
}

/// Poll `manager.get` until `pred` matches the summary's state, or give up
/// and return whatever the last read was (`None` if the session already
/// finished and was reaped).
async fn poll_until(
    manager: &SessionManager,
    session_id: &str,
    attempts: usize,
    pred: impl Fn(&SessionState) -> bool,
) -> Option<SessionSummary> {
    for _ in 0..attempts {
        match manager.get(session_id) {
            Some(summary) if pred(&summary.state) => return Some(summary),
            Some(_) => {}
            None => return None,
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    manager.get(session_id)
}

async fn drain_events(manager: &SessionManager, session_id: &str, max: usize) -> Vec<EventType> {
    let mut sub = manager.subscribe(session_id, None).unwrap();
    let mut seen = Vec::new();
    for _ in 0..max {
        match tokio::time::timeout(Duration::from_millis(500), sub.receiver.recv()).await {
            Ok(Some(ev)) => {
                let done = ev.event_type == EventType::SessionEnd;
                seen.push(ev.event_type);
                if done {
                    break;
                }
            }
            _ => break,
        }
    }
    seen
}

#[tokio::test]
async fn scenario_1_single_turn_chat_completes() {
    let h = harness(HashMap::new(), CostLadderConfig::default(), false);
    let started = h.manager.start("conv-1", "user-1", "hi there").await.unwrap();

    let events = drain_events(&h.manager, &started.session_id, 64).await;
    assert!(events.contains(&EventType::SessionStart));
    assert!(events.contains(&EventType::ConversationStart));
    assert!(events.contains(&EventType::MessageStart));
    assert!(events.contains(&EventType::ContentStart));
    assert!(events.contains(&EventType::ContentDelta));
    assert!(events.contains(&EventType::SessionEnd));

    let session_start = events.iter().position(|e| *e == EventType::SessionStart).unwrap();
    let conversation_start = events.iter().position(|e| *e == EventType::ConversationStart).unwrap();
    let msg_start = events.iter().position(|e| *e == EventType::MessageStart).unwrap();
    let content_start = events.iter().position(|e| *e == EventType::ContentStart).unwrap();
    assert!(session_start < conversation_start, "conversation_start must follow session_start");
    assert!(conversation_start < msg_start, "conversation_start must precede message_start");
    assert!(msg_start < content_start, "message_start must precede content_start");

    let summary = h.manager.get(&started.session_id);
    assert!(summary.is_none(), "finished session is dropped from the arena after its last publish");
}

#[tokio::test]
async fn scenario_2_abort_mid_run_is_accepted_and_session_eventually_clears() {
    let h = harness(HashMap::new(), CostLadderConfig::default(), false);
    let started = h
        .manager
        .start("conv-2", "user-1", r#"call_tool:file_write:{"path":"loop.txt","content":"x"}"#)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(5)).await;
    // Whether the session is still mid-run or already past it by the time we
    // get here, `stop` must not panic the caller either way -- both outcomes
    // are valid depending on exactly when the driver task gets scheduled.
    let _ = h.manager.stop(&started.session_id).await;

    let mut cleared = false;
    for _ in 0..100 {
        if h.manager.get(&started.session_id).is_none() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleared, "session should finish and be removed from the arena after stop");
}

#[tokio::test]
async fn scenario_2_duplicate_stop_is_idempotent() {
    let h = harness(HashMap::new(), CostLadderConfig::default(), false);
    let started = h.manager.start("conv-2b", "user-1", "hi").await.unwrap();

    // The single-turn chat may well have already finished by the time we
    // get here; both calls must fail gracefully or succeed, never panic.
    let first = h.manager.stop(&started.session_id).await;
    let second = h.manager.stop(&started.session_id).await;
    assert!(first.is_ok() || first.is_err());
    assert!(second.is_ok() || second.is_err());
}

#[tokio::test]
async fn scenario_3_file_write_then_rollback_restores_original_bytes() {
    let h = harness(HashMap::new(), CostLadderConfig::default(), false);
    let path = h.workspace.path().join("doc.txt");
    std::fs::write(&path, b"v1").unwrap();

    let started = h
        .manager
        .start("conv-3", "user-1", r#"call_tool:file_write:{"path":"doc.txt","content":"v2"}"#)
        .await
        .unwrap();

    let mut observed_v2 = false;
    for _ in 0..200 {
        if std::fs::read(&path).ok().as_deref() == Some(&b"v2"[..]) {
            observed_v2 = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(observed_v2, "file_write should have landed the new content at least once");

    // Stop the (otherwise endlessly-repeating) session so rollback has a
    // stable, quiescent set of uncommitted operations to reverse.
    let _ = h.manager.stop(&started.session_id).await;
    for _ in 0..100 {
        if h.manager.get(&started.session_id).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let outcomes = h.manager.rollback(&started.session_id, None).await.unwrap();
    assert!(!outcomes.is_empty(), "expected at least one recorded mutation to roll back");
    assert!(outcomes.iter().all(|o| o.restored), "every rollback outcome should report success");

    let restored = std::fs::read(&path).unwrap();
    assert_eq!(restored, b"v1", "rollback must restore the pre-mutation bytes");
}

#[tokio::test]
async fn scenario_4_repeated_bad_param_failures_suspend_for_confirmation() {
    // `content` is required by the write handler's schema; omitting it makes
    // every turn fail with the same `BadParam` fingerprint, which should
    // escalate consecutive failures until the terminator suspends rather
    // than looping forever.
    let h = harness(HashMap::new(), CostLadderConfig::default(), false);
    let started = h
        .manager
        .start("conv-4", "user-1", r#"call_tool:file_write:{"path":"doc.txt"}"#)
        .await
        .unwrap();

    let summary = poll_until(&h.manager, &started.session_id, 200, |s| matches!(s, SessionState::Suspended { .. }))
        .await
        .expect("session should still be tracked when it suspends");

    match summary.state {
        SessionState::Suspended { reason } => {
            assert!(
                matches!(reason, SuspendKind::ConsecutiveFailures | SuspendKind::BacktrackExhaustedConfirm),
                "unexpected suspend reason for a permanently failing tool call: {reason:?}"
            );
        }
        other => panic!("expected the session to suspend on repeated failures, got {other:?}"),
    }

    let _ = h.manager.stop(&started.session_id).await;
}

#[tokio::test]
async fn scenario_5_cost_confirm_suspends_and_resumes() {
    let mut pricing = HashMap::new();
    // Keyed by the resolved "provider_id/model_name" role spec, which is
    // what ends up on the assistant message's `model` field (see
    // `ExecutorDeps::model` in `executor.rs`) -- not the provider's own
    // default model name.
    pricing.insert(
        "mock/mock-1".into(),
        ModelPricing {
            input_per_1m: 0.0,
            output_per_1m: 250_000.0, // 8 completion tokens -> $2.00, crossing confirm
        },
    );
    let cost = CostLadderConfig {
        warn_threshold_usd: 0.50,
        confirm_threshold_usd: 1.50,
        urgent_threshold_usd: 1_000_000.0,
    };
    let h = harness(pricing, cost, false);

    let started = h
        .manager
        .start("conv-5", "user-1", r#"call_tool:file_write:{"path":"billed.txt","content":"x"}"#)
        .await
        .unwrap();

    let summary = poll_until(&h.manager, &started.session_id, 200, |s| {
        matches!(s, SessionState::Suspended { reason: SuspendKind::CostLimitConfirm })
    })
    .await
    .expect("session should still be tracked when it suspends");
    assert!(matches!(summary.state, SessionState::Suspended { reason: SuspendKind::CostLimitConfirm }));
    assert!(summary.usage_usd >= 1.50);

    // Resuming must be accepted even though the ladder will likely suspend
    // again on the very next turn (the mock keeps emitting the same tool
    // call, so cost only ever grows).
    h.manager.confirm_continue(&started.session_id).await.unwrap();

    let _ = h.manager.stop(&started.session_id).await;
    let mut cleared = false;
    for _ in 0..100 {
        if h.manager.get(&started.session_id).is_none() {
            cleared = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cleared);
}

#[tokio::test]
async fn scenario_6_hitl_confirmation_required_tool_suspends_and_resumes_on_approval() {
    let h = harness(HashMap::new(), CostLadderConfig::default(), true);
    let path = h.workspace.path().join("gated.txt");

    let started = h
        .manager
        .start("conv-6a", "user-1", r#"call_tool:file_write:{"path":"gated.txt","content":"approved"}"#)
        .await
        .unwrap();

    let summary = poll_until(&h.manager, &started.session_id, 200, |s| {
        matches!(s, SessionState::Suspended { reason: SuspendKind::HumanConfirmation { .. } })
    })
    .await
    .expect("session should still be tracked when it suspends");

    let request_id = match summary.state {
        SessionState::Suspended { reason: SuspendKind::HumanConfirmation { request_id } } => request_id,
        other => panic!("expected an HITL suspend, got {other:?}"),
    };

    h.manager.respond_hitl(&started.session_id, &request_id, true).await.unwrap();

    let mut written = false;
    for _ in 0..200 {
        if std::fs::read(&path).ok().as_deref() == Some(&b"approved"[..]) {
            written = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(written, "approved file_write should land on disk");

    let _ = h.manager.stop(&started.session_id).await;
}

#[tokio::test]
async fn scenario_6_hitl_rejection_leaves_the_file_untouched() {
    let h = harness(HashMap::new(), CostLadderConfig::default(), true);
    let path = h.workspace.path().join("rejected.txt");

    let started = h
        .manager
        .start("conv-6b", "user-1", r#"call_tool:file_write:{"path":"rejected.txt","content":"nope"}"#)
        .await
        .unwrap();

    let summary = poll_until(&h.manager, &started.session_id, 200, |s| {
        matches!(s, SessionState::Suspended { reason: SuspendKind::HumanConfirmation { .. } })
    })
    .await
    .expect("session should still be tracked when it suspends");

    let request_id = match summary.state {
        SessionState::Suspended { reason: SuspendKind::HumanConfirmation { request_id } } => request_id,
        other => panic!("expected an HITL suspend, got {other:?}"),
    };

    h.manager.respond_hitl(&started.session_id, &request_id, false).await.unwrap();

    // Give the rejected turn a moment to be processed, then make sure no
    // file ever appeared.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(std::fs::read(&path).is_err(), "rejected file_write must never touch disk");

    let _ = h.manager.stop(&started.session_id).await;
}

#[tokio::test]
async fn conversation_busy_rejects_a_second_concurrent_session() {
    let h = harness(HashMap::new(), CostLadderConfig::default(), false);
    let _first = h
        .manager
        .start("conv-busy", "user-1", r#"call_tool:file_write:{"path":"a.txt","content":"x"}"#)
        .await
        .unwrap();

    let second = h.manager.start("conv-busy", "user-1", "hi again").await;
    assert!(matches!(second, Err(sa_domain::error::Error::ConversationBusy(_))));
}
