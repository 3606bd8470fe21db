//! AppState construction extracted from `main.rs`.
//!
//! Builds every subsystem the session arena needs — LLM providers, the
//! event broadcaster, the snapshot store, the tool registry/executor, the
//! intent analyzer, the adaptive terminator — and wires them into one
//! [`SessionManager`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use sa_core::{
    AdaptiveTerminator, IntentAnalyzer, TerminatorConfig, ToolExecutor, ToolRegistry,
};
use sa_core::tool_executor::{
    FileAppendHandler, FileDeleteHandler, FileListHandler, FileMoveHandler, FileReadHandler,
    FileWriteHandler, ToolHandler,
};
use sa_domain::config::{Config, ConfigSeverity};
use sa_events::EventBroadcaster;
use sa_providers::ProviderRegistry;
use sa_sessions::SessionManager;
use sa_skills::SkillsRegistry;
use sa_snapshot::SnapshotStore;

use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully-wired
/// [`AppState`]. Shared boot path for `serve` (and, eventually, any other
/// entry point that needs the whole runtime without an HTTP listener).
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── LLM providers ────────────────────────────────────────────────
    let llm = Arc::new(
        ProviderRegistry::from_config(&config.llm).context("initializing LLM providers")?,
    );
    tracing::info!("LLM provider registry ready");

    // ── Event broadcaster ────────────────────────────────────────────
    let broadcaster = Arc::new(EventBroadcaster::new(config.broadcast.clone()));
    tracing::info!("event broadcaster ready");

    // ── Snapshot store ───────────────────────────────────────────────
    let snapshots = Arc::new(SnapshotStore::new(config.snapshot.clone()));
    tracing::info!(dir = %config.snapshot.dir.display(), "snapshot store ready");

    // ── Tool registry + executor (built-in file tools) ──────────────
    let workspace_root = config.workspace.path.clone();
    let mut handlers: HashMap<String, Arc<dyn ToolHandler>> = HashMap::new();
    handlers.insert(
        "file_write".into(),
        Arc::new(FileWriteHandler {
            workspace_root: workspace_root.clone(),
            require_confirmation: false,
        }),
    );
    handlers.insert(
        "file_append".into(),
        Arc::new(FileAppendHandler { workspace_root: workspace_root.clone() }),
    );
    handlers.insert(
        "file_delete".into(),
        Arc::new(FileDeleteHandler { workspace_root: workspace_root.clone() }),
    );
    handlers.insert(
        "file_move".into(),
        Arc::new(FileMoveHandler { workspace_root: workspace_root.clone() }),
    );
    handlers.insert(
        "file_read".into(),
        Arc::new(FileReadHandler { workspace_root: workspace_root.clone() }),
    );
    handlers.insert(
        "file_list".into(),
        Arc::new(FileListHandler { workspace_root: workspace_root.clone() }),
    );
    let tool_registry = Arc::new(ToolRegistry::new(handlers));
    let tool_executor = Arc::new(ToolExecutor::new(tool_registry.clone(), snapshots.clone()));
    tracing::info!(tools = tool_registry.definitions().len(), "tool registry ready");

    // ── Intent analyzer ──────────────────────────────────────────────
    let intent_provider = llm.for_role("summarizer");
    let intent = Arc::new(IntentAnalyzer::new(config.intent.clone(), intent_provider, Vec::new()));
    tracing::info!("intent analyzer ready");

    // ── Adaptive terminator ──────────────────────────────────────────
    let terminator = AdaptiveTerminator::new(TerminatorConfig::from(&config.terminator));
    tracing::info!("adaptive terminator ready");

    // ── Skills registry (non-fatal: a missing/unreadable directory just
    // means the phase-1 "skill focus" injector stays empty) ───────────
    let skills = match SkillsRegistry::load(&config.skills.path) {
        Ok(registry) => {
            tracing::info!(path = %config.skills.path.display(), "skills registry loaded");
            Some(Arc::new(registry))
        }
        Err(e) => {
            tracing::warn!(path = %config.skills.path.display(), error = %e, "skills registry unavailable, continuing without it");
            None
        }
    };

    // ── Session manager ──────────────────────────────────────────────
    let sessions = Arc::new(SessionManager::new(
        broadcaster,
        snapshots,
        intent,
        llm,
        tool_executor,
        tool_registry,
        terminator,
        config.llm.pricing.clone(),
        "You are SerialAgent, an autonomous assistant operating on the user's workspace.",
        skills,
    ));
    tracing::info!(agent_id = %config.sessions.agent_id, "session manager ready");

    // ── API token (read once, hash for constant-time comparison) ────
    const API_TOKEN_ENV: &str = "SA_API_TOKEN";
    let api_token_hash = match std::env::var(API_TOKEN_ENV) {
        Ok(token) if !token.is_empty() => {
            tracing::info!("API bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!("API bearer-token auth DISABLED — set {API_TOKEN_ENV} to enable");
            None
        }
    };

    Ok(AppState { config, sessions, api_token_hash })
}
