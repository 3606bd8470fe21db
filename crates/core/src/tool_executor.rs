//! ToolRegistry & ToolExecutor.
//!
//! The registry maps a tool name to a handler (schema, whether it mutates
//! paths, whether it needs human confirmation, its timeout). The executor
//! runs the documented six-step contract per call: validate, capture a
//! pre-mutation snapshot, suspend for confirmation if required, invoke with
//! a timeout under cancellation, then either record the resulting
//! `OperationRecord` or classify the failure.
//!
//! HITL suspension is modeled the same way the donor's exec-approval
//! workflow resolves a paused command: a `oneshot` channel parked in a
//! table, resolved later by `respond_hitl` (see `approval.rs`'s
//! `ApprovalStore`), except here the wait never blocks a task — suspension
//! is a return value the executor acts on, and resuming re-enters `execute`
//! instead of unblocking an in-flight await.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio::sync::oneshot;

use sa_domain::model::{
    BusinessKind, ErrorClassification, InverseData, OperationKind, OperationRecord, ToolInvocation,
};
use sa_domain::tool::ToolDefinition;
use sa_snapshot::SnapshotStore;
use sa_tools::file_ops::{self, FileAppendRequest, FileDeleteRequest, FileListRequest, FileMoveRequest, FileReadRequest, FileWriteRequest};

use crate::classifier::{ErrorClassifier, FailureSignal};

/// Shape of inverse a handler's mutation needs, so the executor can build
/// the right [`OperationRecord`] without special-casing tool names. A
/// handler that doesn't mutate anything never has this consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    /// Overwrite/append: inverse restores captured bytes, or deletes the
    /// path if it didn't exist before the write (a true create).
    Write,
    /// Delete: inverse restores the captured bytes unconditionally.
    Delete,
    /// Move/rename: `mutates_paths` returns `[source, destination]`;
    /// inverse renames `destination` back to `source`.
    Rename,
}

/// What a handler invocation produced.
#[derive(Debug, Clone)]
pub struct ToolFailure {
    pub signal: FailureSignal,
    pub message: String,
}

impl ToolFailure {
    pub fn new(signal: FailureSignal, message: impl Into<String>) -> Self {
        Self {
            signal,
            message: message.into(),
        }
    }
}

/// One installable tool. `mutates_paths` and `hitl_required` drive the
/// executor's snapshot/confirmation steps; everything else is the handler's
/// own business.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    /// Absolute paths this invocation will touch, for pre-mutation capture.
    /// Empty for non-mutating tools.
    fn mutates_paths(&self, _input: &Value) -> Vec<String> {
        Vec::new()
    }

    fn hitl_required(&self) -> bool {
        false
    }

    /// Only consulted when `mutates_paths` is non-empty.
    fn mutation_kind(&self) -> MutationKind {
        MutationKind::Write
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure>;
}

/// Immutable-after-construction map of tool name to handler. Hot reload
/// builds a whole replacement map and swaps it in under the lock, so no
/// in-flight lookup ever observes a partially-updated registry.
pub struct ToolRegistry {
    handlers: RwLock<Arc<HashMap<String, Arc<dyn ToolHandler>>>>,
}

impl ToolRegistry {
    pub fn new(handlers: HashMap<String, Arc<dyn ToolHandler>>) -> Self {
        Self {
            handlers: RwLock::new(Arc::new(handlers)),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.handlers.read().values().map(|h| h.definition()).collect()
    }

    /// Atomically replace the whole handler set (hot reload).
    pub fn swap(&self, handlers: HashMap<String, Arc<dyn ToolHandler>>) {
        *self.handlers.write() = Arc::new(handlers);
    }
}

/// Result of one `execute` call.
#[derive(Debug, Clone)]
pub enum ExecutionStep {
    /// Ran to completion; `is_error` mirrors the wire `tool_result.is_error`.
    Completed {
        content: String,
        is_error: bool,
        classification: Option<ErrorClassification>,
    },
    /// Parked awaiting a human decision; the executor should suspend the
    /// turn (`ctx.stop_reason = "hitl_pending"`) and call `resume` once
    /// `respond_hitl` delivers a decision for `request_id`.
    Suspended { request_id: String },
}

struct PendingHitl {
    invocation: ToolInvocation,
    respond: oneshot::Sender<HitlResponse>,
}

#[derive(Debug, Clone)]
pub struct HitlResponse {
    pub approved: bool,
}

pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    snapshots: Arc<SnapshotStore>,
    classifier: ErrorClassifier,
    pending: Mutex<HashMap<String, PendingHitl>>,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, snapshots: Arc<SnapshotStore>) -> Self {
        Self {
            registry,
            snapshots,
            classifier: ErrorClassifier::new(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Step 1-4 of the contract. Returns `Suspended` without invoking the
    /// handler if it requires confirmation; callers resume with
    /// [`Self::resume`] once a decision is delivered through
    /// [`Self::respond_hitl`].
    pub async fn execute(&self, session_id: &str, invocation: ToolInvocation) -> ExecutionStep {
        let Some(handler) = self.registry.get(&invocation.name) else {
            return ExecutionStep::Completed {
                content: format!("unknown tool '{}'", invocation.name),
                is_error: true,
                classification: Some(self.classifier.classify(&FailureSignal::Other)),
            };
        };

        if let Err(msg) = validate_against_schema(&handler.definition(), &invocation.input) {
            return ExecutionStep::Completed {
                content: msg,
                is_error: true,
                classification: Some(self.classifier.classify(&FailureSignal::JsonSchemaViolation)),
            };
        }

        let touched = handler.mutates_paths(&invocation.input);
        if !touched.is_empty() {
            if let Err(e) = self.snapshots.ensure_captured(session_id, &touched).await {
                return ExecutionStep::Completed {
                    content: format!("snapshot capture failed: {e}"),
                    is_error: true,
                    classification: Some(self.classifier.classify(&FailureSignal::Other)),
                };
            }
        }

        if handler.hitl_required() {
            let request_id = uuid::Uuid::new_v4().to_string();
            let (tx, _rx) = oneshot::channel();
            self.pending.lock().insert(
                request_id.clone(),
                PendingHitl {
                    invocation,
                    respond: tx,
                },
            );
            return ExecutionStep::Suspended { request_id };
        }

        self.invoke_and_record(session_id, &handler, invocation, &touched).await
    }

    /// Called once a human decision for `request_id` arrives. `approved =
    /// false` is treated as `hitl_abort` — the invocation never runs.
    pub async fn resume(&self, session_id: &str, request_id: &str, response: HitlResponse) -> Option<ExecutionStep> {
        let pending = self.pending.lock().remove(request_id)?;
        let _ = pending.respond.send(response.clone());

        if !response.approved {
            // Not a terminal abort: routed through the normal backtrack
            // ladder like any other business failure, so the model gets a
            // chance to try a different approach instead of ending the turn.
            return Some(ExecutionStep::Completed {
                content: "tool call rejected by user".into(),
                is_error: true,
                classification: Some(ErrorClassification::Business {
                    kind: BusinessKind::IntentUnclear,
                }),
            });
        }

        let Some(handler) = self.registry.get(&pending.invocation.name) else {
            return Some(ExecutionStep::Completed {
                content: format!("unknown tool '{}'", pending.invocation.name),
                is_error: true,
                classification: Some(self.classifier.classify(&FailureSignal::Other)),
            });
        };
        let touched = handler.mutates_paths(&pending.invocation.input);
        Some(self.invoke_and_record(session_id, &handler, pending.invocation, &touched).await)
    }

    async fn invoke_and_record(
        &self,
        session_id: &str,
        handler: &Arc<dyn ToolHandler>,
        invocation: ToolInvocation,
        touched: &[String],
    ) -> ExecutionStep {
        let result = tokio::time::timeout(handler.timeout(), handler.invoke(invocation.input.clone())).await;

        match result {
            Err(_) => ExecutionStep::Completed {
                content: format!("tool '{}' timed out", invocation.name),
                is_error: true,
                classification: Some(self.classifier.classify(&FailureSignal::ToolTimeout)),
            },
            Ok(Err(failure)) => ExecutionStep::Completed {
                content: failure.message,
                is_error: true,
                classification: Some(self.classifier.classify(&failure.signal)),
            },
            Ok(Ok(value)) => {
                if !touched.is_empty() {
                    if let Some(op) = self
                        .build_operation_record(session_id, &invocation, handler.mutation_kind(), touched)
                        .await
                    {
                        let _ = self.snapshots.record(op).await;
                    }
                }
                let content = serde_json::to_string(&value).unwrap_or_else(|_| value.to_string());
                ExecutionStep::Completed {
                    content,
                    is_error: false,
                    classification: None,
                }
            }
        }
    }

    /// Build the `OperationRecord` whose `inverse` actually undoes this
    /// mutation, using whatever `ensure_captured` saw before the call ran
    /// rather than assuming every mutation is a fresh overwrite.
    async fn build_operation_record(
        &self,
        session_id: &str,
        invocation: &ToolInvocation,
        kind: MutationKind,
        touched: &[String],
    ) -> Option<OperationRecord> {
        let (op_kind, inverse, targets) = match kind {
            MutationKind::Write => {
                let path = touched.first()?.clone();
                let captured = self.snapshots.captured_file(session_id, &path).await;
                let inverse = match captured.and_then(|c| c.original_bytes) {
                    Some(bytes) => InverseData::RestoreBytes { path: path.clone(), bytes },
                    None => InverseData::DeletePath { path: path.clone() },
                };
                (OperationKind::FileWrite, inverse, vec![path])
            }
            MutationKind::Delete => {
                let path = touched.first()?.clone();
                let captured = self.snapshots.captured_file(session_id, &path).await;
                let bytes = captured.and_then(|c| c.original_bytes)?;
                (
                    OperationKind::FileDelete,
                    InverseData::RestoreBytes { path: path.clone(), bytes },
                    vec![path],
                )
            }
            MutationKind::Rename => {
                let source = touched.first()?.clone();
                let destination = touched.get(1)?.clone();
                (
                    OperationKind::FileRename,
                    InverseData::RestorePath { from: source.clone(), to: destination.clone() },
                    vec![source, destination],
                )
            }
        };

        Some(OperationRecord {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            tool_use_id: invocation.tool_use_id.clone(),
            kind: op_kind,
            targets: targets.into_iter().collect(),
            inverse,
            committed: false,
        })
    }
}

/// Minimal structural check: every key listed under `required` in the
/// tool's JSON Schema must be present in the input object. Full schema
/// validation (types, enums, nested shapes) is the handler's own concern —
/// handlers deserialize into a typed request and surface a `BadParam`
/// failure on mismatch, matching the registry-level table in the error
/// classification contract.
fn validate_against_schema(def: &ToolDefinition, input: &Value) -> Result<(), String> {
    let Some(required) = def.parameters.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    let obj = input.as_object();
    for key in required {
        let Some(key) = key.as_str() else { continue };
        let present = obj.map(|o| o.contains_key(key)).unwrap_or(false);
        if !present {
            return Err(format!("missing required parameter '{key}'"));
        }
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in file-mutating handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn to_failure(e: String) -> ToolFailure {
    ToolFailure::new(FailureSignal::ValidatorRejected, e)
}

fn touched_path(workspace_root: &std::path::Path, relative: &str) -> String {
    file_ops::validate_path(workspace_root, relative)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| relative.to_string())
}

pub struct FileWriteHandler {
    pub workspace_root: PathBuf,
    pub require_confirmation: bool,
}

#[async_trait]
impl ToolHandler for FileWriteHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_write".into(),
            description: "Write (overwrite) a file within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn mutates_paths(&self, input: &Value) -> Vec<String> {
        input
            .get("path")
            .and_then(|p| p.as_str())
            .map(|p| vec![touched_path(&self.workspace_root, p)])
            .unwrap_or_default()
    }

    fn hitl_required(&self) -> bool {
        self.require_confirmation
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        let req: FileWriteRequest = serde_json::from_value(input).map_err(|e| {
            ToolFailure::new(FailureSignal::JsonSchemaViolation, e.to_string())
        })?;
        file_ops::file_write(&self.workspace_root, req).await.map_err(to_failure)
    }
}

pub struct FileAppendHandler {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl ToolHandler for FileAppendHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_append".into(),
            description: "Append content to a file within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "content": {"type": "string"}
                },
                "required": ["path", "content"]
            }),
        }
    }

    fn mutates_paths(&self, input: &Value) -> Vec<String> {
        input
            .get("path")
            .and_then(|p| p.as_str())
            .map(|p| vec![touched_path(&self.workspace_root, p)])
            .unwrap_or_default()
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        let req: FileAppendRequest = serde_json::from_value(input).map_err(|e| {
            ToolFailure::new(FailureSignal::JsonSchemaViolation, e.to_string())
        })?;
        file_ops::file_append(&self.workspace_root, req).await.map_err(to_failure)
    }
}

pub struct FileDeleteHandler {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl ToolHandler for FileDeleteHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_delete".into(),
            description: "Delete a file within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": ["path"]
            }),
        }
    }

    fn mutates_paths(&self, input: &Value) -> Vec<String> {
        input
            .get("path")
            .and_then(|p| p.as_str())
            .map(|p| vec![touched_path(&self.workspace_root, p)])
            .unwrap_or_default()
    }

    fn hitl_required(&self) -> bool {
        true
    }

    fn mutation_kind(&self) -> MutationKind {
        MutationKind::Delete
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        let req: FileDeleteRequest = serde_json::from_value(input).map_err(|e| {
            ToolFailure::new(FailureSignal::JsonSchemaViolation, e.to_string())
        })?;
        file_ops::file_delete(&self.workspace_root, req).await.map_err(to_failure)
    }
}

pub struct FileMoveHandler {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl ToolHandler for FileMoveHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_move".into(),
            description: "Move/rename a file within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "source": {"type": "string"},
                    "destination": {"type": "string"}
                },
                "required": ["source", "destination"]
            }),
        }
    }

    fn mutates_paths(&self, input: &Value) -> Vec<String> {
        let mut paths = Vec::new();
        if let Some(p) = input.get("source").and_then(|p| p.as_str()) {
            paths.push(touched_path(&self.workspace_root, p));
        }
        if let Some(p) = input.get("destination").and_then(|p| p.as_str()) {
            paths.push(touched_path(&self.workspace_root, p));
        }
        paths
    }

    fn mutation_kind(&self) -> MutationKind {
        MutationKind::Rename
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        let req: FileMoveRequest = serde_json::from_value(input).map_err(|e| {
            ToolFailure::new(FailureSignal::JsonSchemaViolation, e.to_string())
        })?;
        file_ops::file_move(&self.workspace_root, req).await.map_err(to_failure)
    }
}

pub struct FileReadHandler {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl ToolHandler for FileReadHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_read".into(),
            description: "Read a file within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string"},
                    "offset": {"type": "integer"},
                    "limit": {"type": "integer"}
                },
                "required": ["path"]
            }),
        }
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        let req: FileReadRequest = serde_json::from_value(input).map_err(|e| {
            ToolFailure::new(FailureSignal::JsonSchemaViolation, e.to_string())
        })?;
        file_ops::file_read(&self.workspace_root, req).await.map_err(|e| {
            ToolFailure::new(FailureSignal::EmptyResult, e)
        })
    }
}

pub struct FileListHandler {
    pub workspace_root: PathBuf,
}

#[async_trait]
impl ToolHandler for FileListHandler {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_list".into(),
            description: "List a directory within the workspace.".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {"path": {"type": "string"}},
                "required": []
            }),
        }
    }

    async fn invoke(&self, input: Value) -> Result<Value, ToolFailure> {
        let req: FileListRequest = serde_json::from_value(input).map_err(|e| {
            ToolFailure::new(FailureSignal::JsonSchemaViolation, e.to_string())
        })?;
        file_ops::file_list(&self.workspace_root, req).await.map_err(to_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::config::SnapshotConfig;
    use sa_domain::model::ToolInvocation;
    use sa_snapshot::SnapshotStore;
    use std::collections::HashMap as Map;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path) -> Arc<SnapshotStore> {
        Arc::new(SnapshotStore::new(SnapshotConfig {
            dir: dir.join("snapshots"),
            expires_after_hours: 24,
            disk_floor_bytes: 0,
        }))
    }

    fn registry_with(root: PathBuf, require_confirmation: bool) -> Arc<ToolRegistry> {
        let mut handlers: Map<String, Arc<dyn ToolHandler>> = Map::new();
        handlers.insert(
            "file_write".into(),
            Arc::new(FileWriteHandler {
                workspace_root: root.clone(),
                require_confirmation,
            }),
        );
        handlers.insert("file_delete".into(), Arc::new(FileDeleteHandler { workspace_root: root }));
        Arc::new(ToolRegistry::new(handlers))
    }

    #[tokio::test]
    async fn missing_required_param_is_classified_as_bad_param() {
        let dir = tempdir().unwrap();
        let registry = registry_with(dir.path().to_path_buf(), false);
        let executor = ToolExecutor::new(registry, store(dir.path()));
        let invocation = ToolInvocation::new("c1", "file_write", serde_json::json!({"path": "a.txt"}));
        let step = executor.execute("s1", invocation).await;
        match step {
            ExecutionStep::Completed { is_error, classification, .. } => {
                assert!(is_error);
                assert!(classification.unwrap().is_business());
            }
            _ => panic!("expected Completed"),
        }
    }

    #[tokio::test]
    async fn write_then_delete_requires_confirmation() {
        let dir = tempdir().unwrap();
        let registry = registry_with(dir.path().to_path_buf(), false);
        let executor = ToolExecutor::new(registry, store(dir.path()));

        let write = ToolInvocation::new(
            "c1",
            "file_write",
            serde_json::json!({"path": "a.txt", "content": "hello"}),
        );
        let step = executor.execute("s1", write).await;
        assert!(matches!(step, ExecutionStep::Completed { is_error: false, .. }));

        let delete = ToolInvocation::new("c2", "file_delete", serde_json::json!({"path": "a.txt"}));
        let step = executor.execute("s1", delete).await;
        let request_id = match step {
            ExecutionStep::Suspended { request_id } => request_id,
            _ => panic!("expected Suspended"),
        };

        let resumed = executor
            .resume("s1", &request_id, HitlResponse { approved: true })
            .await
            .unwrap();
        assert!(matches!(resumed, ExecutionStep::Completed { is_error: false, .. }));
    }

    #[tokio::test]
    async fn unknown_tool_is_wrong_tool() {
        let dir = tempdir().unwrap();
        let registry = registry_with(dir.path().to_path_buf(), false);
        let executor = ToolExecutor::new(registry, store(dir.path()));
        let invocation = ToolInvocation::new("c1", "does_not_exist", serde_json::json!({}));
        let step = executor.execute("s1", invocation).await;
        match step {
            ExecutionStep::Completed { is_error, classification, .. } => {
                assert!(is_error);
                assert!(classification.unwrap().is_business());
            }
            _ => panic!("expected Completed"),
        }
    }
}
