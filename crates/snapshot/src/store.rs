use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{Mutex, RwLock};

use sa_domain::config::SnapshotConfig;
use sa_domain::error::{Error, Result};
use sa_domain::model::{CapturedFile, InverseData, OperationKind, OperationRecord, Snapshot};

use crate::persist;

/// Outcome of reversing a single operation during `rollback`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RollbackOutcome {
    pub operation_id: String,
    pub path: String,
    pub restored: bool,
    pub error: Option<String>,
}

struct SessionState {
    snapshot: Snapshot,
    ops: Vec<OperationRecord>,
}

/// Captures file bytes before mutation, records inverse operations per tool
/// invocation, and can commit (discard) or roll back (restore) a session's
/// mutations. Per-session state is guarded by its own async mutex so disk
/// writes for a session are strictly sequential; different sessions proceed
/// concurrently.
pub struct SnapshotStore {
    config: SnapshotConfig,
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

impl SnapshotStore {
    pub fn new(config: SnapshotConfig) -> Self {
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Reload every session snapshot persisted under the configured
    /// directory, for crash recovery at process startup. Committed sessions
    /// (those whose directory was already removed on a clean `commit`) are
    /// naturally absent; anything still on disk is treated as in-flight.
    pub async fn recover(&self) -> Result<usize> {
        let session_ids = persist::list_sessions(&self.config.dir).await?;
        let mut recovered = 0;
        for session_id in session_ids {
            if let Some((snapshot, ops)) = persist::load_session(&self.config.dir, &session_id).await? {
                let mut sessions = self.sessions.write().await;
                sessions.insert(session_id, Arc::new(Mutex::new(SessionState { snapshot, ops })));
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn state_for(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        if let Some(existing) = self.sessions.read().await.get(session_id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().await;
        if let Some(existing) = sessions.get(session_id) {
            return existing.clone();
        }
        let now = Utc::now();
        let snapshot = Snapshot {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            created_at: now,
            files: HashMap::new(),
            expires_at: now + ChronoDuration::hours(self.config.expires_after_hours as i64),
        };
        let state = Arc::new(Mutex::new(SessionState { snapshot, ops: Vec::new() }));
        sessions.insert(session_id.to_string(), state.clone());
        state
    }

    fn check_disk_floor(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config.dir).map_err(Error::Io)?;
        let available = fs2::available_space(&self.config.dir).map_err(Error::Io)?;
        if available < self.config.disk_floor_bytes {
            return Err(Error::SnapshotFull(format!(
                "{} bytes free, floor is {} bytes",
                available, self.config.disk_floor_bytes
            )));
        }
        Ok(())
    }

    /// For each path not yet captured in the session's current snapshot,
    /// read and persist its current bytes (or mark it absent). Idempotent —
    /// a path already captured this session is left untouched so the
    /// snapshot always reflects the *first* observed state.
    pub async fn ensure_captured(&self, session_id: &str, paths: &[impl AsRef<Path>]) -> Result<()> {
        self.check_disk_floor()?;
        let state = self.state_for(session_id).await;
        let mut guard = state.lock().await;

        let mut changed = false;
        for path in paths {
            let path_str = path.as_ref().to_string_lossy().to_string();
            if guard.snapshot.files.contains_key(&path_str) {
                continue;
            }
            let captured = match tokio::fs::read(path.as_ref()).await {
                Ok(bytes) => {
                    let sha = persist::sha256_hex(&bytes);
                    let size = bytes.len() as u64;
                    let key = persist::blob_key(&path_str);
                    persist::write_blob(&self.config.dir, session_id, &key, &bytes).await?;
                    CapturedFile {
                        original_bytes: Some(bytes),
                        sha256: Some(sha),
                        size,
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => CapturedFile {
                    original_bytes: None,
                    sha256: None,
                    size: 0,
                },
                Err(e) => return Err(Error::Io(e)),
            };
            guard.snapshot.files.insert(path_str, captured);
            changed = true;
        }

        if changed {
            persist::write_snapshot(&self.config.dir, &guard.snapshot).await?;
        }
        Ok(())
    }

    /// The bytes captured for `path` in this session's current snapshot, if
    /// any capture has happened yet. Used by callers that need to build an
    /// inverse operation (restore vs. delete) from what was actually there
    /// before the mutation, rather than guessing from the operation kind.
    pub async fn captured_file(&self, session_id: &str, path: &str) -> Option<CapturedFile> {
        let state = self.state_for(session_id).await;
        let guard = state.lock().await;
        guard.snapshot.files.get(path).cloned()
    }

    /// Append a mutating operation to the session's inverse log.
    pub async fn record(&self, op: OperationRecord) -> Result<()> {
        let state = self.state_for(&op.session_id).await;
        let mut guard = state.lock().await;
        guard.ops.push(op);
        persist::write_ops(&self.config.dir, &guard.snapshot.session_id, &guard.ops).await
    }

    /// Mark every operation committed and discard the session's snapshot —
    /// mutations become permanent.
    pub async fn commit(&self, session_id: &str) -> Result<()> {
        {
            let state = self.state_for(session_id).await;
            let mut guard = state.lock().await;
            for op in guard.ops.iter_mut() {
                op.committed = true;
            }
        }
        persist::remove_session_dir(&self.config.dir, session_id).await?;
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    /// Reverse selected operations in reverse order, restoring exact bytes
    /// (sha256-verified post-restore). Default `select = None` reverses
    /// every uncommitted operation.
    pub async fn rollback(&self, session_id: &str, select: Option<&HashSet<String>>) -> Result<Vec<RollbackOutcome>> {
        let state = self.state_for(session_id).await;
        let mut guard = state.lock().await;

        let to_reverse: Vec<OperationRecord> = guard
            .ops
            .iter()
            .rev()
            .filter(|op| !op.committed)
            .filter(|op| select.map(|s| s.contains(&op.id)).unwrap_or(true))
            .cloned()
            .collect();

        let mut outcomes = Vec::with_capacity(to_reverse.len());
        for op in &to_reverse {
            let outcome = self.reverse_one(session_id, op).await;
            outcomes.push(outcome);
        }

        let reversed_ids: HashSet<&String> = to_reverse.iter().map(|op| &op.id).collect();
        guard.ops.retain(|op| !reversed_ids.contains(&op.id));
        persist::write_ops(&self.config.dir, session_id, &guard.ops).await?;

        Ok(outcomes)
    }

    async fn reverse_one(&self, session_id: &str, op: &OperationRecord) -> RollbackOutcome {
        match &op.inverse {
            InverseData::RestoreBytes { path, bytes } => match self.restore_bytes(path, bytes).await {
                Ok(()) => RollbackOutcome {
                    operation_id: op.id.clone(),
                    path: path.clone(),
                    restored: true,
                    error: None,
                },
                Err(e) => RollbackOutcome {
                    operation_id: op.id.clone(),
                    path: path.clone(),
                    restored: false,
                    error: Some(e.to_string()),
                },
            },
            InverseData::DeletePath { path } => {
                let result = tokio::fs::remove_file(path).await;
                match result {
                    Ok(()) => RollbackOutcome {
                        operation_id: op.id.clone(),
                        path: path.clone(),
                        restored: true,
                        error: None,
                    },
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => RollbackOutcome {
                        operation_id: op.id.clone(),
                        path: path.clone(),
                        restored: true,
                        error: None,
                    },
                    Err(e) => RollbackOutcome {
                        operation_id: op.id.clone(),
                        path: path.clone(),
                        restored: false,
                        error: Some(e.to_string()),
                    },
                }
            }
            InverseData::RestorePath { from, to } => match tokio::fs::rename(to, from).await {
                Ok(()) => RollbackOutcome {
                    operation_id: op.id.clone(),
                    path: from.clone(),
                    restored: true,
                    error: None,
                },
                Err(e) => RollbackOutcome {
                    operation_id: op.id.clone(),
                    path: from.clone(),
                    restored: false,
                    error: Some(e.to_string()),
                },
            },
        }
        .tap_log(session_id, &op.kind)
    }

    async fn restore_bytes(&self, path: &str, bytes: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, bytes).await?;
        let restored = tokio::fs::read(path).await?;
        let expected = persist::sha256_hex(bytes);
        let actual = persist::sha256_hex(&restored);
        if expected != actual {
            return Err(Error::Internal(anyhow::anyhow!(
                "rollback verification failed for '{path}': sha256 mismatch after restore"
            )));
        }
        Ok(())
    }

    /// Purge any session whose snapshot has passed its `expires_at`.
    pub async fn expire_old(&self) -> Result<usize> {
        let now = Utc::now();
        let expired: Vec<String> = {
            let sessions = self.sessions.read().await;
            let mut out = Vec::new();
            for (id, state) in sessions.iter() {
                if state.lock().await.snapshot.expires_at <= now {
                    out.push(id.clone());
                }
            }
            out
        };
        for id in &expired {
            persist::remove_session_dir(&self.config.dir, id).await?;
            self.sessions.write().await.remove(id);
            tracing::info!(session_id = %id, "snapshot expired and purged");
        }
        Ok(expired.len())
    }
}

trait TapLog {
    fn tap_log(self, session_id: &str, kind: &OperationKind) -> Self;
}

impl TapLog for RollbackOutcome {
    fn tap_log(self, session_id: &str, kind: &OperationKind) -> Self {
        if self.restored {
            tracing::info!(session_id, path = %self.path, ?kind, "operation rolled back");
        } else {
            tracing::warn!(session_id, path = %self.path, ?kind, error = ?self.error, "rollback failed");
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::model::{InverseData, OperationKind, OperationRecord};
    use std::collections::HashSet as StdHashSet;

    fn store(dir: &std::path::Path) -> SnapshotStore {
        SnapshotStore::new(SnapshotConfig {
            dir: dir.to_path_buf(),
            expires_after_hours: 24,
            disk_floor_bytes: 0,
        })
    }

    #[tokio::test]
    async fn ensure_captured_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        tokio::fs::write(&file, b"v1").await.unwrap();

        let store = store(tmp.path().join("snapshots").as_path());
        store.ensure_captured("sess1", &[file.clone()]).await.unwrap();
        tokio::fs::write(&file, b"v2").await.unwrap();
        store.ensure_captured("sess1", &[file.clone()]).await.unwrap();

        let state = store.state_for("sess1").await;
        let guard = state.lock().await;
        let captured = guard.snapshot.files.get(&file.to_string_lossy().to_string()).unwrap();
        assert_eq!(captured.original_bytes.as_deref(), Some(b"v1".as_slice()));
    }

    #[tokio::test]
    async fn rollback_restores_exact_bytes_and_sha256() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        tokio::fs::write(&file, b"v1").await.unwrap();
        let path_str = file.to_string_lossy().to_string();

        let store = store(tmp.path().join("snapshots").as_path());
        store.ensure_captured("sess1", &[file.clone()]).await.unwrap();

        let original_sha = {
            let state = store.state_for("sess1").await;
            let guard = state.lock().await;
            guard.snapshot.files.get(&path_str).unwrap().sha256.clone().unwrap()
        };

        tokio::fs::write(&file, b"v2-mutated").await.unwrap();

        let op = OperationRecord {
            id: "op1".into(),
            session_id: "sess1".into(),
            tool_use_id: "tu1".into(),
            kind: OperationKind::FileWrite,
            targets: StdHashSet::from([path_str.clone()]),
            inverse: InverseData::RestoreBytes {
                path: path_str.clone(),
                bytes: b"v1".to_vec(),
            },
            committed: false,
        };
        store.record(op).await.unwrap();

        let outcomes = store.rollback("sess1", None).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].restored);

        let restored = tokio::fs::read(&file).await.unwrap();
        assert_eq!(restored, b"v1");
        assert_eq!(persist::sha256_hex(&restored), original_sha);
    }

    #[tokio::test]
    async fn commit_discards_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let file = tmp.path().join("a.txt");
        tokio::fs::write(&file, b"v1").await.unwrap();

        let store = store(tmp.path().join("snapshots").as_path());
        store.ensure_captured("sess1", &[file.clone()]).await.unwrap();
        store.commit("sess1").await.unwrap();

        assert!(!store.sessions.read().await.contains_key("sess1"));
    }

    #[tokio::test]
    async fn disk_floor_breach_fails_with_snapshot_full() {
        let tmp = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(SnapshotConfig {
            dir: tmp.path().join("snapshots"),
            expires_after_hours: 24,
            disk_floor_bytes: u64::MAX,
        });
        let file = tmp.path().join("a.txt");
        tokio::fs::write(&file, b"v1").await.unwrap();
        let result = store.ensure_captured("sess1", &[file]).await;
        assert!(matches!(result, Err(Error::SnapshotFull(_))));
    }
}
