//! On-disk layout for a session's snapshot: `{dir}/{session_id}/snapshot.json`
//! (metadata only), `{dir}/{session_id}/ops.json` (operation log), and
//! `{dir}/{session_id}/blobs/{key}.bin` (captured file bytes, one blob per
//! captured path). Writes go through write-to-tempfile-then-rename so a
//! crash mid-write never leaves a half-written snapshot on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sa_domain::error::{Error, Result};
use sa_domain::model::{CapturedFile, OperationRecord, Snapshot};

/// Disk-serializable mirror of [`Snapshot`] — bytes live in sibling blob
/// files instead of inline, keyed by the same digest used for integrity
/// checks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedSnapshot {
    pub id: String,
    pub session_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub files: HashMap<String, PersistedFile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedFile {
    pub blob_key: Option<String>,
    pub sha256: Option<String>,
    pub size: u64,
}

pub(crate) fn session_dir(root: &Path, session_id: &str) -> PathBuf {
    root.join(session_id)
}

fn blobs_dir(root: &Path, session_id: &str) -> PathBuf {
    session_dir(root, session_id).join("blobs")
}

fn snapshot_path(root: &Path, session_id: &str) -> PathBuf {
    session_dir(root, session_id).join("snapshot.json")
}

fn ops_path(root: &Path, session_id: &str) -> PathBuf {
    session_dir(root, session_id).join("ops.json")
}

/// Stable, filesystem-safe key for a captured path's blob file.
pub(crate) fn blob_key(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.as_bytes());
    hex::encode(hasher.finalize())
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(Error::Io)?;
    tokio::fs::write(tmp.path(), bytes).await?;
    tmp.persist(path)
        .map_err(|e| Error::Internal(anyhow::anyhow!("failed to persist {}: {}", path.display(), e)))?;
    Ok(())
}

pub(crate) async fn write_blob(root: &Path, session_id: &str, key: &str, bytes: &[u8]) -> Result<()> {
    let path = blobs_dir(root, session_id).join(format!("{key}.bin"));
    atomic_write(&path, bytes).await
}

pub(crate) async fn read_blob(root: &Path, session_id: &str, key: &str) -> Result<Vec<u8>> {
    let path = blobs_dir(root, session_id).join(format!("{key}.bin"));
    Ok(tokio::fs::read(&path).await?)
}

pub(crate) async fn write_snapshot(root: &Path, snapshot: &Snapshot) -> Result<()> {
    let persisted = PersistedSnapshot {
        id: snapshot.id.clone(),
        session_id: snapshot.session_id.clone(),
        created_at: snapshot.created_at,
        expires_at: snapshot.expires_at,
        files: snapshot
            .files
            .iter()
            .map(|(path, captured)| {
                let key = captured.original_bytes.as_ref().map(|_| blob_key(path));
                (
                    path.clone(),
                    PersistedFile {
                        blob_key: key,
                        sha256: captured.sha256.clone(),
                        size: captured.size,
                    },
                )
            })
            .collect(),
    };
    let bytes = serde_json::to_vec_pretty(&persisted)?;
    atomic_write(&snapshot_path(root, &snapshot.session_id), &bytes).await
}

pub(crate) async fn write_ops(root: &Path, session_id: &str, ops: &[OperationRecord]) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(ops)?;
    atomic_write(&ops_path(root, session_id), &bytes).await
}

/// Reload a session's snapshot (with blob bytes reattached) and operation
/// log from disk, for crash recovery.
pub(crate) async fn load_session(root: &Path, session_id: &str) -> Result<Option<(Snapshot, Vec<OperationRecord>)>> {
    let snap_path = snapshot_path(root, session_id);
    if !snap_path.exists() {
        return Ok(None);
    }
    let raw = tokio::fs::read(&snap_path).await?;
    let persisted: PersistedSnapshot = serde_json::from_slice(&raw)?;

    let mut files = HashMap::with_capacity(persisted.files.len());
    for (path, pf) in persisted.files {
        let original_bytes = match &pf.blob_key {
            Some(key) => Some(read_blob(root, session_id, key).await?),
            None => None,
        };
        files.insert(
            path,
            CapturedFile {
                original_bytes,
                sha256: pf.sha256,
                size: pf.size,
            },
        );
    }

    let snapshot = Snapshot {
        id: persisted.id,
        session_id: persisted.session_id,
        created_at: persisted.created_at,
        files,
        expires_at: persisted.expires_at,
    };

    let ops_p = ops_path(root, session_id);
    let ops = if ops_p.exists() {
        let raw = tokio::fs::read(&ops_p).await?;
        serde_json::from_slice(&raw)?
    } else {
        Vec::new()
    };

    Ok(Some((snapshot, ops)))
}

/// List every session id with a persisted snapshot under `root`.
pub(crate) async fn list_sessions(root: &Path) -> Result<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    let mut entries = tokio::fs::read_dir(root).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                out.push(name.to_string());
            }
        }
    }
    Ok(out)
}

pub(crate) async fn remove_session_dir(root: &Path, session_id: &str) -> Result<()> {
    let dir = session_dir(root, session_id);
    if dir.exists() {
        tokio::fs::remove_dir_all(&dir).await?;
    }
    Ok(())
}
