use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SnapshotStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Directory holding `{session_id}.json` snapshots and `{op_id}.bin` blobs.
    #[serde(default = "d_dir")]
    pub dir: PathBuf,
    /// Snapshot expiry, after which `expire_old()` purges it.
    #[serde(default = "d_expires_after_hours")]
    pub expires_after_hours: u32,
    /// Disk-space floor (bytes) for the snapshot directory's filesystem;
    /// captures fail with `SnapshotFull` once free space would drop below it.
    #[serde(default = "d_disk_floor_bytes")]
    pub disk_floor_bytes: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: d_dir(),
            expires_after_hours: d_expires_after_hours(),
            disk_floor_bytes: d_disk_floor_bytes(),
        }
    }
}

fn d_dir() -> PathBuf {
    PathBuf::from("./data/snapshots")
}
fn d_expires_after_hours() -> u32 {
    24
}
fn d_disk_floor_bytes() -> u64 {
    100 * 1024 * 1024
}
