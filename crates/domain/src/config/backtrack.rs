use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BacktrackManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktrackConfig {
    /// Total backtracks across the whole session before `backtracks_exhausted`
    /// is forced regardless of per-fingerprint ladder position.
    #[serde(default = "d_ceiling")]
    pub total_backtrack_ceiling: u32,
    /// Timeout for the model-proposed-strategy call before falling back to
    /// the deterministic escalation ladder.
    #[serde(default = "d_propose_timeout_ms")]
    pub propose_timeout_ms: u64,
}

impl Default for BacktrackConfig {
    fn default() -> Self {
        Self {
            total_backtrack_ceiling: d_ceiling(),
            propose_timeout_ms: d_propose_timeout_ms(),
        }
    }
}

fn d_ceiling() -> u32 {
    10
}
fn d_propose_timeout_ms() -> u64 {
    5_000
}
