use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AdaptiveTerminator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Thresholds for the eight-dimension halt arbiter and its cost ladder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminatorConfig {
    /// Hard cap on turns per session.
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    /// Wall-clock bound since session start.
    #[serde(default = "d_max_duration_secs")]
    pub max_duration_secs: u64,
    /// Wall-clock bound since the last emitted event.
    #[serde(default = "d_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Consecutive classified-failure turns before offering rollback.
    #[serde(default = "d_consecutive_failures")]
    pub consecutive_failures_threshold: u32,
    /// Turn count at which `long_running_confirm` is raised (once, per session).
    #[serde(default = "d_long_run_threshold")]
    pub long_run_threshold: u32,
    #[serde(default)]
    pub cost_ladder: CostLadderConfig,
}

impl Default for TerminatorConfig {
    fn default() -> Self {
        Self {
            max_turns: d_max_turns(),
            max_duration_secs: d_max_duration_secs(),
            idle_timeout_secs: d_idle_timeout_secs(),
            consecutive_failures_threshold: d_consecutive_failures(),
            long_run_threshold: d_long_run_threshold(),
            cost_ladder: CostLadderConfig::default(),
        }
    }
}

/// Three-tier cost escalation, evaluated independently of the halt
/// conditions each turn against per-model pricing in `LlmConfig::pricing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostLadderConfig {
    #[serde(default = "d_warn_usd")]
    pub warn_threshold_usd: f64,
    #[serde(default = "d_confirm_usd")]
    pub confirm_threshold_usd: f64,
    #[serde(default = "d_urgent_usd")]
    pub urgent_threshold_usd: f64,
}

impl Default for CostLadderConfig {
    fn default() -> Self {
        Self {
            warn_threshold_usd: d_warn_usd(),
            confirm_threshold_usd: d_confirm_usd(),
            urgent_threshold_usd: d_urgent_usd(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_max_turns() -> u32 {
    100
}
fn d_max_duration_secs() -> u64 {
    3600
}
fn d_idle_timeout_secs() -> u64 {
    300
}
fn d_consecutive_failures() -> u32 {
    3
}
fn d_long_run_threshold() -> u32 {
    20
}
fn d_warn_usd() -> f64 {
    0.50
}
fn d_confirm_usd() -> f64 {
    2.00
}
fn d_urgent_usd() -> f64 {
    10.00
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_ladder_defaults_are_increasing() {
        let cfg = CostLadderConfig::default();
        assert!(cfg.warn_threshold_usd < cfg.confirm_threshold_usd);
        assert!(cfg.confirm_threshold_usd < cfg.urgent_threshold_usd);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: TerminatorConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.long_run_threshold, 20);
    }
}
