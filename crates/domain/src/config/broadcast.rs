use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventBroadcaster
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    /// Coalescing window for successive `content_delta` events sharing the
    /// same `(session_id, message_id, content_index)` key.
    #[serde(default = "d_delta_throttle_ms")]
    pub delta_throttle_ms: u64,
    /// `tick` heartbeat cadence on persistent bidirectional transports.
    #[serde(default = "d_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Client-side disconnect bound; informational (enforced by clients).
    #[serde(default = "d_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// Number of recent events retained per session for late-join replay.
    #[serde(default = "d_replay_buffer_size")]
    pub replay_buffer_size: usize,
    /// Bounded per-subscriber outbound queue; a subscriber that falls behind
    /// this far is dropped (the session keeps running).
    #[serde(default = "d_subscriber_buffer_size")]
    pub subscriber_buffer_size: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            delta_throttle_ms: d_delta_throttle_ms(),
            heartbeat_interval_secs: d_heartbeat_interval_secs(),
            heartbeat_timeout_secs: d_heartbeat_timeout_secs(),
            replay_buffer_size: d_replay_buffer_size(),
            subscriber_buffer_size: d_subscriber_buffer_size(),
        }
    }
}

fn d_delta_throttle_ms() -> u64 {
    150
}
fn d_heartbeat_interval_secs() -> u64 {
    30
}
fn d_heartbeat_timeout_secs() -> u64 {
    60
}
fn d_replay_buffer_size() -> usize {
    1_000
}
fn d_subscriber_buffer_size() -> usize {
    256
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_delta_throttle_is_150ms() {
        assert_eq!(BroadcastConfig::default().delta_throttle_ms, 150);
    }

    #[test]
    fn heartbeat_timeout_is_twice_interval() {
        let cfg = BroadcastConfig::default();
        assert_eq!(cfg.heartbeat_timeout_secs, cfg.heartbeat_interval_secs * 2);
    }
}
