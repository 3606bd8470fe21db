use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SessionManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tunables for the session arena and its per-conversation busy lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Unique ID for this agent instance, surfaced on `SessionInfo`.
    #[serde(default = "d_agent_id")]
    pub agent_id: String,
    /// How many callers may queue behind the one active session per
    /// conversation before `ConversationBusy` is returned immediately.
    #[serde(default = "d_busy_queue_depth")]
    pub busy_queue_depth: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            agent_id: d_agent_id(),
            busy_queue_depth: d_busy_queue_depth(),
        }
    }
}

fn d_agent_id() -> String {
    "serial-agent".into()
}
fn d_busy_queue_depth() -> usize {
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_agent_id_is_stable() {
        assert_eq!(SessionsConfig::default().agent_id, "serial-agent");
    }
}
