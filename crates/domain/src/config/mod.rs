mod backtrack;
mod broadcast;
mod compaction;
mod context;
mod intent;
mod llm;
mod observability;
mod pruning;
mod server;
mod sessions;
mod snapshot;
mod terminator;
mod workspace;

pub use backtrack::*;
pub use broadcast::*;
pub use compaction::*;
pub use context::*;
pub use intent::*;
pub use llm::*;
pub use observability::*;
pub use pruning::*;
pub use server::*;
pub use sessions::*;
pub use snapshot::*;
pub use terminator::*;
pub use workspace::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub pruning: PruningConfig,
    #[serde(default)]
    pub compaction: CompactionConfig,
    #[serde(default)]
    pub memory_lifecycle: MemoryLifecycleConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    /// AdaptiveTerminator halt thresholds and cost ladder.
    #[serde(default)]
    pub terminator: TerminatorConfig,
    /// SnapshotStore directory, expiry, and disk floor.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// BacktrackManager ceiling and propose-call timeout.
    #[serde(default)]
    pub backtrack: BacktrackConfig,
    /// IntentAnalyzer four-layer cache tunables.
    #[serde(default)]
    pub intent: IntentConfig,
    /// EventBroadcaster throttling, heartbeat, and replay tunables.
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good. Called once at
    /// startup, before the first session is allowed to begin — a
    /// misconfigured terminator/snapshot/backtrack tree must never surface
    /// mid-turn as a confusing runtime error.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        // Server port must be non-zero.
        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        // Server host must not be empty.
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        // Warn when no LLM providers are configured.
        if self.llm.providers.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.providers".into(),
                message: "no LLM providers configured".into(),
            });
        }

        // Track seen provider IDs for duplicate detection.
        let mut seen_ids: HashSet<&str> = HashSet::new();

        // Validate each provider.
        for (i, provider) in self.llm.providers.iter().enumerate() {
            if provider.id.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].id"),
                    message: "provider id must not be empty".into(),
                });
            }
            if provider.base_url.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: "provider base_url must not be empty".into(),
                });
            }

            // Provider base_url must be a valid URL.
            if !provider.base_url.is_empty()
                && !provider.base_url.starts_with("http://")
                && !provider.base_url.starts_with("https://")
            {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("llm.providers[{i}].base_url"),
                    message: format!(
                        "base_url must start with http:// or https:// (got \"{}\")",
                        provider.base_url
                    ),
                });
            }

            // Duplicate provider ID detection.
            if !provider.id.is_empty() && !seen_ids.insert(&provider.id) {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("llm.providers[{i}].id"),
                    message: format!(
                        "duplicate provider id \"{}\" — later provider will shadow earlier one",
                        provider.id
                    ),
                });
            }

            // Auth completeness: modes that require credentials must have
            // at least one of env, key, or non-empty keys.
            let needs_credentials = matches!(
                provider.auth.mode,
                AuthMode::ApiKey | AuthMode::QueryParam
            );
            if needs_credentials {
                let has_env = provider.auth.env.as_ref().is_some_and(|v| !v.is_empty());
                let has_key = provider.auth.key.as_ref().is_some_and(|v| !v.is_empty());
                let has_keys = !provider.auth.keys.is_empty();
                if !has_env && !has_key && !has_keys {
                    errors.push(ConfigError {
                        severity: ConfigSeverity::Error,
                        field: format!("llm.providers[{i}].auth"),
                        message: format!(
                            "provider \"{}\" uses {:?} auth mode but has no auth.env, auth.key, or auth.keys configured",
                            provider.id, provider.auth.mode
                        ),
                    });
                }
            }
        }

        // CORS: warn if wildcard is used.
        if self.server.cors.allowed_origins.len() == 1
            && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        // Rate limit: if set, both values must be > 0.
        if let Some(rl) = &self.server.rate_limit {
            if rl.requests_per_second == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.requests_per_second".into(),
                    message: "requests_per_second must be greater than 0".into(),
                });
            }
            if rl.burst_size == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "server.rate_limit.burst_size".into(),
                    message: "burst_size must be greater than 0".into(),
                });
            }
        }

        // ── AdaptiveTerminator ───────────────────────────────────────
        if self.terminator.max_turns == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "terminator.max_turns".into(),
                message: "max_turns must be greater than 0".into(),
            });
        }
        let ladder = &self.terminator.cost_ladder;
        if !(ladder.warn_threshold_usd < ladder.confirm_threshold_usd
            && ladder.confirm_threshold_usd < ladder.urgent_threshold_usd)
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "terminator.cost_ladder".into(),
                message: format!(
                    "cost ladder must be strictly increasing warn < confirm < urgent (got {}, {}, {})",
                    ladder.warn_threshold_usd, ladder.confirm_threshold_usd, ladder.urgent_threshold_usd
                ),
            });
        }
        if self.terminator.long_run_threshold == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "terminator.long_run_threshold".into(),
                message: "long_run_threshold of 0 re-prompts on every turn".into(),
            });
        }

        // ── SnapshotStore ────────────────────────────────────────────
        if self.snapshot.expires_after_hours == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "snapshot.expires_after_hours".into(),
                message: "expires_after_hours must be greater than 0".into(),
            });
        }
        if self.snapshot.disk_floor_bytes == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "snapshot.disk_floor_bytes".into(),
                message: "disk_floor_bytes of 0 disables the SnapshotFull safety check".into(),
            });
        }

        // ── BacktrackManager ─────────────────────────────────────────
        if self.backtrack.total_backtrack_ceiling == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "backtrack.total_backtrack_ceiling".into(),
                message: "total_backtrack_ceiling must be greater than 0".into(),
            });
        }

        // ── IntentAnalyzer ───────────────────────────────────────────
        if !(0.0..=1.0).contains(&self.intent.semantic_similarity_threshold) {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "intent.semantic_similarity_threshold".into(),
                message: "semantic_similarity_threshold must be within [0.0, 1.0]".into(),
            });
        }

        // ── EventBroadcaster ─────────────────────────────────────────
        if self.broadcast.heartbeat_timeout_secs <= self.broadcast.heartbeat_interval_secs {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "broadcast.heartbeat_timeout_secs".into(),
                message: "heartbeat_timeout_secs must exceed heartbeat_interval_secs or every tick trips the client disconnect".into(),
            });
        }
        if self.broadcast.subscriber_buffer_size == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "broadcast.subscriber_buffer_size".into(),
                message: "subscriber_buffer_size must be greater than 0".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: build a minimal valid Config.
    fn valid_config() -> Config {
        Config {
            server: ServerConfig {
                port: 3210,
                host: "127.0.0.1".into(),
                ..ServerConfig::default()
            },
            llm: LlmConfig {
                providers: vec![ProviderConfig {
                    id: "openai".into(),
                    kind: ProviderKind::OpenaiCompat,
                    base_url: "https://api.openai.com/v1".into(),
                    auth: AuthConfig {
                        mode: AuthMode::ApiKey,
                        env: Some("OPENAI_API_KEY".into()),
                        ..AuthConfig::default()
                    },
                    default_model: None,
                }],
                ..LlmConfig::default()
            },
            ..Config::default()
        }
    }

    /// Helper: find the first issue matching a field prefix.
    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues.iter().filter(|e| e.severity == ConfigSeverity::Error).collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    // ── Server checks ───────────────────────────────────────────────

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.port").expect("expected server.port error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn server_host_empty_is_error() {
        let mut cfg = valid_config();
        cfg.server.host = String::new();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.host").expect("expected server.host error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn provider_base_url_invalid_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].base_url = "ws://localhost:1234".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers[0].base_url")
            .expect("expected provider base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    // ── Provider auth completeness ──────────────────────────────────

    #[test]
    fn provider_api_key_mode_no_credentials_is_error() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].auth = AuthConfig {
            mode: AuthMode::ApiKey,
            env: None,
            key: None,
            keys: vec![],
            ..AuthConfig::default()
        };
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers[0].auth")
            .expect("expected auth error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
        assert!(issue.message.contains("no auth.env"));
    }

    #[test]
    fn provider_none_auth_mode_no_credentials_is_ok() {
        let mut cfg = valid_config();
        cfg.llm.providers[0].auth = AuthConfig {
            mode: AuthMode::None,
            env: None,
            key: None,
            keys: vec![],
            ..AuthConfig::default()
        };
        let issues = cfg.validate();
        assert!(
            find_issue(&issues, "llm.providers[0].auth").is_none(),
            "AuthMode::None should not require credentials"
        );
    }

    // ── Duplicate provider IDs ──────────────────────────────────────

    #[test]
    fn duplicate_provider_ids_is_warning() {
        let mut cfg = valid_config();
        let second = ProviderConfig {
            id: "openai".into(),
            kind: ProviderKind::OpenaiCompat,
            base_url: "https://api.openai.com/v1".into(),
            auth: AuthConfig {
                mode: AuthMode::ApiKey,
                env: Some("OPENAI_API_KEY_2".into()),
                ..AuthConfig::default()
            },
            default_model: None,
        };
        cfg.llm.providers.push(second);
        let issues = cfg.validate();
        let dup_issues: Vec<_> = issues
            .iter()
            .filter(|e| e.message.contains("duplicate provider id"))
            .collect();
        assert_eq!(dup_issues.len(), 1);
        assert_eq!(dup_issues[0].severity, ConfigSeverity::Warning);
    }

    // ── Rate limit validation ───────────────────────────────────────

    #[test]
    fn rate_limit_zero_rps_is_error() {
        let mut cfg = valid_config();
        cfg.server.rate_limit = Some(RateLimitConfig {
            requests_per_second: 0,
            burst_size: 100,
        });
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.rate_limit.requests_per_second")
            .expect("expected rps error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    // ── CORS wildcard warning ───────────────────────────────────────

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        let issue = find_issue(&issues, "server.cors.allowed_origins")
            .expect("expected CORS wildcard warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    // ── No providers warning ────────────────────────────────────────

    #[test]
    fn no_providers_is_warning() {
        let mut cfg = valid_config();
        cfg.llm.providers.clear();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "llm.providers")
            .expect("expected no-providers warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    // ── Terminator / cost ladder ─────────────────────────────────────

    #[test]
    fn terminator_max_turns_zero_is_error() {
        let mut cfg = valid_config();
        cfg.terminator.max_turns = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "terminator.max_turns").is_some());
    }

    #[test]
    fn cost_ladder_not_increasing_is_error() {
        let mut cfg = valid_config();
        cfg.terminator.cost_ladder.confirm_threshold_usd = 0.1;
        let issues = cfg.validate();
        let issue = find_issue(&issues, "terminator.cost_ladder")
            .expect("expected cost ladder ordering error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    // ── Snapshot store ────────────────────────────────────────────────

    #[test]
    fn snapshot_expiry_zero_is_error() {
        let mut cfg = valid_config();
        cfg.snapshot.expires_after_hours = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "snapshot.expires_after_hours").is_some());
    }

    // ── Backtrack manager ─────────────────────────────────────────────

    #[test]
    fn backtrack_ceiling_zero_is_error() {
        let mut cfg = valid_config();
        cfg.backtrack.total_backtrack_ceiling = 0;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "backtrack.total_backtrack_ceiling").is_some());
    }

    // ── Intent analyzer ───────────────────────────────────────────────

    #[test]
    fn intent_similarity_threshold_out_of_range_is_error() {
        let mut cfg = valid_config();
        cfg.intent.semantic_similarity_threshold = 1.5;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "intent.semantic_similarity_threshold").is_some());
    }

    // ── Broadcaster ───────────────────────────────────────────────────

    #[test]
    fn broadcast_heartbeat_timeout_must_exceed_interval() {
        let mut cfg = valid_config();
        cfg.broadcast.heartbeat_timeout_secs = cfg.broadcast.heartbeat_interval_secs;
        let issues = cfg.validate();
        assert!(find_issue(&issues, "broadcast.heartbeat_timeout_secs").is_some());
    }

    #[test]
    fn broadcast_defaults_are_valid() {
        let cfg = valid_config();
        let issues = cfg.validate();
        assert!(find_issue(&issues, "broadcast").is_none());
    }
}
