//! Pure decision function over [`RuntimeContext`] that tells the executor
//! whether to keep running, suspend for a confirmation/clarification, or
//! stop the session — plus an independent, non-blocking cost ladder built
//! on the same per-model pricing config the donor's run-cost accounting
//! used (`ModelPricing::estimate_cost`).

use std::time::Duration;

use sa_domain::model::{BacktrackDecision, RuntimeContext};

/// Configuration knobs; all have defaults matching the documented contract.
#[derive(Debug, Clone)]
pub struct TerminatorConfig {
    pub max_turns: u32,
    pub max_duration: Duration,
    pub idle_timeout: Duration,
    pub consecutive_failure_limit: u32,
    pub long_run_threshold: u32,
    pub cost_warn_usd: f64,
    pub cost_confirm_usd: f64,
    pub cost_urgent_usd: f64,
}

impl Default for TerminatorConfig {
    fn default() -> Self {
        Self {
            max_turns: 50,
            max_duration: Duration::from_secs(30 * 60),
            idle_timeout: Duration::from_secs(5 * 60),
            consecutive_failure_limit: 3,
            long_run_threshold: 20,
            cost_warn_usd: 0.50,
            cost_confirm_usd: 2.00,
            cost_urgent_usd: 10.00,
        }
    }
}

/// What the terminator wants the executor to do next. `Continue` carries no
/// cost signal; `CostSignal` rides alongside a `Continue` (non-blocking) or
/// is folded into a `Suspend` for the confirm tiers.
#[derive(Debug, Clone, PartialEq)]
pub enum HaltDecision {
    Continue,
    Stop { reason: StopReason },
    Suspend { reason: SuspendReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    ModelEnd,
    UserStop,
    MaxTurns,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspendReason {
    ConsecutiveFailures,
    BacktrackExhaustedConfirm,
    IntentClarifyRequest,
    LongRunningConfirm,
    CostLimitConfirm,
    CostUrgentConfirm,
}

/// Advisory cost-ladder signal, independent of `HaltDecision` — it never by
/// itself forces termination; `cost_limit_confirm`/`cost_urgent_confirm`
/// only fire through the ordered halt checks below, and `CostWarn` is purely
/// informational.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CostSignal {
    None,
    Warn,
    Confirm,
    Urgent,
}

/// Snapshot of timing/cost inputs the terminator needs but that don't live
/// on `RuntimeContext` itself (wall clock, idle gap, running cost, model
/// finish reason, unresolved tool_use state, user-stop flag).
#[derive(Debug, Clone)]
pub struct TerminationInputs<'a> {
    pub ctx: &'a RuntimeContext,
    pub elapsed: Duration,
    pub idle_for: Duration,
    pub usage_usd: f64,
    pub pricing_known: bool,
    pub model_finish_reason: Option<&'a str>,
    pub has_unresolved_tool_use: bool,
    pub user_requested_stop: bool,
}

#[derive(Debug, Default, Clone)]
pub struct AdaptiveTerminator {
    config: TerminatorConfig,
}

impl From<&sa_domain::config::TerminatorConfig> for TerminatorConfig {
    /// The persisted config nests cost thresholds under `CostLadderConfig`
    /// and stores durations as raw seconds; this flattens it into the shape
    /// the runtime arbiter actually evaluates against.
    fn from(cfg: &sa_domain::config::TerminatorConfig) -> Self {
        Self {
            max_turns: cfg.max_turns,
            max_duration: Duration::from_secs(cfg.max_duration_secs),
            idle_timeout: Duration::from_secs(cfg.idle_timeout_secs),
            consecutive_failure_limit: cfg.consecutive_failures_threshold,
            long_run_threshold: cfg.long_run_threshold,
            cost_warn_usd: cfg.cost_ladder.warn_threshold_usd,
            cost_confirm_usd: cfg.cost_ladder.confirm_threshold_usd,
            cost_urgent_usd: cfg.cost_ladder.urgent_threshold_usd,
        }
    }
}

impl AdaptiveTerminator {
    pub fn new(config: TerminatorConfig) -> Self {
        Self { config }
    }

    /// Run the eight ordered halt checks, in the documented order. The first
    /// check that fires wins; later ones are not evaluated.
    pub fn evaluate(&self, input: &TerminationInputs<'_>) -> HaltDecision {
        let ctx = input.ctx;

        if input.model_finish_reason == Some("end_turn") && !input.has_unresolved_tool_use {
            return HaltDecision::Stop {
                reason: StopReason::ModelEnd,
            };
        }

        if input.user_requested_stop {
            return HaltDecision::Stop {
                reason: StopReason::UserStop,
            };
        }

        if ctx.turns() >= self.config.max_turns {
            return HaltDecision::Stop {
                reason: StopReason::MaxTurns,
            };
        }

        if input.elapsed >= self.config.max_duration || input.idle_for >= self.config.idle_timeout {
            return HaltDecision::Stop {
                reason: StopReason::Timeout,
            };
        }

        if ctx.consecutive_failures >= self.config.consecutive_failure_limit {
            return HaltDecision::Suspend {
                reason: SuspendReason::ConsecutiveFailures,
            };
        }

        if ctx.backtracks_exhausted {
            return HaltDecision::Suspend {
                reason: SuspendReason::BacktrackExhaustedConfirm,
            };
        }

        if ctx.last_terminator_decision.as_deref() == Some("intent_clarify")
            || matches!(
                ctx.last_terminator_decision.as_deref(),
                Some(d) if d == format!("{:?}", BacktrackDecision::IntentClarify)
            )
        {
            return HaltDecision::Suspend {
                reason: SuspendReason::IntentClarifyRequest,
            };
        }

        if ctx.turns() == self.config.long_run_threshold && !ctx.long_running_confirmed {
            return HaltDecision::Suspend {
                reason: SuspendReason::LongRunningConfirm,
            };
        }

        // Cost ladder is independent of the above: it can itself suspend at
        // the confirm/urgent tiers, but never forces a `Stop`.
        match self.cost_signal(input) {
            CostSignal::Urgent => HaltDecision::Suspend {
                reason: SuspendReason::CostUrgentConfirm,
            },
            CostSignal::Confirm => HaltDecision::Suspend {
                reason: SuspendReason::CostLimitConfirm,
            },
            CostSignal::Warn | CostSignal::None => HaltDecision::Continue,
        }
    }

    /// The cost ladder alone, for callers that want the advisory signal
    /// without running the full ordered check (e.g. to emit `cost_warn`
    /// inline while the turn otherwise continues).
    pub fn cost_signal(&self, input: &TerminationInputs<'_>) -> CostSignal {
        if !input.pricing_known {
            return CostSignal::None;
        }
        if input.usage_usd >= self.config.cost_urgent_usd {
            CostSignal::Urgent
        } else if input.usage_usd >= self.config.cost_confirm_usd {
            CostSignal::Confirm
        } else if input.usage_usd >= self.config.cost_warn_usd {
            CostSignal::Warn
        } else {
            CostSignal::None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::model::RuntimeContext;

    fn inputs(ctx: &RuntimeContext) -> TerminationInputs<'_> {
        TerminationInputs {
            ctx,
            elapsed: Duration::from_secs(1),
            idle_for: Duration::from_secs(0),
            usage_usd: 0.0,
            pricing_known: true,
            model_finish_reason: None,
            has_unresolved_tool_use: false,
            user_requested_stop: false,
        }
    }

    #[test]
    fn model_end_turn_stops_before_anything_else() {
        let ctx = RuntimeContext::default();
        let mut input = inputs(&ctx);
        input.model_finish_reason = Some("end_turn");
        let decision = AdaptiveTerminator::default().evaluate(&input);
        assert_eq!(
            decision,
            HaltDecision::Stop {
                reason: StopReason::ModelEnd
            }
        );
    }

    #[test]
    fn unresolved_tool_use_suppresses_model_end() {
        let ctx = RuntimeContext::default();
        let mut input = inputs(&ctx);
        input.model_finish_reason = Some("end_turn");
        input.has_unresolved_tool_use = true;
        let decision = AdaptiveTerminator::default().evaluate(&input);
        assert_ne!(
            decision,
            HaltDecision::Stop {
                reason: StopReason::ModelEnd
            }
        );
    }

    #[test]
    fn user_stop_wins_over_max_turns() {
        let mut ctx = RuntimeContext::default();
        for i in 0..100 {
            ctx.messages
                .push(sa_domain::tool::Message::assistant(format!("a{i}"), "x"));
        }
        let mut input = inputs(&ctx);
        input.user_requested_stop = true;
        let decision = AdaptiveTerminator::default().evaluate(&input);
        assert_eq!(
            decision,
            HaltDecision::Stop {
                reason: StopReason::UserStop
            }
        );
    }

    #[test]
    fn consecutive_failures_suspends_before_backtrack_exhaustion_check() {
        let mut ctx = RuntimeContext::default();
        ctx.consecutive_failures = 3;
        ctx.backtracks_exhausted = true;
        let decision = AdaptiveTerminator::default().evaluate(&inputs(&ctx));
        assert_eq!(
            decision,
            HaltDecision::Suspend {
                reason: SuspendReason::ConsecutiveFailures
            }
        );
    }

    #[test]
    fn backtrack_exhaustion_suspends_when_not_failing_consecutively() {
        let mut ctx = RuntimeContext::default();
        ctx.backtracks_exhausted = true;
        let decision = AdaptiveTerminator::default().evaluate(&inputs(&ctx));
        assert_eq!(
            decision,
            HaltDecision::Suspend {
                reason: SuspendReason::BacktrackExhaustedConfirm
            }
        );
    }

    #[test]
    fn long_running_confirm_fires_exactly_at_threshold_once() {
        let mut ctx = RuntimeContext::default();
        for i in 0..20 {
            ctx.messages
                .push(sa_domain::tool::Message::assistant(format!("a{i}"), "x"));
        }
        let decision = AdaptiveTerminator::default().evaluate(&inputs(&ctx));
        assert_eq!(
            decision,
            HaltDecision::Suspend {
                reason: SuspendReason::LongRunningConfirm
            }
        );

        ctx.long_running_confirmed = true;
        let decision2 = AdaptiveTerminator::default().evaluate(&inputs(&ctx));
        assert_eq!(decision2, HaltDecision::Continue);
    }

    #[test]
    fn cost_ladder_never_forces_a_stop() {
        let ctx = RuntimeContext::default();
        let mut input = inputs(&ctx);
        input.usage_usd = 1000.0;
        let decision = AdaptiveTerminator::default().evaluate(&input);
        assert!(matches!(decision, HaltDecision::Suspend { .. }));
    }

    #[test]
    fn cost_ladder_skipped_when_pricing_unknown() {
        let ctx = RuntimeContext::default();
        let mut input = inputs(&ctx);
        input.usage_usd = 1000.0;
        input.pricing_known = false;
        let decision = AdaptiveTerminator::default().evaluate(&input);
        assert_eq!(decision, HaltDecision::Continue);
    }

    #[test]
    fn cost_warn_tier_is_non_blocking() {
        let ctx = RuntimeContext::default();
        let mut input = inputs(&ctx);
        input.usage_usd = 0.75;
        let term = AdaptiveTerminator::default();
        assert_eq!(term.cost_signal(&input), CostSignal::Warn);
        assert_eq!(term.evaluate(&input), HaltDecision::Continue);
    }
}

#[cfg(test)]
mod config_conversion_tests {
    use super::*;

    #[test]
    fn converts_nested_cost_ladder_into_flat_fields() {
        let persisted = sa_domain::config::TerminatorConfig::default();
        let runtime: TerminatorConfig = (&persisted).into();
        assert_eq!(runtime.cost_warn_usd, persisted.cost_ladder.warn_threshold_usd);
        assert_eq!(runtime.max_turns, persisted.max_turns);
        assert_eq!(runtime.idle_timeout, Duration::from_secs(persisted.idle_timeout_secs));
    }
}
