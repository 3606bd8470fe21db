//! Recovery from a classified business failure.
//!
//! Mirrors the compaction flow's shape (ask the model first, fall back to a
//! deterministic rule if the model call fails or is unavailable) but applied
//! to picking a recovery strategy instead of summarizing a transcript: one
//! fingerprinted failure in, one [`BacktrackDecision`] out, with monotonic
//! escalation per fingerprint and a rewrite of the message history so the
//! next model call sees a contrastive reflection instead of the raw failure.

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use sa_domain::model::{BacktrackDecision, ErrorClassification, RuntimeContext};
use sa_domain::tool::{ContentPart, Message, Role};
use sa_providers::traits::{ChatRequest, LlmProvider};

/// Identifies "the same failure happening again" across turns: tool name +
/// canonicalized input + error kind. Canonicalization here means
/// "re-serialize through `serde_json::Value`", which normalizes key order
/// and whitespace without needing a bespoke canonical-JSON crate.
pub fn fingerprint(tool_name: &str, input: &serde_json::Value, classification: &ErrorClassification) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update(b"\0");
    hasher.update(input.to_string().as_bytes());
    hasher.update(b"\0");
    hasher.update(format!("{classification:?}").as_bytes());
    hex::encode(hasher.finalize())
}

/// One recorded attempt against a fingerprint, kept so consecutive
/// same-fingerprint failures can be compressed into a single reflection
/// entry instead of repeating the raw `tool_result` for each.
#[derive(Debug, Clone)]
struct Attempt {
    decision: BacktrackDecision,
    summary: String,
}

/// Tracks attempted strategies per fingerprint across a whole session so
/// escalation is monotonic: once `ToolReplace` has been tried for a given
/// failure, a later attempt at the same fingerprint never proposes
/// `ParamAdjust` again.
#[derive(Debug, Default)]
pub struct BacktrackManager {
    attempts: HashMap<String, Vec<Attempt>>,
}

impl BacktrackManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide the next strategy for a fingerprinted failure: ask the model
    /// for a proposal first (when a provider is given), then fall back to
    /// the next rung of the deterministic ladder the model either declined
    /// to use or couldn't be reached for.
    pub async fn decide(
        &mut self,
        provider: Option<&dyn LlmProvider>,
        fp: &str,
        tool_name: &str,
        failure_summary: &str,
    ) -> BacktrackDecision {
        let next_ladder_rung = self.next_rung(fp);

        let decision = if let Some(provider) = provider {
            match self.propose_via_model(provider, tool_name, failure_summary, next_ladder_rung).await {
                Some(proposed) if proposed >= next_ladder_rung => proposed,
                _ => next_ladder_rung,
            }
        } else {
            next_ladder_rung
        };

        self.attempts.entry(fp.to_string()).or_default().push(Attempt {
            decision,
            summary: failure_summary.to_string(),
        });

        decision
    }

    /// The weakest ladder rung not yet attempted for this fingerprint, or
    /// `GiveUp` if every rung has already been tried (exhaustion).
    fn next_rung(&self, fp: &str) -> BacktrackDecision {
        let tried_max = self
            .attempts
            .get(fp)
            .and_then(|a| a.iter().map(|a| a.decision).max());
        match tried_max {
            None => BacktrackDecision::LADDER[0],
            Some(last) => BacktrackDecision::LADDER
                .iter()
                .copied()
                .find(|d| *d > last)
                .unwrap_or(BacktrackDecision::GiveUp),
        }
    }

    /// `true` once the ladder has bottomed out at `GiveUp` for this
    /// fingerprint — the executor sets `ctx.backtracks_exhausted` on this.
    pub fn is_exhausted(&self, fp: &str) -> bool {
        matches!(
            self.attempts.get(fp).and_then(|a| a.last()).map(|a| a.decision),
            Some(BacktrackDecision::GiveUp)
        )
    }

    async fn propose_via_model(
        &self,
        provider: &dyn LlmProvider,
        tool_name: &str,
        failure_summary: &str,
        floor: BacktrackDecision,
    ) -> Option<BacktrackDecision> {
        let prompt = format!(
            "Tool '{tool_name}' failed: {failure_summary}\n\
             Propose exactly one recovery strategy, one of: \
             param_adjust, tool_replace, context_enrich, plan_replan, intent_clarify, give_up.\n\
             Respond with only the strategy name."
        );
        let req = ChatRequest {
            messages: vec![Message::user("backtrack-propose", prompt)],
            tools: vec![],
            temperature: Some(0.0),
            max_tokens: Some(16),
            json_mode: false,
            model: None,
        };
        let resp = provider.chat(req).await.ok()?;
        let parsed = parse_decision(&resp.content)?;
        Some(parsed.max(floor))
    }

    /// Rewrite message history after a backtrack: strip the failed
    /// `tool_result` content block and inject a contrastive reflection
    /// summary in its place. Consecutive failures against the same
    /// fingerprint are compressed into one reflection entry rather than one
    /// per attempt.
    pub fn apply_reflection(&self, ctx: &mut RuntimeContext, fp: &str, tool_use_id: &str, tool_name: &str) {
        for message in ctx.messages.iter_mut() {
            if message.role != Role::Tool {
                continue;
            }
            if let sa_domain::tool::MessageContent::Parts(parts) = &mut message.content {
                parts.retain(|p| !matches!(p, ContentPart::ToolResult { tool_use_id: id, .. } if id == tool_use_id));
            }
        }

        let attempts = self.attempts.get(fp).map(|a| a.len()).unwrap_or(0);
        let reflection = if attempts <= 1 {
            format!(
                "Reflection: the previous call to '{tool_name}' failed. \
                 Consider a different approach before retrying."
            )
        } else {
            format!(
                "Reflection: '{tool_name}' has now failed {attempts} times in a row \
                 with the same underlying problem. Escalate to a materially \
                 different approach rather than repeating the same call."
            )
        };

        // Compress consecutive same-fingerprint failures into one entry:
        // drop whatever reflection this fingerprint left behind last time
        // before pushing the updated one.
        let prefix = format!("reflection-{fp}-");
        ctx.messages.retain(|m| !(m.role == Role::System && m.id.starts_with(&prefix)));

        ctx.messages.push(Message::system(
            format!("reflection-{fp}-{attempts}"),
            reflection,
        ));
    }
}

fn parse_decision(text: &str) -> Option<BacktrackDecision> {
    match text.trim().to_lowercase().as_str() {
        "param_adjust" => Some(BacktrackDecision::ParamAdjust),
        "tool_replace" => Some(BacktrackDecision::ToolReplace),
        "context_enrich" => Some(BacktrackDecision::ContextEnrich),
        "plan_replan" => Some(BacktrackDecision::PlanReplan),
        "intent_clarify" => Some(BacktrackDecision::IntentClarify),
        "give_up" => Some(BacktrackDecision::GiveUp),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::model::{BusinessKind, ErrorClassification};

    fn classification() -> ErrorClassification {
        ErrorClassification::Business {
            kind: BusinessKind::BadParam,
        }
    }

    #[test]
    fn fingerprint_is_stable_across_key_order() {
        let a = fingerprint("write_file", &serde_json::json!({"path": "a", "content": "b"}), &classification());
        let b = fingerprint("write_file", &serde_json::json!({"content": "b", "path": "a"}), &classification());
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_by_tool() {
        let input = serde_json::json!({"path": "a"});
        let a = fingerprint("write_file", &input, &classification());
        let b = fingerprint("read_file", &input, &classification());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn escalates_along_the_ladder_without_a_model() {
        let mut mgr = BacktrackManager::new();
        let fp = "fp1";
        let d1 = mgr.decide(None, fp, "write_file", "bad param").await;
        assert_eq!(d1, BacktrackDecision::ParamAdjust);
        let d2 = mgr.decide(None, fp, "write_file", "bad param again").await;
        assert_eq!(d2, BacktrackDecision::ToolReplace);
        let d3 = mgr.decide(None, fp, "write_file", "still bad").await;
        assert_eq!(d3, BacktrackDecision::ContextEnrich);
    }

    #[tokio::test]
    async fn exhausts_at_give_up() {
        let mut mgr = BacktrackManager::new();
        let fp = "fp2";
        for _ in 0..BacktrackDecision::LADDER.len() {
            mgr.decide(None, fp, "t", "fail").await;
        }
        assert!(mgr.is_exhausted(fp));
    }

    #[tokio::test]
    async fn escalation_is_monotonic_never_steps_backward() {
        let mut mgr = BacktrackManager::new();
        let fp = "fp3";
        mgr.decide(None, fp, "t", "fail").await;
        mgr.decide(None, fp, "t", "fail").await;
        let third = mgr.decide(None, fp, "t", "fail").await;
        assert!(third > BacktrackDecision::ParamAdjust);
    }

    #[test]
    fn apply_reflection_strips_failed_tool_result_and_appends_summary() {
        let mgr = BacktrackManager::new();
        let mut ctx = RuntimeContext::default();
        let mut msg = Message::tool_result("m1", "call-1", "boom");
        msg.content = sa_domain::tool::MessageContent::Parts(vec![ContentPart::ToolResult {
            index: 0,
            tool_use_id: "call-1".into(),
            content: "boom".into(),
            is_error: true,
        }]);
        ctx.messages.push(msg);

        mgr.apply_reflection(&mut ctx, "fp4", "call-1", "write_file");

        let has_result = ctx.messages.iter().any(|m| {
            matches!(&m.content, sa_domain::tool::MessageContent::Parts(parts)
                if parts.iter().any(|p| matches!(p, ContentPart::ToolResult { tool_use_id, .. } if tool_use_id == "call-1")))
        });
        assert!(!has_result);
        assert!(ctx.messages.iter().any(|m| m.role == Role::System));
    }

    #[tokio::test]
    async fn consecutive_same_fingerprint_failures_compress_to_one_reflection() {
        let mut mgr = BacktrackManager::new();
        let mut ctx = RuntimeContext::default();
        let fp = "fp5";

        for i in 0..3 {
            mgr.decide(None, fp, "write_file", "bad param").await;
            mgr.apply_reflection(&mut ctx, fp, &format!("call-{i}"), "write_file");
        }

        let reflections: Vec<&Message> = ctx
            .messages
            .iter()
            .filter(|m| m.role == Role::System && m.id.starts_with(&format!("reflection-{fp}-")))
            .collect();
        assert_eq!(reflections.len(), 1, "expected exactly one surviving reflection entry");
    }
}
