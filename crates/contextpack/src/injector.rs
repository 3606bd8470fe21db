//! Three-phase system prompt assembly.
//!
//! Nine injectors run in a fixed order across three phases — stable
//! (system role, history summary, tool definitions, skill focus), session
//! (user memory, playbook hint, knowledge context), and dynamic (plan/todo,
//! page editor) — and each tags its output with the [`CacheStrategy`] of
//! its phase. [`compose`] concatenates every non-empty fragment
//! stable-first so a provider's prompt cache prefix stays as long as
//! possible turn over turn, mirroring [`crate::builder::ContextPackBuilder`]'s
//! deterministic, pure-function shape but replacing its flat
//! [`crate::builder::SessionMode`] switch with per-turn fragments driven by
//! the current [`RuntimeContext`] and [`IntentResult`].

use sa_domain::model::{CacheStrategy, InjectorFragment, InjectorPhase, IntentResult, RuntimeContext};
use sa_domain::tool::ToolDefinition;

/// Everything an injector might need; every field besides `ctx`/`intent` is
/// optional because not every session has a plan, memory facts, or an open
/// page editor buffer.
pub struct InjectorInput<'a> {
    pub ctx: &'a RuntimeContext,
    pub intent: &'a IntentResult,
    pub system_role: &'a str,
    pub history_summary: Option<&'a str>,
    pub tool_definitions: &'a [ToolDefinition],
    pub skills_index: Option<&'a str>,
    pub user_memory: Option<&'a str>,
    pub playbook_hint: Option<&'a str>,
    pub knowledge_context: Option<&'a str>,
    pub page_editor: Option<&'a str>,
}

fn phase_strategy(phase: InjectorPhase) -> CacheStrategy {
    match phase {
        InjectorPhase::SystemRole
        | InjectorPhase::HistorySummary
        | InjectorPhase::ToolDefinitions
        | InjectorPhase::SkillFocus => CacheStrategy::Stable,
        InjectorPhase::UserMemory | InjectorPhase::PlaybookHint | InjectorPhase::KnowledgeContext => {
            CacheStrategy::Session
        }
        InjectorPhase::PlanTodo | InjectorPhase::PageEditor => CacheStrategy::Dynamic,
    }
}

fn fragment(phase: InjectorPhase, text: String) -> Option<InjectorFragment> {
    if text.trim().is_empty() {
        return None;
    }
    Some(InjectorFragment {
        phase,
        strategy: phase_strategy(phase),
        text,
    })
}

fn render_tool_definitions(defs: &[ToolDefinition]) -> String {
    if defs.is_empty() {
        return String::new();
    }
    let mut out = String::from("Available tools:\n");
    for def in defs {
        out.push_str(&format!("- {}: {}\n", def.name, def.description));
    }
    out
}

fn render_skill_focus(skills_index: Option<&str>, intent: &IntentResult) -> String {
    let Some(index) = skills_index else { return String::new() };
    if intent.relevant_skill_groups.is_empty() {
        return String::new();
    }
    format!(
        "Relevant skills for this request ({}):\n{}",
        intent.relevant_skill_groups.iter().cloned().collect::<Vec<_>>().join(", "),
        index
    )
}

fn render_plan_todo(ctx: &RuntimeContext) -> String {
    let Some(plan) = &ctx.plan else { return String::new() };
    if plan.items.is_empty() {
        return String::new();
    }
    let mut out = String::from("Current plan:\n");
    for item in &plan.items {
        let mark = if item.done { "x" } else { " " };
        out.push_str(&format!("- [{mark}] {}\n", item.description));
    }
    out
}

/// Run all nine injectors and concatenate their fragments stable-first,
/// then session, then dynamic. Returns the final prompt text and the
/// per-fragment breakdown (useful for tests and tracing).
pub fn compose(input: &InjectorInput<'_>) -> (String, Vec<InjectorFragment>) {
    let mut fragments = Vec::new();

    // Phase 1: stable.
    fragments.extend(fragment(InjectorPhase::SystemRole, input.system_role.to_string()));
    fragments.extend(fragment(
        InjectorPhase::HistorySummary,
        input.history_summary.unwrap_or_default().to_string(),
    ));
    fragments.extend(fragment(
        InjectorPhase::ToolDefinitions,
        render_tool_definitions(input.tool_definitions),
    ));
    fragments.extend(fragment(
        InjectorPhase::SkillFocus,
        render_skill_focus(input.skills_index, input.intent),
    ));

    // Phase 2: session.
    fragments.extend(fragment(
        InjectorPhase::UserMemory,
        input.user_memory.unwrap_or_default().to_string(),
    ));
    fragments.extend(fragment(
        InjectorPhase::PlaybookHint,
        input.playbook_hint.unwrap_or_default().to_string(),
    ));
    fragments.extend(fragment(
        InjectorPhase::KnowledgeContext,
        input.knowledge_context.unwrap_or_default().to_string(),
    ));

    // Phase 3: dynamic.
    fragments.extend(fragment(InjectorPhase::PlanTodo, render_plan_todo(input.ctx)));
    fragments.extend(fragment(
        InjectorPhase::PageEditor,
        input.page_editor.unwrap_or_default().to_string(),
    ));

    let text = fragments
        .iter()
        .map(|f| f.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");

    (text, fragments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sa_domain::model::{Plan, PlanItem};

    fn empty_intent() -> IntentResult {
        IntentResult::fallback()
    }

    #[test]
    fn stable_fragments_precede_session_and_dynamic() {
        let ctx = RuntimeContext::default();
        let intent = empty_intent();
        let input = InjectorInput {
            ctx: &ctx,
            intent: &intent,
            system_role: "You are an assistant.",
            history_summary: None,
            tool_definitions: &[],
            skills_index: None,
            user_memory: Some("likes concise answers"),
            playbook_hint: None,
            knowledge_context: None,
            page_editor: None,
        };
        let (text, fragments) = compose(&input);
        let role_pos = text.find("You are an assistant.").unwrap();
        let memory_pos = text.find("likes concise answers").unwrap();
        assert!(role_pos < memory_pos);
        assert_eq!(fragments[0].strategy, CacheStrategy::Stable);
    }

    #[test]
    fn empty_optional_sections_are_skipped() {
        let ctx = RuntimeContext::default();
        let intent = empty_intent();
        let input = InjectorInput {
            ctx: &ctx,
            intent: &intent,
            system_role: "role",
            history_summary: None,
            tool_definitions: &[],
            skills_index: None,
            user_memory: None,
            playbook_hint: None,
            knowledge_context: None,
            page_editor: None,
        };
        let (_text, fragments) = compose(&input);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].phase, InjectorPhase::SystemRole);
    }

    #[test]
    fn plan_todo_renders_checked_and_unchecked_items() {
        let mut ctx = RuntimeContext::default();
        ctx.plan = Some(Plan {
            items: vec![
                PlanItem { id: "1".into(), description: "first".into(), done: true },
                PlanItem { id: "2".into(), description: "second".into(), done: false },
            ],
        });
        let intent = empty_intent();
        let input = InjectorInput {
            ctx: &ctx,
            intent: &intent,
            system_role: "role",
            history_summary: None,
            tool_definitions: &[],
            skills_index: None,
            user_memory: None,
            playbook_hint: None,
            knowledge_context: None,
            page_editor: None,
        };
        let (text, fragments) = compose(&input);
        assert!(text.contains("[x] first"));
        assert!(text.contains("[ ] second"));
        assert!(fragments.iter().any(|f| f.phase == InjectorPhase::PlanTodo));
    }
}
