//! Memory-context formatting for LLM prompts.
//!
//! Sections are ordered for lost-in-middle placement: facts at the top,
//! recent dialog at the bottom, where models attend best.

use crate::context::ReadContext;

/// Literal returned when nothing at all was recalled.
pub const EMPTY_CONTEXT: &str = "没有找到相关的记忆信息。";

/// Render the retrieval results as the Markdown memory context.
///
/// Order: `## 用户事实` → `## 工作记忆` → `## 相关事件` → `## 近期对话`.
/// Empty sections are omitted entirely.
pub fn format_memory_context(ctx: &ReadContext) -> String {
    let mut parts: Vec<String> = Vec::new();

    if !ctx.facts.is_empty() {
        parts.push("## 用户事实".to_string());
        for fact in &ctx.facts {
            parts.push(format!(
                "- [{}] {}",
                fact.created_at.format("%Y-%m-%d"),
                fact.content
            ));
        }
    }

    if !ctx.working.is_empty() {
        parts.push("\n## 工作记忆".to_string());
        for memory in &ctx.working {
            parts.push(format!(
                "- [{}] {}",
                memory.created_at.format("%Y-%m-%d"),
                memory.content
            ));
        }
    }

    if !ctx.events.is_empty() {
        parts.push("\n## 相关事件".to_string());
        for event in &ctx.events {
            parts.push(format!(
                "- [{}] {} {} {}",
                event.created_at.format("%Y-%m-%d"),
                event.argument1,
                event.trigger_word,
                event.argument2
            ));
        }
    }

    if !ctx.short_term.is_empty() {
        parts.push("\n## 近期对话".to_string());
        for msg in ctx.short_term.iter() {
            parts.push(format!("- [{}] {}", msg.speaker(), msg.content));
        }
    }

    if parts.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }

    parts.join("\n")
}
