//! Role agents used by the multi-agent strategy.
//!
//! Every agent wraps one LLM call and returns the uniform [`AgentResult`]
//! envelope, so the strategy can account tokens and cost without caring
//! which role produced them. Structured outputs (plan, review) ride in the
//! envelope's `output` field alongside the typed value.

mod coder;
mod planner;
mod reviewer;
mod tester;

pub use coder::CoderAgent;
pub use planner::PlannerAgent;
pub use reviewer::ReviewerAgent;
pub use tester::TesterAgent;

use crate::models::CodeChange;

/// Pulls the outermost JSON object out of an LLM reply, tolerating fences
/// and prose around it.
pub(crate) fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Compact file listing for review/test prompts. Contents are truncated
/// per file so a large change set cannot blow the context window.
pub(crate) fn render_changes(changes: &[CodeChange], max_chars_per_file: usize) -> String {
    let mut rendered = String::new();
    for change in changes {
        let body: String = change.content.chars().take(max_chars_per_file).collect();
        let truncated = if change.content.chars().count() > max_chars_per_file {
            "\n… (truncated)"
        } else {
            ""
        };
        rendered.push_str(&format!(
            "FILE: {}\n```{}\n{}{}\n```\n\n",
            change.path, change.language, body, truncated
        ));
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChangeKind;

    #[test]
    fn extract_json_strips_fences_and_prose() {
        let text = "Sure! Here is the plan:\n```json\n{\"subtasks\": []}\n```\nDone.";
        assert_eq!(extract_json(text), Some("{\"subtasks\": []}"));
    }

    #[test]
    fn extract_json_returns_none_without_object() {
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn render_changes_truncates_long_files() {
        let changes = vec![CodeChange {
            path: "big.rs".into(),
            language: "rust".into(),
            content: "x".repeat(100),
            kind: ChangeKind::Create,
        }];
        let rendered = render_changes(&changes, 10);
        assert!(rendered.contains("xxxxxxxxxx\n… (truncated)"));
        assert!(rendered.contains("FILE: big.rs"));
    }
}
