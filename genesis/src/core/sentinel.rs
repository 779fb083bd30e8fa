//! Task-summary sentinel detection used as the code agent's response hook.

use std::sync::LazyLock;

use regex::Regex;

use crate::core::state::NetworkState;
use crate::core::types::{ConversationItem, last_assistant_text};

pub const TASK_SUMMARY_OPEN: &str = "<task_summary>";
pub const TASK_SUMMARY_CLOSE: &str = "</task_summary>";

// A complete, non-blank block. A bare opening tag quoted inside generated
// content does not count.
static TASK_SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<task_summary>\s*(\S.*?)\s*</task_summary>")
        .expect("task summary pattern should be valid")
});

/// Whether `text` carries a task-summary block.
pub fn contains_task_summary(text: &str) -> bool {
    TASK_SUMMARY_RE.is_match(text)
}

/// Inner text of the first task-summary block, trimmed.
pub fn task_summary_body(text: &str) -> Option<&str> {
    TASK_SUMMARY_RE
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Copy the last assistant message of a turn into `state.summary` when it
/// carries the sentinel. Returns `true` if the summary was captured.
pub fn capture_task_summary(turn_output: &[ConversationItem], state: &mut NetworkState) -> bool {
    let Some(text) = last_assistant_text(turn_output) else {
        return false;
    };
    if !contains_task_summary(&text) {
        return false;
    }
    state.capture_summary(&text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MessageContent;

    #[test]
    fn detects_complete_block_only() {
        assert!(contains_task_summary(
            "All set.\n<task_summary>\nBuilt a landing page.\n</task_summary>"
        ));
        assert!(!contains_task_summary("I will end with <task_summary> later"));
        assert!(!contains_task_summary("<task_summary>   </task_summary>"));
    }

    #[test]
    fn body_is_trimmed() {
        let text = "<task_summary>\n  Created app/page.tsx  \n</task_summary>";
        assert_eq!(task_summary_body(text), Some("Created app/page.tsx"));
    }

    #[test]
    fn capture_uses_last_assistant_message_in_full() {
        let mut state = NetworkState::new();
        let output = vec![
            ConversationItem::assistant("working on it"),
            ConversationItem::Text {
                role: crate::core::types::Role::Assistant,
                content: MessageContent::Parts(vec![
                    "Done. ".into(),
                    "<task_summary>hello world</task_summary>".into(),
                ]),
            },
        ];
        assert!(capture_task_summary(&output, &mut state));
        assert_eq!(
            state.summary,
            "Done. <task_summary>hello world</task_summary>"
        );
    }

    #[test]
    fn capture_ignores_turn_without_sentinel() {
        let mut state = NetworkState::new();
        let output = vec![ConversationItem::assistant("still working")];
        assert!(!capture_task_summary(&output, &mut state));
        assert!(state.summary.is_empty());
    }
}
