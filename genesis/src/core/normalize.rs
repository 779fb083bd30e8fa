//! Output-shape normalization for single-turn summarizer agents.

use crate::core::types::{ConversationItem, ModelResponse};

pub const DEFAULT_TITLE: &str = "Fragment";
pub const DEFAULT_RESPONSE: &str = "Here you go";

/// Reduce a summarizer response to plain text.
///
/// Only the first output item is considered. If it is not a text message the
/// `fallback` is returned; list content is concatenated in order.
pub fn normalize_text_output(response: &ModelResponse, fallback: &str) -> String {
    match response.output.first() {
        Some(ConversationItem::Text { content, .. }) => content.joined(),
        _ => fallback.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MessageContent;
    use serde_json::json;

    #[test]
    fn plain_text_is_returned_verbatim() {
        let response = ModelResponse {
            output: vec![ConversationItem::assistant("Landing Page")],
        };
        assert_eq!(normalize_text_output(&response, DEFAULT_TITLE), "Landing Page");
    }

    #[test]
    fn fragment_list_is_concatenated() {
        let response = ModelResponse {
            output: vec![ConversationItem::assistant(MessageContent::Parts(vec![
                "Todo".into(),
                " App".into(),
            ]))],
        };
        assert_eq!(normalize_text_output(&response, DEFAULT_TITLE), "Todo App");
    }

    #[test]
    fn non_text_or_empty_output_falls_back() {
        let tool_first = ModelResponse {
            output: vec![ConversationItem::ToolCall {
                id: "1".into(),
                name: "terminal".into(),
                arguments: json!({}),
            }],
        };
        assert_eq!(
            normalize_text_output(&tool_first, DEFAULT_RESPONSE),
            DEFAULT_RESPONSE
        );
        assert_eq!(
            normalize_text_output(&ModelResponse::default(), DEFAULT_TITLE),
            DEFAULT_TITLE
        );
    }
}
