//! Shared deterministic types for the orchestration core.
//!
//! These types define the contracts between the network loop, agents, tools and
//! the model client. They carry no I/O and serialize to a stable JSON shape so
//! journaled steps replay identically.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Accumulated generated files, keyed by sandbox path.
pub type FileMap = BTreeMap<String, String>;

/// Author of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Textual content of a model message.
///
/// Providers return either a plain string or an ordered list of text
/// fragments; both are kept as-is and flattened with [`MessageContent::joined`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<String>),
}

impl MessageContent {
    /// Concatenate fragments in order with no separator.
    pub fn joined(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts.concat(),
        }
    }
}

impl From<&str> for MessageContent {
    fn from(value: &str) -> Self {
        MessageContent::Text(value.to_string())
    }
}

impl From<String> for MessageContent {
    fn from(value: String) -> Self {
        MessageContent::Text(value)
    }
}

/// One entry of a running conversation, as exchanged with the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationItem {
    Text {
        role: Role,
        content: MessageContent,
    },
    ToolCall {
        id: String,
        name: String,
        arguments: Value,
    },
    ToolResult {
        id: String,
        name: String,
        content: String,
    },
}

impl ConversationItem {
    pub fn user(content: impl Into<String>) -> Self {
        ConversationItem::Text {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn assistant(content: impl Into<MessageContent>) -> Self {
        ConversationItem::Text {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Structured response of one model inference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelResponse {
    #[serde(default)]
    pub output: Vec<ConversationItem>,
}

impl ModelResponse {
    /// Tool calls in the order the model emitted them.
    pub fn tool_calls(&self) -> Vec<ToolCallRequest> {
        self.output
            .iter()
            .filter_map(|item| match item {
                ConversationItem::ToolCall {
                    id,
                    name,
                    arguments,
                } => Some(ToolCallRequest {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    /// Text of the last assistant message, fragments concatenated.
    pub fn last_assistant_text(&self) -> Option<String> {
        last_assistant_text(&self.output)
    }
}

/// Text of the last assistant message in `items`, fragments concatenated.
pub fn last_assistant_text(items: &[ConversationItem]) -> Option<String> {
    items.iter().rev().find_map(|item| match item {
        ConversationItem::Text {
            role: Role::Assistant,
            content,
        } => Some(content.joined()),
        _ => None,
    })
}

/// Schema description of a tool, as advertised to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Inbound trigger that starts exactly one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub project_id: String,
    pub value: String,
}

/// Output returned to whatever invoked the workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowOutput {
    pub url: String,
    pub title: String,
    pub files: FileMap,
    pub summary: String,
}
