//! Run outcome classification and the persisted message it maps to.

use serde::{Deserialize, Serialize};

use crate::core::state::NetworkState;
use crate::core::types::FileMap;

/// Fixed user-facing text for runs that produced nothing usable. Internal
/// error detail never reaches the conversation.
pub const ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

/// Kind of a persisted assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MessageKind {
    Result,
    Error,
}

/// Everything derived once at the end of the loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub summary: String,
    pub files: FileMap,
    pub title: String,
    pub response_text: String,
    pub sandbox_url: String,
    pub is_error: bool,
}

/// Artifact attached to a successful result message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fragment {
    pub sandbox_url: String,
    pub title: String,
    pub files: FileMap,
}

/// Message content the persister writes for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistPlan {
    pub kind: MessageKind,
    pub content: String,
    pub fragment: Option<Fragment>,
}

/// A run is an error when it finished without a summary or without files.
pub fn is_error(state: &NetworkState) -> bool {
    state.summary.is_empty() || state.files.is_empty()
}

/// Map a run result to the single message that will be persisted.
pub fn persist_plan(result: &RunResult) -> PersistPlan {
    if result.is_error {
        return PersistPlan {
            kind: MessageKind::Error,
            content: ERROR_MESSAGE.to_string(),
            fragment: None,
        };
    }
    PersistPlan {
        kind: MessageKind::Result,
        content: result.response_text.clone(),
        fragment: Some(Fragment {
            sandbox_url: result.sandbox_url.clone(),
            title: result.title.clone(),
            files: result.files.clone(),
        }),
    }
}
