//! Shared Network State owned by one workflow run.
//!
//! Tools and response hooks mutate this record; the router reads it. It is
//! passed by reference and never stored in a global, so concurrent runs stay
//! isolated.

use serde::{Deserialize, Serialize};

use crate::core::types::FileMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Final task summary. Non-empty means the run is done.
    pub summary: String,
    /// Files written through tools. Keys are only ever added or overwritten.
    pub files: FileMap,
}

impl NetworkState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_summary(&self) -> bool {
        !self.summary.is_empty()
    }

    /// Merge `written` into `files`, overwriting existing paths.
    pub fn merge_files(&mut self, written: &FileMap) {
        for (path, content) in written {
            self.files.insert(path.clone(), content.clone());
        }
    }

    /// Record the task summary. An already captured summary is kept.
    ///
    /// Returns `true` when the summary was stored by this call.
    pub fn capture_summary(&mut self, text: &str) -> bool {
        if self.has_summary() || text.is_empty() {
            return false;
        }
        self.summary = text.to_string();
        true
    }
}
