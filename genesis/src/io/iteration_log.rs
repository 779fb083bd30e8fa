//! Iteration logging helpers for `.genesis/runs/<run-id>/iterations/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use super::atomic::write_json_atomic;
use crate::core::state::NetworkState;
use crate::core::types::ConversationItem;

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iter: u32,
    pub agent: String,
    pub rounds: u32,
    /// Tool names in call order.
    pub tool_calls: Vec<String>,
    pub summary_captured: bool,
    pub file_count: usize,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub state_path: PathBuf,
    pub output_path: PathBuf,
}

impl IterationPaths {
    pub fn new(iterations_dir: &Path, iter: u32) -> Self {
        let dir = iterations_dir.join(iter.to_string());
        Self {
            dir: dir.clone(),
            meta_path: dir.join("meta.json"),
            state_path: dir.join("state.json"),
            output_path: dir.join("output.json"),
        }
    }
}

pub struct IterationWriteRequest<'a> {
    pub iterations_dir: &'a Path,
    pub meta: &'a IterationMeta,
    pub state: &'a NetworkState,
    pub output: &'a [ConversationItem],
}

pub fn write_iteration(request: &IterationWriteRequest<'_>) -> Result<IterationPaths> {
    let paths = IterationPaths::new(request.iterations_dir, request.meta.iter);
    fs::create_dir_all(&paths.dir)
        .with_context(|| format!("create iteration dir {}", paths.dir.display()))?;

    // Write in deterministic order to keep logs stable.
    write_json_atomic(&paths.meta_path, request.meta)?;
    write_json_atomic(&paths.state_path, request.state)?;
    write_json_atomic(&paths.output_path, &request.output)?;

    Ok(paths)
}
