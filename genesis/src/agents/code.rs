//! The coding agent driven by the network.

use anyhow::Result;

use super::Agent;
use crate::core::sentinel::capture_task_summary;
use crate::io::config::EngineConfig;
use crate::io::prompt::PromptEngine;
use crate::tools::ToolSet;

pub const CODE_AGENT: &str = "code-agent";

/// Sandbox tools, the code model, and the task-summary hook.
pub fn code_agent(prompts: &PromptEngine, cfg: &EngineConfig) -> Result<Agent> {
    let system = prompts.code_agent(&cfg.sandbox.workdir, cfg.sandbox.port)?;
    Ok(Agent::new(CODE_AGENT, system, cfg.model.code_model.clone())
        .with_tools(ToolSet::sandbox_tools()?)
        .with_response_hook(capture_task_summary))
}
