//! Tool adapter layer.
//!
//! Tools wrap sandbox operations for agents. Every call goes through
//! [`ToolSet::dispatch`], which validates arguments against the tool's JSON
//! Schema first. Unknown tools, schema violations and failed sandbox
//! operations come back as `Ok(text)` so the agent can react on its next
//! round; `Err` is reserved for infrastructure failures (unreachable sandbox,
//! journal I/O).

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::state::NetworkState;
use crate::core::types::{ToolCallRequest, ToolSchema};
use crate::io::journal::StepJournal;
use crate::io::process::OutputSink;
use crate::io::sandbox::SandboxProvider;

pub mod files;
pub mod terminal;

pub use files::{CreateOrUpdateFiles, ReadFiles};
pub use terminal::Terminal;

/// Everything a tool may touch during one call.
pub struct ToolContext<'a> {
    pub provider: &'a dyn SandboxProvider,
    /// Stored sandbox id; tools re-attach through `provider` on every call.
    pub sandbox_id: &'a str,
    pub journal: &'a StepJournal,
    pub state: &'a mut NetworkState,
    /// Journal name reserved for this call's effectful step.
    pub step_name: String,
    pub output_sink: Option<OutputSink>,
}

/// A capability an agent can invoke.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema for the call arguments.
    fn parameters(&self) -> Value;

    /// Run the tool with schema-valid arguments.
    fn invoke(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String>;
}

struct RegisteredTool {
    tool: Box<dyn Tool>,
    validator: Validator,
}

/// Tools bound to one agent, with compiled parameter schemas.
pub struct ToolSet {
    tools: Vec<RegisteredTool>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.tools.iter().map(|t| t.tool.name()))
            .finish()
    }
}

impl ToolSet {
    pub fn new(tools: Vec<Box<dyn Tool>>) -> Result<Self> {
        let mut registered: Vec<RegisteredTool> = Vec::with_capacity(tools.len());
        for tool in tools {
            if registered.iter().any(|r| r.tool.name() == tool.name()) {
                return Err(anyhow!("duplicate tool name {}", tool.name()));
            }
            let schema = tool.parameters();
            let validator = jsonschema::validator_for(&schema)
                .map_err(|err| anyhow!("invalid schema for tool {}: {}", tool.name(), err))?;
            registered.push(RegisteredTool { tool, validator });
        }
        Ok(Self { tools: registered })
    }

    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    /// `terminal`, `createOrUpdateFiles` and `readFiles`.
    pub fn sandbox_tools() -> Result<Self> {
        Self::new(vec![
            Box::new(Terminal),
            Box::new(CreateOrUpdateFiles),
            Box::new(ReadFiles),
        ])
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools
            .iter()
            .map(|r| ToolSchema {
                name: r.tool.name().to_string(),
                description: r.tool.description().to_string(),
                parameters: r.tool.parameters(),
            })
            .collect()
    }

    /// Validate and run one tool call, returning the text shown to the agent.
    pub fn dispatch(&self, call: &ToolCallRequest, ctx: &mut ToolContext<'_>) -> Result<String> {
        let Some(registered) = self.tools.iter().find(|r| r.tool.name() == call.name) else {
            warn!(tool = %call.name, "unknown tool requested");
            return Ok(format!("Error: unknown tool {}", call.name));
        };

        let violations: Vec<String> = registered
            .validator
            .iter_errors(&call.arguments)
            .map(|err| err.to_string())
            .collect();
        if !violations.is_empty() {
            warn!(tool = %call.name, violations = violations.len(), "rejected tool arguments");
            return Ok(format!(
                "Error: invalid parameters for {}: {}",
                call.name,
                violations.join("; ")
            ));
        }

        debug!(tool = %call.name, step = %ctx.step_name, "invoking tool");
        registered
            .tool
            .invoke(call.arguments.clone(), ctx)
            .with_context(|| format!("tool {}", call.name))
    }
}

/// Decode schema-valid arguments, turning leftover mismatches into agent-visible text.
pub(crate) fn parse_params<P: DeserializeOwned>(
    tool: &str,
    args: Value,
) -> std::result::Result<P, String> {
    serde_json::from_value(args)
        .map_err(|err| format!("Error: invalid parameters for {tool}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::RetryConfig;
    use crate::test_support::MemorySandboxProvider;
    use serde_json::json;

    fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call-1".into(),
            name: name.into(),
            arguments,
        }
    }

    #[test]
    fn schemas_list_sandbox_tools_in_order() {
        let tools = ToolSet::sandbox_tools().expect("tools");
        let names: Vec<String> = tools.schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["terminal", "createOrUpdateFiles", "readFiles"]);
    }

    #[test]
    fn malformed_arguments_fail_closed_as_text() {
        let provider = MemorySandboxProvider::default();
        let sandbox = provider.create("t").expect("create");
        let journal = StepJournal::in_memory(RetryConfig::default());
        let mut state = NetworkState::new();
        let tools = ToolSet::sandbox_tools().expect("tools");
        let mut ctx = ToolContext {
            provider: &provider,
            sandbox_id: &sandbox.id,
            journal: &journal,
            state: &mut state,
            step_name: "iter-1/round-1/tool-0-createOrUpdateFiles".into(),
            output_sink: None,
        };

        let out = tools
            .dispatch(
                &call("createOrUpdateFiles", json!({"files": [{"path": "a.txt"}]})),
                &mut ctx,
            )
            .expect("dispatch");
        assert!(out.starts_with("Error: invalid parameters for createOrUpdateFiles"));
        assert!(ctx.state.files.is_empty());
        assert!(journal.completed_steps().is_empty());
    }

    #[test]
    fn unknown_tool_is_reported_to_agent() {
        let provider = MemorySandboxProvider::default();
        let journal = StepJournal::in_memory(RetryConfig::default());
        let mut state = NetworkState::new();
        let tools = ToolSet::sandbox_tools().expect("tools");
        let mut ctx = ToolContext {
            provider: &provider,
            sandbox_id: "sbx-none",
            journal: &journal,
            state: &mut state,
            step_name: "iter-1/round-1/tool-0-deploy".into(),
            output_sink: None,
        };
        let out = tools.dispatch(&call("deploy", json!({})), &mut ctx).expect("dispatch");
        assert_eq!(out, "Error: unknown tool deploy");
    }

    #[test]
    fn duplicate_tool_names_rejected() {
        let err = ToolSet::new(vec![Box::new(Terminal), Box::new(Terminal)]).expect_err("dup");
        assert!(err.to_string().contains("duplicate tool name terminal"));
    }
}
