//! `terminal`: run a shell command inside the sandbox.

use anyhow::Result;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{Tool, ToolContext, parse_params};
use crate::io::sandbox::CommandResult;

#[derive(Debug, Deserialize)]
struct TerminalParams {
    command: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Terminal;

impl Tool for Terminal {
    fn name(&self) -> &str {
        "terminal"
    }

    fn description(&self) -> &str {
        "Use the terminal to run commands"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "minLength": 1 }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String> {
        let params: TerminalParams = match parse_params(self.name(), args) {
            Ok(params) => params,
            Err(message) => return Ok(message),
        };
        let provider = ctx.provider;
        let sandbox_id = ctx.sandbox_id;
        let sink = ctx.output_sink.clone();

        ctx.journal.run_step(&ctx.step_name, || {
            let session = provider.connect(sandbox_id)?;
            debug!(command = %params.command, "running sandbox command");
            match session.run(&params.command, sink.clone()) {
                Ok(result) => Ok(format_command_result(&result)),
                Err(err) => {
                    warn!(err = %format!("{err:#}"), "sandbox command did not start");
                    Ok(format_failure(&format!("{err:#}"), "", ""))
                }
            }
        })
    }
}

/// Stdout on success; otherwise the failure with both buffers.
pub fn format_command_result(result: &CommandResult) -> String {
    match result.failure() {
        None => result.stdout.clone(),
        Some(reason) => format_failure(&reason, &result.stdout, &result.stderr),
    }
}

fn format_failure(reason: &str, stdout: &str, stderr: &str) -> String {
    format!("Command failed: {reason}\nstdout: {stdout}\nstderr: {stderr}")
}
