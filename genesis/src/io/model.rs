//! Model inference abstraction.
//!
//! The [`ModelClient`] trait decouples agents from the inference backend.
//! [`CommandModelClient`] talks to a bridge process over stdin/stdout; tests use
//! scripted clients that return predetermined responses.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{ConversationItem, ModelResponse, ToolSchema};
use crate::io::process::run_command_with_timeout;

/// One inference request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub model: String,
    pub system: String,
    pub messages: Vec<ConversationItem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolSchema>,
}

/// Abstraction over model inference providers.
pub trait ModelClient: Send + Sync {
    fn infer(&self, request: &InferenceRequest) -> Result<ModelResponse>;
}

/// Client that spawns an inference bridge per request.
///
/// The bridge reads the JSON-encoded [`InferenceRequest`] on stdin and must
/// print a JSON [`ModelResponse`] on stdout before exiting with status 0.
#[derive(Debug, Clone)]
pub struct CommandModelClient {
    argv: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandModelClient {
    pub fn new(argv: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            argv,
            timeout,
            output_limit_bytes,
        }
    }
}

impl ModelClient for CommandModelClient {
    #[instrument(skip_all, fields(model = %request.model, messages = request.messages.len()))]
    fn infer(&self, request: &InferenceRequest) -> Result<ModelResponse> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("model command is empty"))?;
        info!(program = %program, "starting model bridge");

        let payload = serde_json::to_vec(request).context("serialize inference request")?;
        let mut cmd = Command::new(program);
        cmd.args(args);

        let output =
            run_command_with_timeout(cmd, Some(&payload), self.timeout, self.output_limit_bytes)
                .context("run model bridge")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "model bridge timed out");
            return Err(anyhow!("model bridge timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "model bridge failed");
            return Err(anyhow!(
                "model bridge failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "model bridge output exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        let response: ModelResponse =
            serde_json::from_slice(&output.stdout).context("parse model bridge output")?;
        debug!(items = response.output.len(), "model response parsed");
        Ok(response)
    }
}
