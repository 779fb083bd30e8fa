//! Engine configuration stored under `.genesis/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::atomic::write_atomic;

/// Engine configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to the defaults
/// below, so a partial file is always valid input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on router/agent iterations per run.
    pub max_iterations: u32,

    /// Upper bound on inference rounds within one agent turn.
    pub max_tool_rounds: u32,

    /// Keep only the newest N prior messages when seeding the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_limit: Option<usize>,

    /// Wall-clock limit for a single sandbox command or model inference.
    pub step_timeout_secs: u64,

    /// Truncate captured stdout/stderr beyond this many bytes.
    pub command_output_limit_bytes: usize,

    pub sandbox: SandboxConfig,
    pub model: ModelConfig,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    /// Template directory name under `.genesis/templates/`.
    pub template: String,
    /// Port the generated app listens on inside the sandbox.
    pub port: u16,
    /// Domain suffix for public host URLs.
    pub host_domain: String,
    /// Absolute working directory tool paths are resolved against.
    pub workdir: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            template: "vibe-nextjs".to_string(),
            port: 3000,
            host_domain: "sandbox.local".to_string(),
            workdir: "/home/user".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ModelConfig {
    /// Inference bridge argv. Receives a JSON request on stdin and prints a
    /// JSON response on stdout.
    pub command: Vec<String>,
    /// Model used by the code agent.
    pub code_model: String,
    /// Model used by the title and response summarizers.
    pub summary_model: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            command: vec!["genesis-model-bridge".to_string()],
            code_model: "gpt-4.1".to_string(),
            summary_model: "gpt-4o".to_string(),
        }
    }
}

/// Retry policy applied by the step journal to every named step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per step, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt.
    pub backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_tool_rounds: 10,
            history_limit: None,
            step_timeout_secs: 5 * 60,
            command_output_limit_bytes: 100_000,
            sandbox: SandboxConfig::default(),
            model: ModelConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(anyhow!("max_iterations must be > 0"));
        }
        if self.max_tool_rounds == 0 {
            return Err(anyhow!("max_tool_rounds must be > 0"));
        }
        if self.history_limit == Some(0) {
            return Err(anyhow!("history_limit must be > 0 when set"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.command_output_limit_bytes == 0 {
            return Err(anyhow!("command_output_limit_bytes must be > 0"));
        }
        if self.sandbox.template.trim().is_empty() {
            return Err(anyhow!("sandbox.template must be non-empty"));
        }
        if self.sandbox.host_domain.trim().is_empty() {
            return Err(anyhow!("sandbox.host_domain must be non-empty"));
        }
        if !self.sandbox.workdir.starts_with('/') {
            return Err(anyhow!("sandbox.workdir must be an absolute path"));
        }
        if self.model.command.is_empty() || self.model.command[0].trim().is_empty() {
            return Err(anyhow!("model.command must be a non-empty array"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("retry.max_attempts must be > 0"));
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `EngineConfig::default()`.
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    if !path.exists() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: EngineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &EngineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
