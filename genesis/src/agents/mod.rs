//! LLM-backed agents.
//!
//! An [`Agent`] runs one turn per network iteration: it sends the running
//! conversation to the model, dispatches any requested tool calls, and repeats
//! until the model answers without tool calls or the round limit is hit. Every
//! inference and every tool call is a named journal step, so a resumed run
//! replays the same turn without new side effects.

use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::state::NetworkState;
use crate::core::types::{ConversationItem, ModelResponse};
use crate::io::journal::StepJournal;
use crate::io::model::{InferenceRequest, ModelClient};
use crate::io::process::OutputSink;
use crate::io::sandbox::SandboxProvider;
use crate::tools::{ToolContext, ToolSet};

pub mod code;
pub mod summarizer;

/// Inspects one model response and may mutate shared state.
///
/// Returns `true` when it changed the state.
pub type ResponseHook = fn(&[ConversationItem], &mut NetworkState) -> bool;

/// Collaborators shared by every turn of a run.
pub struct TurnEnv<'a> {
    pub model: &'a dyn ModelClient,
    pub provider: &'a dyn SandboxProvider,
    pub sandbox_id: &'a str,
    pub journal: &'a StepJournal,
    pub max_tool_rounds: u32,
    pub output_sink: Option<OutputSink>,
}

/// What happened during one agent turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    /// Items appended to the conversation by this turn.
    pub output: Vec<ConversationItem>,
    pub rounds: u32,
    /// Tool names in dispatch order.
    pub tool_calls: Vec<String>,
    pub hook_fired: bool,
    /// The round limit ended the turn while tool calls were still pending.
    pub rounds_exhausted: bool,
}

#[derive(Debug)]
pub struct Agent {
    name: String,
    system: String,
    model: String,
    tools: ToolSet,
    on_response: Option<ResponseHook>,
}

impl Agent {
    pub fn new(name: impl Into<String>, system: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system: system.into(),
            model: model.into(),
            tools: ToolSet::empty(),
            on_response: None,
        }
    }

    pub fn with_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_response_hook(mut self, hook: ResponseHook) -> Self {
        self.on_response = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one turn for network iteration `iteration`.
    ///
    /// New items are appended to `transcript` as they arrive; tool calls mutate
    /// `state` in order before the turn returns.
    #[instrument(skip_all, fields(agent = %self.name, iteration))]
    pub fn run_turn(
        &self,
        env: &TurnEnv<'_>,
        iteration: u32,
        transcript: &mut Vec<ConversationItem>,
        state: &mut NetworkState,
    ) -> Result<TurnOutcome> {
        let start = Instant::now();
        let schemas = self.tools.schemas();
        let mut outcome = TurnOutcome {
            output: Vec::new(),
            rounds: 0,
            tool_calls: Vec::new(),
            hook_fired: false,
            rounds_exhausted: false,
        };

        for round in 1..=env.max_tool_rounds.max(1) {
            outcome.rounds = round;
            let prefix = format!("iter-{iteration}/round-{round}");
            let request = InferenceRequest {
                model: self.model.clone(),
                system: self.system.clone(),
                messages: transcript.clone(),
                tools: schemas.clone(),
            };
            let response: ModelResponse = env
                .journal
                .run_step(&format!("{prefix}/inference"), || env.model.infer(&request))?;
            debug!(round, items = response.output.len(), "model responded");

            transcript.extend(response.output.iter().cloned());
            outcome.output.extend(response.output.iter().cloned());
            if let Some(hook) = self.on_response {
                if hook(&response.output, state) {
                    info!(round, "response hook updated state");
                    outcome.hook_fired = true;
                }
            }

            let calls = response.tool_calls();
            if calls.is_empty() {
                break;
            }
            for (index, call) in calls.iter().enumerate() {
                let mut ctx = ToolContext {
                    provider: env.provider,
                    sandbox_id: env.sandbox_id,
                    journal: env.journal,
                    state: &mut *state,
                    step_name: format!("{prefix}/tool-{index}-{}", call.name),
                    output_sink: env.output_sink.clone(),
                };
                let content = self
                    .tools
                    .dispatch(call, &mut ctx)
                    .with_context(|| format!("{prefix} tool call {}", call.id))?;
                outcome.tool_calls.push(call.name.clone());
                let result = ConversationItem::ToolResult {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    content,
                };
                transcript.push(result.clone());
                outcome.output.push(result);
            }
            if round == env.max_tool_rounds.max(1) {
                warn!(round, "tool round limit reached, ending turn");
                outcome.rounds_exhausted = true;
            }
        }

        debug!(
            rounds = outcome.rounds,
            tool_calls = outcome.tool_calls.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "turn finished"
        );
        Ok(outcome)
    }
}
