//! The durable code-generation workflow.
//!
//! One [`TaskEvent`] drives one run:
//!
//! 1. `get-sandbox-id`: create the sandbox once and keep only its id.
//! 2. `get-previous-messages`: load the project conversation.
//! 3. The agent network loop (`iter-<n>/...` steps).
//! 4. `generate-fragment-title` and `generate-response`.
//! 5. `get-sandbox-url`: re-attach by id and resolve the public URL.
//! 6. `save-result`: persist exactly one RESULT or ERROR message, keyed by run id.
//!
//! Every effect goes through the run's [`StepJournal`], so [`Workflow::resume`]
//! continues an interrupted run without repeating completed work.

use std::path::Path;

use anyhow::{Result, anyhow};
use tracing::{info, instrument, warn};

use crate::agents::TurnEnv;
use crate::agents::code::{CODE_AGENT, code_agent};
use crate::agents::summarizer::Summarizer;
use crate::core::outcome::{MessageKind, RunResult, is_error, persist_plan};
use crate::core::router::SummaryRouter;
use crate::core::state::NetworkState;
use crate::core::types::{ConversationItem, MessageContent, Role, TaskEvent, WorkflowOutput};
use crate::io::config::EngineConfig;
use crate::io::journal::StepJournal;
use crate::io::model::ModelClient;
use crate::io::process::OutputSink;
use crate::io::prompt::PromptEngine;
use crate::io::run_state::{
    RunPaths, RunRecord, RunStatus, generate_run_id, load_run_record, validate_run_id,
    write_run_record,
};
use crate::io::sandbox::SandboxProvider;
use crate::io::store::{ConversationStore, NewMessage, StoredMessage, history_items};
use crate::network::{AgentNetwork, IterationLogTarget};

const NETWORK_NAME: &str = "coding-agent-network";

/// External collaborators of a run.
#[derive(Clone, Copy)]
pub struct Services<'a> {
    pub provider: &'a dyn SandboxProvider,
    pub model: &'a dyn ModelClient,
    pub store: &'a dyn ConversationStore,
}

/// Final result of a started or resumed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub run_id: String,
    pub kind: MessageKind,
    pub output: WorkflowOutput,
}

pub struct Workflow<'a> {
    cfg: &'a EngineConfig,
    services: Services<'a>,
    prompts: PromptEngine,
    output_sink: Option<OutputSink>,
}

impl<'a> Workflow<'a> {
    pub fn new(cfg: &'a EngineConfig, services: Services<'a>) -> Self {
        Self {
            cfg,
            services,
            prompts: PromptEngine::new(),
            output_sink: None,
        }
    }

    /// Receive sandbox command output line by line.
    pub fn with_output_sink(mut self, sink: OutputSink) -> Self {
        self.output_sink = Some(sink);
        self
    }

    /// Start a new run under `runs_dir`.
    pub fn start(&self, runs_dir: &Path, event: TaskEvent) -> Result<RunOutcome> {
        validate_event(&event)?;
        let run_id = generate_run_id();
        let paths = RunPaths::new(runs_dir, &run_id);
        let mut record = RunRecord::new(&run_id, event);
        write_run_record(&paths.record_path, &record)?;
        info!(run_id = %run_id, project_id = %record.event.project_id, "run started");
        self.drive(&paths, &mut record)
    }

    /// Continue a run that failed or was interrupted.
    ///
    /// A completed run returns its recorded output without any side effects.
    pub fn resume(&self, runs_dir: &Path, run_id: &str) -> Result<RunOutcome> {
        validate_run_id(run_id)?;
        let paths = RunPaths::new(runs_dir, run_id);
        let mut record = load_run_record(&paths.record_path)?;
        if record.status == RunStatus::Completed {
            let (Some(kind), Some(output)) = (record.outcome, record.output.clone()) else {
                return Err(anyhow!("run {run_id} is completed but has no recorded output"));
            };
            info!(run_id, "run already completed");
            return Ok(RunOutcome {
                run_id: record.run_id,
                kind,
                output,
            });
        }
        info!(run_id, previous = ?record.status, "resuming run");
        record.resume();
        write_run_record(&paths.record_path, &record)?;
        self.drive(&paths, &mut record)
    }

    fn drive(&self, paths: &RunPaths, record: &mut RunRecord) -> Result<RunOutcome> {
        let journal = StepJournal::open(&paths.journal_path, self.cfg.retry.clone())?;
        let log = IterationLogTarget {
            run_id: &record.run_id,
            iterations_dir: &paths.iterations_dir,
        };
        match self.execute(&record.run_id, &record.event, &journal, Some(log)) {
            Ok((kind, output)) => {
                record.complete(kind, output.clone());
                write_run_record(&paths.record_path, record)?;
                info!(run_id = %record.run_id, kind = ?kind, "run completed");
                Ok(RunOutcome {
                    run_id: record.run_id.clone(),
                    kind,
                    output,
                })
            }
            Err(err) => {
                record.fail(&err);
                if let Err(write_err) = write_run_record(&paths.record_path, record) {
                    warn!(err = %format!("{write_err:#}"), "failed to mark run as failed");
                }
                Err(err.context(format!("run {}", record.run_id)))
            }
        }
    }

    /// Execute the workflow steps of run `run_id` against `journal`.
    #[instrument(skip_all, fields(run_id, project_id = %event.project_id))]
    pub fn execute(
        &self,
        run_id: &str,
        event: &TaskEvent,
        journal: &StepJournal,
        log: Option<IterationLogTarget<'_>>,
    ) -> Result<(MessageKind, WorkflowOutput)> {
        validate_event(event)?;
        let cfg = self.cfg;
        let Services {
            provider,
            model,
            store,
        } = self.services;

        let sandbox_id: String = journal.run_step("get-sandbox-id", || {
            Ok(provider.create(&cfg.sandbox.template)?.id)
        })?;
        let history: Vec<ConversationItem> = journal.run_step("get-previous-messages", || {
            let messages = store.find_messages(&event.project_id)?;
            Ok(history_items(&messages, cfg.history_limit))
        })?;

        let mut transcript = seed_transcript(history, &event.value);
        let mut state = NetworkState::new();
        let network = AgentNetwork::new(
            NETWORK_NAME,
            vec![code_agent(&self.prompts, cfg)?],
            SummaryRouter::new(CODE_AGENT),
            cfg.max_iterations,
        )?;
        let env = TurnEnv {
            model,
            provider,
            sandbox_id: &sandbox_id,
            journal,
            max_tool_rounds: cfg.max_tool_rounds,
            output_sink: self.output_sink.clone(),
        };
        let outcome = network.run(&env, log, &mut transcript, &mut state)?;
        info!(
            iterations = outcome.iterations,
            stop = ?outcome.stop,
            files = state.files.len(),
            "network finished"
        );

        let title_agent = Summarizer::fragment_title(&self.prompts, cfg)?;
        let response_agent = Summarizer::response(&self.prompts, cfg)?;
        let title: String = journal.run_step("generate-fragment-title", || {
            title_agent.summarize(model, &state.summary)
        })?;
        let response_text: String = journal.run_step("generate-response", || {
            response_agent.summarize(model, &state.summary)
        })?;
        let sandbox_url: String = journal.run_step("get-sandbox-url", || {
            Ok(provider.connect(&sandbox_id)?.host_url(cfg.sandbox.port))
        })?;

        let result = RunResult {
            summary: state.summary.clone(),
            files: state.files.clone(),
            title,
            response_text,
            sandbox_url,
            is_error: is_error(&state),
        };
        let plan = persist_plan(&result);
        let message_id: String = journal.run_step("save-result", || {
            let stored = store.create_message(NewMessage {
                project_id: event.project_id.clone(),
                role: Role::Assistant,
                kind: plan.kind,
                content: plan.content.clone(),
                fragment: plan.fragment.clone(),
                idempotency_key: Some(format!("{run_id}/save-result")),
            })?;
            Ok(stored.id)
        })?;
        info!(message_id = %message_id, kind = ?plan.kind, "result persisted");

        Ok((
            plan.kind,
            WorkflowOutput {
                url: result.sandbox_url,
                title: result.title,
                files: result.files,
                summary: result.summary,
            },
        ))
    }
}

/// Persist the user's task as the newest message of its project.
pub fn record_user_message(
    store: &dyn ConversationStore,
    event: &TaskEvent,
) -> Result<StoredMessage> {
    validate_event(event)?;
    store.create_message(NewMessage {
        project_id: event.project_id.clone(),
        role: Role::User,
        kind: MessageKind::Result,
        content: event.value.clone(),
        fragment: None,
        idempotency_key: None,
    })
}

pub fn validate_event(event: &TaskEvent) -> Result<()> {
    if event.project_id.trim().is_empty() {
        return Err(anyhow!("task event is missing projectId"));
    }
    if event.value.trim().is_empty() {
        return Err(anyhow!("task event has empty value"));
    }
    Ok(())
}

/// History followed by the task, unless history already ends with it.
fn seed_transcript(mut history: Vec<ConversationItem>, task: &str) -> Vec<ConversationItem> {
    let already_last = matches!(
        history.last(),
        Some(ConversationItem::Text {
            role: Role::User,
            content: MessageContent::Text(text),
        }) if text == task
    );
    if !already_last {
        history.push(ConversationItem::user(task));
    }
    history
}
