use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;

use genesis::core::outcome::MessageKind;
use genesis::core::types::TaskEvent;
use genesis::exit_codes;
use genesis::io::config::{EngineConfig, load_config};
use genesis::io::init::{GenesisPaths, InitOptions, init_genesis};
use genesis::io::local_sandbox::LocalSandboxProvider;
use genesis::io::model::CommandModelClient;
use genesis::io::process::{OutputSink, StreamKind};
use genesis::io::store::{ConversationStore, FileConversationStore};
use genesis::logging;
use genesis::workflow::{RunOutcome, Services, Workflow, record_user_message};

#[derive(Parser)]
#[command(
    name = "genesis",
    version,
    about = "Durable agent-network runner for sandboxed code generation"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create `.genesis/` scaffolding and the default config.
    Init {
        /// Overwrite the existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Run one workflow for a task and print its output as JSON.
    Run {
        /// Project whose conversation the task belongs to.
        #[arg(long, required_unless_present = "event")]
        project: Option<String>,
        /// Read `{ "projectId": ..., "value": ... }` from a file instead.
        #[arg(long, conflicts_with_all = ["project", "task"])]
        event: Option<PathBuf>,
        /// Task text.
        #[arg(required_unless_present = "event")]
        task: Vec<String>,
    },
    /// Continue an interrupted or failed run.
    Resume { run_id: String },
    /// Print the persisted conversation of a project.
    Messages {
        #[arg(long)]
        project: String,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let root = std::env::current_dir().context("resolve current directory")?;
    match cli.command {
        Command::Init { force } => cmd_init(&root, force),
        Command::Run {
            project,
            event,
            task,
        } => {
            let event = match event {
                Some(path) => read_event(&path)?,
                None => TaskEvent {
                    project_id: project.ok_or_else(|| anyhow!("--project is required"))?,
                    value: task.join(" "),
                },
            };
            cmd_run(&root, event)
        }
        Command::Resume { run_id } => cmd_resume(&root, &run_id),
        Command::Messages { project } => cmd_messages(&root, &project),
    }
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = init_genesis(root, &InitOptions { force })?;
    println!("initialized {}", paths.genesis_dir.display());
    Ok(exit_codes::OK)
}

fn cmd_run(root: &Path, event: TaskEvent) -> Result<i32> {
    let (paths, cfg) = load_layout(root)?;
    let store = FileConversationStore::new(&paths.projects_dir);
    record_user_message(&store, &event)?;
    with_workflow(&paths, &cfg, &store, |workflow| {
        workflow.start(&paths.runs_dir, event)
    })
}

fn cmd_resume(root: &Path, run_id: &str) -> Result<i32> {
    let (paths, cfg) = load_layout(root)?;
    let store = FileConversationStore::new(&paths.projects_dir);
    with_workflow(&paths, &cfg, &store, |workflow| {
        workflow.resume(&paths.runs_dir, run_id)
    })
}

fn cmd_messages(root: &Path, project: &str) -> Result<i32> {
    let (paths, _) = load_layout(root)?;
    let store = FileConversationStore::new(&paths.projects_dir);
    print_json(&store.find_messages(project)?)?;
    Ok(exit_codes::OK)
}

fn load_layout(root: &Path) -> Result<(GenesisPaths, EngineConfig)> {
    let paths = GenesisPaths::new(root);
    if !paths.genesis_dir.is_dir() {
        return Err(anyhow!("missing .genesis (run `genesis init` first)"));
    }
    let cfg = load_config(&paths.config_path)?;
    Ok((paths, cfg))
}

fn with_workflow<F>(
    paths: &GenesisPaths,
    cfg: &EngineConfig,
    store: &FileConversationStore,
    drive: F,
) -> Result<i32>
where
    F: FnOnce(&Workflow<'_>) -> Result<RunOutcome>,
{
    let provider = LocalSandboxProvider::new(&paths.sandboxes_dir, &paths.templates_dir, cfg);
    let model = CommandModelClient::new(
        cfg.model.command.clone(),
        cfg.step_timeout(),
        cfg.command_output_limit_bytes,
    );
    let sink: OutputSink =
        Arc::new(|stream: StreamKind, line: &str| debug!(stream = ?stream, "{line}"));
    let workflow = Workflow::new(
        cfg,
        Services {
            provider: &provider,
            model: &model,
            store,
        },
    )
    .with_output_sink(sink);

    let outcome = drive(&workflow)?;
    eprintln!("run {}", outcome.run_id);
    print_json(&outcome.output)?;
    Ok(match outcome.kind {
        MessageKind::Result => exit_codes::OK,
        MessageKind::Error => exit_codes::RUN_ERROR,
    })
}

fn read_event(path: &Path) -> Result<TaskEvent> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read event {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse event {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}
