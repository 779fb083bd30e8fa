//! End-to-end workflow tests with scripted model, sandbox and store doubles.
//!
//! These drive `Workflow::execute`/`start`/`resume` through complete runs and
//! check what ends up persisted: the message kind, the fragment, the files and
//! the journaled steps.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use anyhow::{Result, anyhow};
use serde_json::json;

use genesis::core::outcome::{ERROR_MESSAGE, MessageKind};
use genesis::core::types::{ConversationItem, ModelResponse, Role, TaskEvent};
use genesis::io::config::{EngineConfig, RetryConfig};
use genesis::io::journal::StepJournal;
use genesis::io::local_sandbox::LocalSandboxProvider;
use genesis::io::model::InferenceRequest;
use genesis::io::run_state::{RunPaths, RunStatus, load_run_record};
use genesis::io::sandbox::CommandResult;
use genesis::io::store::{ConversationStore, FileConversationStore, NewMessage, StoredMessage};
use genesis::test_support::{
    FnModel, MemoryConversationStore, MemorySandboxProvider, ScriptedModel, TempGenesis,
    text_response, tool_call_response,
};
use genesis::workflow::{Services, Workflow, record_user_message};

fn event(project: &str, task: &str) -> TaskEvent {
    TaskEvent {
        project_id: project.to_string(),
        value: task.to_string(),
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryConfig {
            max_attempts: 1,
            backoff_ms: 0,
        },
        ..EngineConfig::default()
    }
}

fn write_hello() -> ModelResponse {
    tool_call_response(
        "call-1",
        "createOrUpdateFiles",
        json!({"files": [{"path": "hello.txt", "content": "Hello, world!"}]}),
    )
}

fn hello_world_script() -> Vec<ModelResponse> {
    vec![
        write_hello(),
        text_response("Created the file.\n<task_summary>Created hello.txt</task_summary>"),
        text_response("Hello World File"),
        text_response("I created hello.txt for you."),
    ]
}

#[test]
fn hello_world_run_terminates_after_one_iteration() {
    let cfg = fast_config();
    let provider = MemorySandboxProvider::default();
    let store = MemoryConversationStore::default();
    let model = ScriptedModel::new(hello_world_script());
    let workflow = Workflow::new(
        &cfg,
        Services {
            provider: &provider,
            model: &model,
            store: &store,
        },
    );
    let journal = StepJournal::in_memory(cfg.retry.clone());

    let (kind, output) = workflow
        .execute(
            "run-1",
            &event("p1", "create a hello world file"),
            &journal,
            None,
        )
        .expect("run");

    assert_eq!(kind, MessageKind::Result);
    assert_eq!(output.files.len(), 1);
    assert_eq!(output.files["hello.txt"], "Hello, world!");
    assert_eq!(output.title, "Hello World File");
    assert!(output.summary.contains("<task_summary>"));
    assert_eq!(output.url, "https://3000-sbx-mem-1.memory.test");
    assert_eq!(model.calls(), 4);

    let steps = journal.completed_steps();
    assert!(steps.iter().any(|s| s == "iter-1/round-2/inference"));
    assert!(!steps.iter().any(|s| s.starts_with("iter-2/")));
    for step in [
        "get-sandbox-id",
        "get-previous-messages",
        "generate-fragment-title",
        "generate-response",
        "get-sandbox-url",
        "save-result",
    ] {
        assert!(steps.iter().any(|s| s == step), "missing step {step}");
    }

    let messages = store.all();
    assert_eq!(messages.len(), 1);
    let message = &messages[0];
    assert_eq!(message.role, Role::Assistant);
    assert_eq!(message.kind, MessageKind::Result);
    assert_eq!(message.content, "I created hello.txt for you.");
    let fragment = message.fragment.as_ref().expect("fragment");
    assert_eq!(fragment.title, "Hello World File");
    assert_eq!(fragment.files, output.files);
    assert_eq!(fragment.sandbox_url, output.url);
}

#[test]
fn exhaustion_with_files_but_no_summary_persists_error() {
    let cfg = EngineConfig {
        max_iterations: 2,
        ..fast_config()
    };
    let provider = MemorySandboxProvider::default();
    let store = MemoryConversationStore::default();
    let model = ScriptedModel::new(vec![
        write_hello(),
        text_response("still working"),
        text_response("still working"),
    ]);
    let workflow = Workflow::new(
        &cfg,
        Services {
            provider: &provider,
            model: &model,
            store: &store,
        },
    );

    let (kind, output) = workflow
        .execute(
            "run-1",
            &event("p1", "build it"),
            &StepJournal::in_memory(cfg.retry.clone()),
            None,
        )
        .expect("run");

    assert_eq!(kind, MessageKind::Error);
    assert!(output.summary.is_empty());
    assert_eq!(output.files.len(), 1);
    // two agent inferences in iteration 1, one in iteration 2, summarizers skipped
    assert_eq!(model.calls(), 3);

    let messages = store.all();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].kind, MessageKind::Error);
    assert_eq!(messages[0].content, ERROR_MESSAGE);
    assert!(messages[0].fragment.is_none());
}

#[test]
fn summary_without_files_persists_error() {
    let cfg = fast_config();
    let provider = MemorySandboxProvider::default();
    let store = MemoryConversationStore::default();
    let model = ScriptedModel::new(vec![
        text_response("<task_summary>Nothing to do</task_summary>"),
        text_response("Empty"),
        text_response("Nothing was needed."),
    ]);
    let workflow = Workflow::new(
        &cfg,
        Services {
            provider: &provider,
            model: &model,
            store: &store,
        },
    );

    let (kind, _) = workflow
        .execute(
            "run-1",
            &event("p1", "do nothing"),
            &StepJournal::in_memory(cfg.retry.clone()),
            None,
        )
        .expect("run");

    assert_eq!(kind, MessageKind::Error);
    let messages = store.all();
    assert_eq!(messages[0].content, ERROR_MESSAGE);
    assert!(messages[0].fragment.is_none());
}

#[test]
fn failed_terminal_command_is_shown_to_the_agent() {
    let cfg = fast_config();
    let provider = MemorySandboxProvider::default();
    provider.fail_command(
        "npm run build",
        CommandResult {
            stdout: "> next build".into(),
            stderr: "Type error: x is not defined".into(),
            exit_code: Some(1),
            timed_out: false,
        },
    );
    let store = MemoryConversationStore::default();
    let model = ScriptedModel::new(vec![
        tool_call_response("call-1", "terminal", json!({"command": "npm run build"})),
        write_hello(),
        text_response("<task_summary>Fixed the build</task_summary>"),
        text_response("Build Fix"),
        text_response("Fixed."),
    ]);
    let workflow = Workflow::new(
        &cfg,
        Services {
            provider: &provider,
            model: &model,
            store: &store,
        },
    );

    let (kind, _) = workflow
        .execute(
            "run-1",
            &event("p1", "fix the build"),
            &StepJournal::in_memory(cfg.retry.clone()),
            None,
        )
        .expect("run");
    assert_eq!(kind, MessageKind::Result);

    let requests = model.requests();
    let Some(ConversationItem::ToolResult { name, content, .. }) = requests[1].messages.last()
    else {
        panic!("expected tool result before second inference");
    };
    assert_eq!(name, "terminal");
    assert!(content.contains("Command failed: command exited with status 1"));
    assert!(content.contains("stdout: > next build"));
    assert!(content.contains("stderr: Type error: x is not defined"));
    assert_eq!(provider.commands(), vec!["npm run build"]);
}

#[test]
fn history_seeds_conversation_newest_first_limited() {
    let cfg = EngineConfig {
        history_limit: Some(2),
        ..fast_config()
    };
    let provider = MemorySandboxProvider::default();
    let store = MemoryConversationStore::default();
    for (role, content) in [
        (Role::User, "make a landing page"),
        (Role::Assistant, "Here you go"),
        (Role::User, "add a footer"),
    ] {
        store
            .create_message(NewMessage {
                project_id: "p1".into(),
                role,
                kind: MessageKind::Result,
                content: content.into(),
                fragment: None,
                idempotency_key: None,
            })
            .expect("seed");
    }
    let model = ScriptedModel::new(hello_world_script());
    let workflow = Workflow::new(
        &cfg,
        Services {
            provider: &provider,
            model: &model,
            store: &store,
        },
    );

    workflow
        .execute(
            "run-1",
            &event("p1", "add a footer"),
            &StepJournal::in_memory(cfg.retry.clone()),
            None,
        )
        .expect("run");

    let first = &model.requests()[0];
    assert_eq!(
        first.messages,
        vec![
            ConversationItem::assistant("Here you go"),
            ConversationItem::user("add a footer"),
        ]
    );
    assert_eq!(first.tools.len(), 3);
}

/// Store whose saves fail until `heal` is called.
struct FlakyStore {
    inner: FileConversationStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

impl ConversationStore for FlakyStore {
    fn find_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>> {
        self.inner.find_messages(project_id)
    }

    fn create_message(&self, message: NewMessage) -> Result<StoredMessage> {
        if message.role == Role::Assistant && self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("database unavailable"));
        }
        self.inner.create_message(message)
    }
}

#[test]
fn resume_replays_completed_steps_without_new_effects() {
    let fixture = TempGenesis::new().expect("fixture");
    let paths = &fixture.paths;
    let cfg = fast_config();
    let provider = LocalSandboxProvider::new(&paths.sandboxes_dir, &paths.templates_dir, &cfg);
    let store = FlakyStore {
        inner: FileConversationStore::new(&paths.projects_dir),
        failing: AtomicBool::new(true),
    };
    let task = event("p1", "create a hello world file");
    record_user_message(&store, &task).expect("user message");

    let first_model = ScriptedModel::new(hello_world_script());
    let workflow = Workflow::new(
        &cfg,
        Services {
            provider: &provider,
            model: &first_model,
            store: &store,
        },
    );
    let err = workflow
        .start(&paths.runs_dir, task.clone())
        .expect_err("save fails");
    assert!(format!("{err:#}").contains("database unavailable"));
    assert_eq!(first_model.calls(), 4);

    let run_dirs: Vec<_> = fs::read_dir(&paths.runs_dir)
        .expect("runs dir")
        .map(|entry| entry.expect("entry").file_name().into_string().expect("utf8"))
        .collect();
    assert_eq!(run_dirs.len(), 1);
    let run_id = run_dirs[0].clone();
    let run_paths = RunPaths::new(&paths.runs_dir, &run_id);
    let failed = load_run_record(&run_paths.record_path).expect("record");
    assert_eq!(failed.status, RunStatus::Failed);
    assert!(
        failed
            .error
            .as_deref()
            .is_some_and(|e| e.contains("save-result"))
    );
    assert!(run_paths.iterations_dir.join("1/meta.json").is_file());

    // Every inference is journaled, so the resumed run must not call the model.
    store.heal();
    let idle_model = ScriptedModel::new(Vec::new());
    let workflow = Workflow::new(
        &cfg,
        Services {
            provider: &provider,
            model: &idle_model,
            store: &store,
        },
    );
    let outcome = workflow.resume(&paths.runs_dir, &run_id).expect("resume");
    assert_eq!(outcome.kind, MessageKind::Result);
    assert_eq!(outcome.output.files["hello.txt"], "Hello, world!");
    assert_eq!(idle_model.calls(), 0);

    let sandboxes = fs::read_dir(&paths.sandboxes_dir).expect("sandboxes").count();
    assert_eq!(sandboxes, 1);
    let messages = store.find_messages("p1").expect("messages");
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].kind, MessageKind::Result);

    // A completed run returns its recorded output and persists nothing new.
    let again = workflow.resume(&paths.runs_dir, &run_id).expect("resume again");
    assert_eq!(again, outcome);
    assert_eq!(store.find_messages("p1").expect("messages").len(), 2);
    let record = load_run_record(&run_paths.record_path).expect("record");
    assert_eq!(record.status, RunStatus::Completed);
    assert!(record.error.is_none());
}

fn first_user_text(request: &InferenceRequest) -> String {
    request
        .messages
        .iter()
        .find_map(|item| match item {
            ConversationItem::Text {
                role: Role::User,
                content,
            } => Some(content.joined()),
            _ => None,
        })
        .unwrap_or_default()
}

#[test]
fn concurrent_runs_keep_state_isolated() {
    let cfg = fast_config();
    let provider = MemorySandboxProvider::default();
    let store = MemoryConversationStore::default();
    // Code agent: write `<task>.txt`, then summarize. Summarizers: echo a title.
    let model = FnModel(|request: &InferenceRequest| -> Result<ModelResponse> {
        if request.tools.is_empty() {
            return Ok(text_response("Title"));
        }
        let task = first_user_text(request);
        match request.messages.last() {
            Some(ConversationItem::ToolResult { .. }) => Ok(text_response(&format!(
                "<task_summary>wrote {task}.txt</task_summary>"
            ))),
            _ => Ok(tool_call_response(
                "call-1",
                "createOrUpdateFiles",
                json!({"files": [{"path": format!("{task}.txt"), "content": task}]}),
            )),
        }
    });

    let outputs = thread::scope(|scope| {
        let handles: Vec<_> = ["alpha", "beta"]
            .into_iter()
            .map(|name| {
                let (cfg, provider, store, model) = (&cfg, &provider, &store, &model);
                scope.spawn(move || {
                    let workflow = Workflow::new(
                        cfg,
                        Services {
                            provider,
                            model,
                            store,
                        },
                    );
                    let journal = StepJournal::in_memory(cfg.retry.clone());
                    workflow
                        .execute(name, &event(name, name), &journal, None)
                        .expect("run")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect::<Vec<_>>()
    });

    for ((kind, output), name) in outputs.iter().zip(["alpha", "beta"]) {
        assert_eq!(*kind, MessageKind::Result);
        assert_eq!(output.files.len(), 1, "{name} saw foreign files");
        assert_eq!(output.files[&format!("{name}.txt")], name);
    }
    assert_eq!(provider.sandbox_count(), 2);
    let messages = store.all();
    assert_eq!(messages.len(), 2);
    for name in ["alpha", "beta"] {
        let message = messages
            .iter()
            .find(|m| m.project_id == name)
            .expect("message per project");
        let fragment = message.fragment.as_ref().expect("fragment");
        assert_eq!(fragment.files.keys().collect::<Vec<_>>(), vec![&format!("{name}.txt")]);
    }
}

#[test]
fn rerunning_save_without_its_journal_record_stores_one_message() {
    let cfg = fast_config();
    let provider = MemorySandboxProvider::default();
    let store = MemoryConversationStore::default();
    let model = FnModel(|request: &InferenceRequest| -> Result<ModelResponse> {
        if request.tools.is_empty() {
            return Ok(text_response("Title"));
        }
        match request.messages.last() {
            Some(ConversationItem::ToolResult { .. }) => {
                Ok(text_response("<task_summary>Created hello.txt</task_summary>"))
            }
            _ => Ok(write_hello()),
        }
    });
    let workflow = Workflow::new(
        &cfg,
        Services {
            provider: &provider,
            model: &model,
            store: &store,
        },
    );

    // A journal that never got the save-result record replays nothing.
    for _ in 0..2 {
        let (kind, _) = workflow
            .execute(
                "run-7",
                &event("p1", "create a hello world file"),
                &StepJournal::in_memory(cfg.retry.clone()),
                None,
            )
            .expect("run");
        assert_eq!(kind, MessageKind::Result);
    }

    let messages = store.all();
    assert_eq!(messages.len(), 1);
    assert_eq!(
        messages[0].idempotency_key.as_deref(),
        Some("run-7/save-result")
    );
}
