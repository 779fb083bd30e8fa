//! Test doubles for the model, sandbox and conversation store, plus a temp
//! `.genesis/` fixture.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use chrono::Utc;
use serde_json::Value;
use tempfile::TempDir;

use crate::core::types::{ConversationItem, FileMap, ModelResponse};
use crate::io::init::{GenesisPaths, InitOptions, init_genesis};
use crate::io::model::{InferenceRequest, ModelClient};
use crate::io::process::OutputSink;
use crate::io::sandbox::{CommandResult, SandboxHandle, SandboxProvider, SandboxSession};
use crate::io::store::{ConversationStore, NewMessage, StoredMessage};

/// Response carrying a single assistant text.
pub fn text_response(text: &str) -> ModelResponse {
    ModelResponse {
        output: vec![ConversationItem::assistant(text)],
    }
}

/// Response carrying a single tool call.
pub fn tool_call_response(id: &str, name: &str, arguments: Value) -> ModelResponse {
    ModelResponse {
        output: vec![ConversationItem::ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments,
        }],
    }
}

/// Model returning queued responses in order. An empty queue is an error.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests: Mutex<Vec<InferenceRequest>>,
    calls: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Number of `infer` calls, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }
}

impl ModelClient for ScriptedModel {
    fn infer(&self, request: &InferenceRequest) -> Result<ModelResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .map_err(|_| anyhow!("requests lock poisoned"))?
            .push(request.clone());
        self.responses
            .lock()
            .map_err(|_| anyhow!("responses lock poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("scripted model has no response left"))
    }
}

/// Model computing each response from the request.
pub struct FnModel<F>(pub F);

impl<F> ModelClient for FnModel<F>
where
    F: Fn(&InferenceRequest) -> Result<ModelResponse> + Send + Sync,
{
    fn infer(&self, request: &InferenceRequest) -> Result<ModelResponse> {
        (self.0)(request)
    }
}

#[derive(Debug, Default)]
struct MemorySandboxes {
    sandboxes: BTreeMap<String, FileMap>,
    failing_writes: BTreeSet<String>,
    failing_commands: BTreeMap<String, CommandResult>,
    writes: usize,
    commands: Vec<String>,
}

/// In-memory sandbox provider. Clones share the same sandboxes.
#[derive(Debug, Clone, Default)]
pub struct MemorySandboxProvider {
    inner: Arc<Mutex<MemorySandboxes>>,
}

impl MemorySandboxProvider {
    fn with<T>(&self, f: impl FnOnce(&mut MemorySandboxes) -> T) -> Result<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| anyhow!("sandbox lock poisoned"))?;
        Ok(f(&mut inner))
    }

    /// Make every write to `path` fail.
    pub fn fail_writes_to(&self, path: &str) {
        let _ = self.with(|inner| inner.failing_writes.insert(path.to_string()));
    }

    /// Make `command` return `result` instead of succeeding.
    pub fn fail_command(&self, command: &str, result: CommandResult) {
        let _ = self.with(|inner| inner.failing_commands.insert(command.to_string(), result));
    }

    pub fn sandbox_count(&self) -> usize {
        self.with(|inner| inner.sandboxes.len()).unwrap_or_default()
    }

    pub fn write_count(&self) -> usize {
        self.with(|inner| inner.writes).unwrap_or_default()
    }

    pub fn commands(&self) -> Vec<String> {
        self.with(|inner| inner.commands.clone())
            .unwrap_or_default()
    }

    pub fn file(&self, sandbox_id: &str, path: &str) -> Option<String> {
        self.with(|inner| {
            inner
                .sandboxes
                .get(sandbox_id)
                .and_then(|files| files.get(path).cloned())
        })
        .ok()
        .flatten()
    }
}

impl SandboxProvider for MemorySandboxProvider {
    fn create(&self, template: &str) -> Result<SandboxHandle> {
        self.with(|inner| {
            let id = format!("sbx-mem-{}", inner.sandboxes.len() + 1);
            inner.sandboxes.insert(id.clone(), FileMap::new());
            SandboxHandle {
                id,
                template: template.to_string(),
            }
        })
    }

    fn connect(&self, id: &str) -> Result<Box<dyn SandboxSession>> {
        let known = self.with(|inner| inner.sandboxes.contains_key(id))?;
        if !known {
            return Err(anyhow!("unknown sandbox {id}"));
        }
        Ok(Box::new(MemorySandboxSession {
            id: id.to_string(),
            provider: self.clone(),
        }))
    }
}

struct MemorySandboxSession {
    id: String,
    provider: MemorySandboxProvider,
}

impl SandboxSession for MemorySandboxSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn run(&self, command: &str, sink: Option<OutputSink>) -> Result<CommandResult> {
        let scripted = self.provider.with(|inner| {
            inner.commands.push(command.to_string());
            inner.failing_commands.get(command).cloned()
        })?;
        let result = scripted.unwrap_or_else(|| CommandResult {
            stdout: format!("ran {command}\n"),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
        });
        if let Some(sink) = sink {
            for line in result.stdout.lines() {
                sink(crate::io::process::StreamKind::Stdout, line);
            }
        }
        Ok(result)
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let id = self.id.clone();
        self.provider.with(|inner| {
            if inner.failing_writes.contains(path) {
                return Err(anyhow!("permission denied: {path}"));
            }
            inner.writes += 1;
            inner
                .sandboxes
                .entry(id)
                .or_default()
                .insert(path.to_string(), content.to_string());
            Ok(())
        })?
    }

    fn read_file(&self, path: &str) -> Result<String> {
        self.provider
            .file(&self.id, path)
            .ok_or_else(|| anyhow!("no such file: {path}"))
    }

    fn host_url(&self, port: u16) -> String {
        format!("https://{port}-{}.memory.test", self.id)
    }
}

/// Conversation store kept in memory.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl MemoryConversationStore {
    pub fn with_messages(messages: Vec<StoredMessage>) -> Self {
        Self {
            messages: Mutex::new(messages),
        }
    }

    pub fn all(&self) -> Vec<StoredMessage> {
        self.messages
            .lock()
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }
}

impl ConversationStore for MemoryConversationStore {
    fn find_messages(&self, project_id: &str) -> Result<Vec<StoredMessage>> {
        let messages = self
            .messages
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        Ok(messages
            .iter()
            .filter(|message| message.project_id == project_id)
            .cloned()
            .collect())
    }

    fn create_message(&self, message: NewMessage) -> Result<StoredMessage> {
        let mut messages = self
            .messages
            .lock()
            .map_err(|_| anyhow!("store lock poisoned"))?;
        if let Some(key) = message.idempotency_key.as_deref() {
            let existing = messages.iter().find(|stored| {
                stored.project_id == message.project_id
                    && stored.idempotency_key.as_deref() == Some(key)
            });
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }
        let stored = StoredMessage {
            id: format!("msg-{}", messages.len() + 1),
            project_id: message.project_id,
            role: message.role,
            kind: message.kind,
            content: message.content,
            created_at: Utc::now(),
            fragment: message.fragment,
            idempotency_key: message.idempotency_key,
        };
        messages.push(stored.clone());
        Ok(stored)
    }
}

/// Temporary directory with initialized `.genesis/` scaffolding.
pub struct TempGenesis {
    dir: TempDir,
    pub paths: GenesisPaths,
}

impl TempGenesis {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let paths = init_genesis(dir.path(), &InitOptions { force: false })?;
        Ok(Self { dir, paths })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }
}
