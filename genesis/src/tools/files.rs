//! `createOrUpdateFiles` and `readFiles`.
//!
//! Writes are journaled together with the set of paths that actually landed,
//! and merged into the network state only after the step returns. A replayed
//! step therefore produces the same state without touching the sandbox.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{Tool, ToolContext, parse_params};
use crate::core::types::FileMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct WriteParams {
    files: Vec<FileEntry>,
}

#[derive(Debug, Deserialize)]
struct ReadParams {
    files: Vec<String>,
}

/// Journaled outcome of one `createOrUpdateFiles` call.
#[derive(Debug, Serialize, Deserialize)]
struct WriteRecord {
    output: String,
    written: FileMap,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CreateOrUpdateFiles;

impl Tool for CreateOrUpdateFiles {
    fn name(&self) -> &str {
        "createOrUpdateFiles"
    }

    fn description(&self) -> &str {
        "Create or update files in the sandbox"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "path": { "type": "string", "minLength": 1 },
                            "content": { "type": "string" }
                        },
                        "required": ["path", "content"],
                        "additionalProperties": false
                    }
                }
            },
            "required": ["files"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String> {
        let params: WriteParams = match parse_params(self.name(), args) {
            Ok(params) => params,
            Err(message) => return Ok(message),
        };
        let provider = ctx.provider;
        let sandbox_id = ctx.sandbox_id;

        let record: WriteRecord = ctx.journal.run_step(&ctx.step_name, || {
            let session = provider.connect(sandbox_id)?;
            let mut written = FileMap::new();
            for file in &params.files {
                if let Err(err) = session.write_file(&file.path, &file.content) {
                    warn!(path = %file.path, err = %format!("{err:#}"), "file write failed");
                    return Ok(WriteRecord {
                        output: format!("Error: {err:#}"),
                        written: FileMap::new(),
                    });
                }
                written.insert(file.path.clone(), file.content.clone());
            }
            let paths: Vec<&str> = written.keys().map(String::as_str).collect();
            Ok(WriteRecord {
                output: format!("Updated files: {}", paths.join(", ")),
                written,
            })
        })?;

        if !record.written.is_empty() {
            ctx.state.merge_files(&record.written);
            debug!(
                merged = record.written.len(),
                total = ctx.state.files.len(),
                "files merged into state"
            );
        }
        Ok(record.output)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ReadFiles;

impl Tool for ReadFiles {
    fn name(&self) -> &str {
        "readFiles"
    }

    fn description(&self) -> &str {
        "Read files from the sandbox"
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "files": {
                    "type": "array",
                    "items": { "type": "string", "minLength": 1 }
                }
            },
            "required": ["files"],
            "additionalProperties": false
        })
    }

    fn invoke(&self, args: Value, ctx: &mut ToolContext<'_>) -> Result<String> {
        let params: ReadParams = match parse_params(self.name(), args) {
            Ok(params) => params,
            Err(message) => return Ok(message),
        };
        let provider = ctx.provider;
        let sandbox_id = ctx.sandbox_id;

        ctx.journal.run_step(&ctx.step_name, || {
            let session = provider.connect(sandbox_id)?;
            let mut contents = Vec::with_capacity(params.files.len());
            for path in &params.files {
                match session.read_file(path) {
                    Ok(content) => contents.push(FileEntry {
                        path: path.clone(),
                        content,
                    }),
                    Err(err) => return Ok(format!("Error: {err:#}")),
                }
            }
            Ok(serde_json::to_string(&contents)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state::NetworkState;
    use crate::core::types::ToolCallRequest;
    use crate::io::config::RetryConfig;
    use crate::io::journal::StepJournal;
    use crate::io::sandbox::SandboxProvider;
    use crate::test_support::MemorySandboxProvider;
    use crate::tools::ToolSet;

    fn write_call(files: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call-1".into(),
            name: "createOrUpdateFiles".into(),
            arguments: json!({ "files": files }),
        }
    }

    #[test]
    fn successive_writes_merge_into_state() {
        let provider = MemorySandboxProvider::default();
        let sandbox = provider.create("t").expect("create");
        let journal = StepJournal::in_memory(RetryConfig::default());
        let mut state = NetworkState::new();
        let tools = ToolSet::sandbox_tools().expect("tools");

        for (step, path, content) in [("tool-0", "a.txt", "x"), ("tool-1", "b.txt", "y")] {
            let mut ctx = ToolContext {
                provider: &provider,
                sandbox_id: &sandbox.id,
                journal: &journal,
                state: &mut state,
                step_name: format!("iter-1/round-1/{step}-createOrUpdateFiles"),
                output_sink: None,
            };
            let out = tools
                .dispatch(
                    &write_call(json!([{ "path": path, "content": content }])),
                    &mut ctx,
                )
                .expect("dispatch");
            assert_eq!(out, format!("Updated files: {path}"));
        }

        assert_eq!(state.files.len(), 2);
        assert_eq!(state.files["a.txt"], "x");
        assert_eq!(state.files["b.txt"], "y");
        assert_eq!(provider.file(&sandbox.id, "b.txt").as_deref(), Some("y"));
    }

    #[test]
    fn failed_write_leaves_state_unchanged() {
        let provider = MemorySandboxProvider::default();
        let sandbox = provider.create("t").expect("create");
        provider.fail_writes_to("bad.txt");
        let journal = StepJournal::in_memory(RetryConfig::default());
        let mut state = NetworkState::new();
        state.files.insert("keep.txt".into(), "1".into());
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
                &write_call(json!([
                    { "path": "ok.txt", "content": "a" },
                    { "path": "bad.txt", "content": "b" }
                ])),
                &mut ctx,
            )
            .expect("dispatch");
        assert!(out.starts_with("Error:"));
        assert_eq!(state.files.len(), 1);
        assert!(state.files.contains_key("keep.txt"));
    }

    #[test]
    fn replayed_write_merges_without_touching_sandbox() {
        let provider = MemorySandboxProvider::default();
        let sandbox = provider.create("t").expect("create");
        let journal = StepJournal::in_memory(RetryConfig::default());
        let tools = ToolSet::sandbox_tools().expect("tools");
        let call = write_call(json!([{ "path": "a.txt", "content": "x" }]));
        let step = "iter-1/round-1/tool-0-createOrUpdateFiles";

        let mut first = NetworkState::new();
        let mut ctx = ToolContext {
            provider: &provider,
            sandbox_id: &sandbox.id,
            journal: &journal,
            state: &mut first,
            step_name: step.into(),
            output_sink: None,
        };
        tools.dispatch(&call, &mut ctx).expect("first");
        let writes_before = provider.write_count();

        let mut replayed = NetworkState::new();
        let mut ctx = ToolContext {
            provider: &provider,
            sandbox_id: &sandbox.id,
            journal: &journal,
            state: &mut replayed,
            step_name: step.into(),
            output_sink: None,
        };
        tools.dispatch(&call, &mut ctx).expect("replay");

        assert_eq!(provider.write_count(), writes_before);
        assert_eq!(replayed, first);
    }

    #[test]
    fn read_files_returns_path_content_pairs() {
        let provider = MemorySandboxProvider::default();
        let sandbox = provider.create("t").expect("create");
        provider
            .connect(&sandbox.id)
            .expect("connect")
            .write_file("app/page.tsx", "page")
            .expect("seed");
        let journal = StepJournal::in_memory(RetryConfig::default());
        let mut state = NetworkState::new();
        let tools = ToolSet::sandbox_tools().expect("tools");
        let mut ctx = ToolContext {
            provider: &provider,
            sandbox_id: &sandbox.id,
            journal: &journal,
            state: &mut state,
            step_name: "iter-1/round-1/tool-0-readFiles".into(),
            output_sink: None,
        };

        let call = ToolCallRequest {
            id: "call-2".into(),
            name: "readFiles".into(),
            arguments: json!({ "files": ["app/page.tsx"] }),
        };
        let out = tools.dispatch(&call, &mut ctx).expect("dispatch");
        let entries: Vec<FileEntry> = serde_json::from_str(&out).expect("json");
        assert_eq!(
            entries,
            vec![FileEntry {
                path: "app/page.tsx".into(),
                content: "page".into()
            }]
        );

        let missing = ToolCallRequest {
            arguments: json!({ "files": ["app/page.tsx", "nope.ts"] }),
            ..call
        };
        ctx.step_name = "iter-1/round-1/tool-1-readFiles".into();
        let out = tools.dispatch(&missing, &mut ctx).expect("dispatch");
        assert!(out.starts_with("Error:"));
    }
}
