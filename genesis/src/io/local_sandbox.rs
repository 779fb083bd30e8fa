//! Sandbox provider backed by local directories.
//!
//! Layout per sandbox: `<sandboxes>/<id>/sandbox.json` (metadata) and
//! `<sandboxes>/<id>/fs/` (the root that `sandbox.workdir` maps onto).

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use walkdir::WalkDir;

use super::atomic::write_json_atomic;
use super::config::EngineConfig;
use super::process::{OutputSink, run_command_with_stream};
use super::sandbox::{CommandResult, SandboxHandle, SandboxProvider, SandboxSession};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SandboxMeta {
    id: String,
    template: String,
    created_at: DateTime<Utc>,
}

/// Settings shared by every sandbox of a provider.
#[derive(Debug, Clone)]
struct SessionSettings {
    workdir: String,
    host_domain: String,
    timeout: Duration,
    output_limit_bytes: usize,
}

#[derive(Debug, Clone)]
pub struct LocalSandboxProvider {
    sandboxes_dir: PathBuf,
    templates_dir: PathBuf,
    settings: SessionSettings,
}

impl LocalSandboxProvider {
    pub fn new(sandboxes_dir: &Path, templates_dir: &Path, cfg: &EngineConfig) -> Self {
        Self {
            sandboxes_dir: sandboxes_dir.to_path_buf(),
            templates_dir: templates_dir.to_path_buf(),
            settings: SessionSettings {
                workdir: cfg.sandbox.workdir.clone(),
                host_domain: cfg.sandbox.host_domain.clone(),
                timeout: cfg.step_timeout(),
                output_limit_bytes: cfg.command_output_limit_bytes,
            },
        }
    }

    fn sandbox_dir(&self, id: &str) -> PathBuf {
        self.sandboxes_dir.join(id)
    }
}

impl SandboxProvider for LocalSandboxProvider {
    #[instrument(skip(self))]
    fn create(&self, template: &str) -> Result<SandboxHandle> {
        let id = generate_sandbox_id();
        let dir = self.sandbox_dir(&id);
        let fs_root = dir.join("fs");
        fs::create_dir_all(&fs_root)
            .with_context(|| format!("create sandbox root {}", fs_root.display()))?;

        let template_dir = self.templates_dir.join(template);
        if template_dir.is_dir() {
            copy_tree(&template_dir, &fs_root)
                .with_context(|| format!("copy template {template}"))?;
        } else {
            debug!(template, "template directory missing, starting empty");
        }

        write_json_atomic(
            &dir.join("sandbox.json"),
            &SandboxMeta {
                id: id.clone(),
                template: template.to_string(),
                created_at: Utc::now(),
            },
        )?;
        info!(sandbox_id = %id, template, "sandbox created");
        Ok(SandboxHandle {
            id,
            template: template.to_string(),
        })
    }

    fn connect(&self, id: &str) -> Result<Box<dyn SandboxSession>> {
        validate_sandbox_id(id)?;
        let dir = self.sandbox_dir(id);
        let meta_path = dir.join("sandbox.json");
        let contents = fs::read_to_string(&meta_path)
            .with_context(|| format!("unknown sandbox {id} ({})", meta_path.display()))?;
        let meta: SandboxMeta = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", meta_path.display()))?;
        debug!(sandbox_id = %meta.id, "sandbox connected");
        Ok(Box::new(LocalSandboxSession {
            id: meta.id,
            fs_root: dir.join("fs"),
            settings: self.settings.clone(),
        }))
    }
}

#[derive(Debug)]
pub struct LocalSandboxSession {
    id: String,
    fs_root: PathBuf,
    settings: SessionSettings,
}

impl LocalSandboxSession {
    /// Map a sandbox path onto the local root, rejecting anything that escapes it.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        resolve_sandbox_path(&self.fs_root, &self.settings.workdir, path)
    }
}

impl SandboxSession for LocalSandboxSession {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(skip(self, sink), fields(sandbox_id = %self.id))]
    fn run(&self, command: &str, sink: Option<OutputSink>) -> Result<CommandResult> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.fs_root)
            .env("HOME", &self.fs_root)
            .env("SANDBOX_WORKDIR", &self.settings.workdir);
        let output = run_command_with_stream(
            cmd,
            None,
            self.settings.timeout,
            self.settings.output_limit_bytes,
            sink,
        )
        .context("run sandbox command")?;
        Ok(CommandResult {
            stdout: output.stdout_lossy(),
            stderr: output.stderr_lossy(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }

    fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let target = self.resolve(path)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create directory for {path}"))?;
        }
        fs::write(&target, content).with_context(|| format!("write {path}"))
    }

    fn read_file(&self, path: &str) -> Result<String> {
        let target = self.resolve(path)?;
        fs::read_to_string(&target).with_context(|| format!("read {path}"))
    }

    fn host_url(&self, port: u16) -> String {
        format!("https://{port}-{}.{}", self.id, self.settings.host_domain)
    }
}

fn resolve_sandbox_path(fs_root: &Path, workdir: &str, path: &str) -> Result<PathBuf> {
    let relative = if path.starts_with('/') {
        let workdir = workdir.trim_end_matches('/');
        let rest = path
            .strip_prefix(workdir)
            .filter(|rest| rest.is_empty() || rest.starts_with('/'))
            .ok_or_else(|| anyhow!("path {path} is outside the sandbox workdir {workdir}"))?;
        rest.trim_start_matches('/')
    } else {
        path
    };

    let mut resolved = fs_root.to_path_buf();
    let mut depth = 0usize;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!("path {path} escapes the sandbox"));
            }
        }
    }
    if depth == 0 {
        return Err(anyhow!("path {path} does not name a file"));
    }
    Ok(resolved)
}

fn validate_sandbox_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(anyhow!("invalid sandbox id {id:?}"));
    }
    Ok(())
}

fn generate_sandbox_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(12)
        .collect::<String>()
        .to_lowercase();
    format!("sbx-{suffix}")
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from).min_depth(1) {
        let entry = entry.with_context(|| format!("walk {}", from.display()))?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .with_context(|| format!("relativize {}", entry.path().display()))?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).with_context(|| format!("create {}", target.display()))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}
