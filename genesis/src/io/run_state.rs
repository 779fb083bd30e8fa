//! Run records (`.genesis/runs/<run-id>/run.json`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rand::{Rng, distributions::Alphanumeric};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::atomic::write_json_atomic;
use crate::core::outcome::MessageKind;
use crate::core::types::{TaskEvent, WorkflowOutput};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

/// Persisted bookkeeping for one workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub event: TaskEvent,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Kind of the persisted message once the run completed.
    pub outcome: Option<MessageKind>,
    pub output: Option<WorkflowOutput>,
    /// Error chain of the last infrastructure failure. Never shown to end users.
    pub error: Option<String>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, event: TaskEvent) -> Self {
        Self {
            run_id: run_id.into(),
            event,
            status: RunStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            outcome: None,
            output: None,
            error: None,
        }
    }

    pub fn complete(&mut self, outcome: MessageKind, output: WorkflowOutput) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.outcome = Some(outcome);
        self.output = Some(output);
        self.error = None;
    }

    /// Mark a failed or interrupted run as running again.
    pub fn resume(&mut self) {
        self.status = RunStatus::Running;
        self.finished_at = None;
        self.error = None;
    }

    pub fn fail(&mut self, err: &anyhow::Error) {
        self.status = RunStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(format!("{err:#}"));
    }
}

/// Files owned by one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub dir: PathBuf,
    pub record_path: PathBuf,
    pub journal_path: PathBuf,
    pub iterations_dir: PathBuf,
}

impl RunPaths {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let dir = runs_dir.join(run_id);
        Self {
            dir: dir.clone(),
            record_path: dir.join("run.json"),
            journal_path: dir.join("steps.json"),
            iterations_dir: dir.join("iterations"),
        }
    }
}

/// Load a run record from disk.
pub fn load_run_record(path: &Path) -> Result<RunRecord> {
    debug!(path = %path.display(), "loading run record");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run record {}", path.display()))?;
    let record: RunRecord = serde_json::from_str(&contents)
        .with_context(|| format!("parse run record {}", path.display()))?;
    Ok(record)
}

/// Atomically write a run record to disk.
pub fn write_run_record(path: &Path, record: &RunRecord) -> Result<()> {
    debug!(path = %path.display(), run_id = %record.run_id, status = ?record.status, "writing run record");
    write_json_atomic(path, record)
}

/// `run-<utc timestamp>-<6 char suffix>`.
pub fn generate_run_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let mut rng = rand::thread_rng();
    let suffix: String = std::iter::repeat_with(|| rng.sample(Alphanumeric))
        .map(char::from)
        .take(6)
        .collect::<String>()
        .to_lowercase();
    format!("run-{timestamp}-{suffix}")
}

pub fn validate_run_id(id: &str) -> Result<()> {
    let valid = id.starts_with("run-")
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(anyhow!("invalid run id {id:?}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> TaskEvent {
        TaskEvent {
            project_id: "p1".into(),
            value: "create a hello world file".into(),
        }
    }

    #[test]
    fn record_round_trips_through_disk() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = RunPaths::new(temp.path(), "run-1");
        let mut record = RunRecord::new("run-1", event());
        record.fail(&anyhow!("sandbox unreachable").context("step get-sandbox-id"));

        write_run_record(&paths.record_path, &record).expect("write");
        let loaded = load_run_record(&paths.record_path).expect("load");
        assert_eq!(loaded, record);
        assert_eq!(loaded.status, RunStatus::Failed);
        assert_eq!(
            loaded.error.as_deref(),
            Some("step get-sandbox-id: sandbox unreachable")
        );
    }

    #[test]
    fn complete_clears_previous_error() {
        let mut record = RunRecord::new("run-1", event());
        record.fail(&anyhow!("boom"));
        record.complete(
            MessageKind::Error,
            WorkflowOutput {
                url: "u".into(),
                title: "t".into(),
                files: Default::default(),
                summary: String::new(),
            },
        );
        assert_eq!(record.status, RunStatus::Completed);
        assert!(record.error.is_none());
    }

    #[test]
    fn generated_run_ids_validate() {
        let id = generate_run_id();
        validate_run_id(&id).expect("valid");
        assert!(validate_run_id("../run-1").is_err());
        assert!(validate_run_id("sbx-1").is_err());
    }
}
