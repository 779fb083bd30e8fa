//! Durable step journal (`.genesis/runs/<run-id>/steps.json`).
//!
//! Every externally effectful operation of a run goes through
//! [`StepJournal::run_step`] under a deterministic name. A step that already
//! completed is replayed from its recorded result instead of executing again,
//! so a restarted run never recreates sandboxes, rewrites files twice or
//! persists a second message.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::atomic::write_json_atomic;
use super::config::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
struct StepRecord {
    output: Value,
    attempts: u32,
    completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct JournalFile {
    steps: BTreeMap<String, StepRecord>,
}

#[derive(Debug)]
pub struct StepJournal {
    path: Option<PathBuf>,
    retry: RetryConfig,
    steps: Mutex<BTreeMap<String, StepRecord>>,
}

impl StepJournal {
    /// Open (or start) a file-backed journal.
    pub fn open(path: &Path, retry: RetryConfig) -> Result<Self> {
        let steps = if path.exists() {
            let contents =
                fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
            let file: JournalFile = serde_json::from_str(&contents)
                .with_context(|| format!("parse {}", path.display()))?;
            file.steps
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), completed = steps.len(), "journal opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            retry,
            steps: Mutex::new(steps),
        })
    }

    /// Journal that lives only as long as this value.
    pub fn in_memory(retry: RetryConfig) -> Self {
        Self {
            path: None,
            retry,
            steps: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn is_completed(&self, name: &str) -> bool {
        self.steps
            .lock()
            .map(|steps| steps.contains_key(name))
            .unwrap_or(false)
    }

    /// Names of completed steps, sorted.
    pub fn completed_steps(&self) -> Vec<String> {
        self.steps
            .lock()
            .map(|steps| steps.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Run `step` once per journal under `name`.
    ///
    /// A recorded result is returned without calling `step`. Otherwise `step`
    /// is attempted up to `retry.max_attempts` times with exponential backoff;
    /// only a successful result is recorded.
    #[instrument(skip(self, step))]
    pub fn run_step<T, F>(&self, name: &str, mut step: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Result<T>,
    {
        if let Some(record) = self.recorded(name)? {
            debug!("replaying recorded step");
            return serde_json::from_value(record.output)
                .with_context(|| format!("decode recorded step {name}"));
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1u32;
        loop {
            match step() {
                Ok(value) => {
                    self.record(name, &value, attempt)?;
                    return Ok(value);
                }
                Err(err) if attempt < max_attempts => {
                    let delay = backoff(self.retry.backoff_ms, attempt);
                    warn!(attempt, max_attempts, delay_ms = delay.as_millis() as u64, err = %format!("{err:#}"), "step failed, retrying");
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err.context(format!(
                        "step {name} failed after {attempt} attempt(s)"
                    )));
                }
            }
        }
    }

    fn recorded(&self, name: &str) -> Result<Option<StepRecord>> {
        let steps = self
            .steps
            .lock()
            .map_err(|_| anyhow!("step journal lock poisoned"))?;
        Ok(steps.get(name).cloned())
    }

    fn record<T: Serialize>(&self, name: &str, value: &T, attempts: u32) -> Result<()> {
        let output =
            serde_json::to_value(value).with_context(|| format!("encode step {name}"))?;
        let mut steps = self
            .steps
            .lock()
            .map_err(|_| anyhow!("step journal lock poisoned"))?;
        steps.insert(
            name.to_string(),
            StepRecord {
                output,
                attempts,
                completed_at: Utc::now(),
            },
        );
        if let Some(path) = &self.path {
            write_json_atomic(
                path,
                &JournalFile {
                    steps: steps.clone(),
                },
            )?;
        }
        debug!(step = name, attempts, "step recorded");
        Ok(())
    }
}

fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let factor = 1u64 << (attempt.saturating_sub(1)).min(16);
    Duration::from_millis(base_ms.saturating_mul(factor))
}
