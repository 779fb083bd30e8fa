//! Initialization helpers for `.genesis/` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use super::config::{EngineConfig, write_config};

const GENESIS_GITIGNORE: &str = "sandboxes/\nruns/\n";

/// All canonical paths within `.genesis/` for a project root.
#[derive(Debug, Clone)]
pub struct GenesisPaths {
    pub root: PathBuf,
    pub genesis_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub sandboxes_dir: PathBuf,
    pub templates_dir: PathBuf,
    pub projects_dir: PathBuf,
    pub runs_dir: PathBuf,
}

impl GenesisPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let genesis_dir = root.join(".genesis");
        Self {
            root: root.clone(),
            genesis_dir: genesis_dir.clone(),
            gitignore_path: genesis_dir.join(".gitignore"),
            config_path: genesis_dir.join("config.toml"),
            sandboxes_dir: genesis_dir.join("sandboxes"),
            templates_dir: genesis_dir.join("templates"),
            projects_dir: genesis_dir.join("projects"),
            runs_dir: genesis_dir.join("runs"),
        }
    }
}

/// Options for `init_genesis`.
#[derive(Debug, Clone)]
pub struct InitOptions {
    /// If true, overwrite the existing config.
    pub force: bool,
}

/// Create `.genesis/` scaffolding in `root`.
///
/// Fails if `.genesis/` already exists unless `options.force` is set. Existing
/// projects, runs and sandboxes are never removed.
pub fn init_genesis(root: &Path, options: &InitOptions) -> Result<GenesisPaths> {
    let paths = GenesisPaths::new(root);
    if paths.genesis_dir.exists() && !options.force {
        return Err(anyhow!(
            "genesis init: .genesis already exists (use --force to overwrite)"
        ));
    }
    if paths.genesis_dir.exists() && !paths.genesis_dir.is_dir() {
        return Err(anyhow!(
            "genesis init: .genesis exists but is not a directory"
        ));
    }

    for dir in [
        &paths.genesis_dir,
        &paths.sandboxes_dir,
        &paths.templates_dir,
        &paths.projects_dir,
        &paths.runs_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    fs::write(&paths.gitignore_path, GENESIS_GITIGNORE)
        .with_context(|| format!("write {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &EngineConfig::default())?;

    Ok(paths)
}
