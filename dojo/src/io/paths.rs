//! Canonical on-disk layout of one episode's output directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::io::scorer::SUBMISSION_FILE;

/// All canonical paths within an episode directory.
#[derive(Debug, Clone)]
pub struct EpisodePaths {
    pub dir: PathBuf,
    pub history_path: PathBuf,
    pub episode_meta_path: PathBuf,
    pub journal_path: PathBuf,
    pub best_solution_path: PathBuf,
    pub workspaces_dir: PathBuf,
    pub generation_schema_path: PathBuf,
}

impl EpisodePaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            history_path: dir.join("history.jsonl"),
            episode_meta_path: dir.join("episode.json"),
            journal_path: dir.join("journal.json"),
            best_solution_path: dir.join("best_solution.py"),
            workspaces_dir: dir.join("workspaces"),
            generation_schema_path: dir.join("generation.schema.json"),
            dir,
        }
    }

    /// Workspace for the attempt numbered `counter`.
    ///
    /// The counter comes from the journal or the environment, never from
    /// scanning `workspaces/`.
    pub fn workspace(&self, counter: u32) -> NodeWorkspace {
        NodeWorkspace::new(self.workspaces_dir.join(counter.to_string()))
    }

    /// Artifacts of an earlier episode present in this directory.
    pub fn previous_artifacts(&self) -> Vec<&Path> {
        [
            &self.history_path,
            &self.episode_meta_path,
            &self.journal_path,
            &self.best_solution_path,
            &self.workspaces_dir,
        ]
        .into_iter()
        .map(PathBuf::as_path)
        .filter(|path| path.exists())
        .collect()
    }

    /// Delete every artifact reported by [`Self::previous_artifacts`].
    pub fn clear_previous(&self) -> Result<()> {
        for path in self.previous_artifacts() {
            warn!(path = %path.display(), "removing previous episode artifact");
            let removed = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            removed.with_context(|| format!("remove {}", path.display()))?;
        }
        Ok(())
    }
}

/// Files of a single attempt's workspace.
#[derive(Debug, Clone)]
pub struct NodeWorkspace {
    pub dir: PathBuf,
    pub solution_path: PathBuf,
    pub submission_path: PathBuf,
    pub exec_log_path: PathBuf,
    pub prompt_path: PathBuf,
    pub generation_path: PathBuf,
    pub generation_log_path: PathBuf,
}

impl NodeWorkspace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            solution_path: dir.join("solution.py"),
            submission_path: dir.join(SUBMISSION_FILE),
            exec_log_path: dir.join("exec.log"),
            prompt_path: dir.join("prompt.md"),
            generation_path: dir.join("generation.json"),
            generation_log_path: dir.join("generation.log"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create workspace {}", self.dir.display()))
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Remove outputs of an earlier run so they cannot be scored again.
    pub fn clear_outputs(&self) -> Result<()> {
        for path in [&self.submission_path, &self.exec_log_path] {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed stale output"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    return Err(err).with_context(|| format!("remove {}", path.display()));
                }
            }
        }
        Ok(())
    }
}

/// Replace `path` with `contents` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("path missing parent {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = parent.join(tmp_name);
    fs::write(&tmp_path, contents).with_context(|| format!("write temp {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}
