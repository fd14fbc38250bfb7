//! Execution collaborator: runs submitted code in a node workspace.
//!
//! The [`CodeRunner`] trait decouples the environment from the actual
//! interpreter. Tests use scripted runners that return canned outcomes
//! without spawning processes.

use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::ExecutionOutcome;
use crate::io::paths::NodeWorkspace;
use crate::io::process::run_with_timeout;

/// Env var pointing submitted code at the competition's public data.
pub const DATA_DIR_ENV: &str = "DOJO_DATA_DIR";
/// Env var pointing submitted code at its own workspace.
pub const WORKSPACE_ENV: &str = "DOJO_WORKSPACE";

/// Parameters for one code execution.
#[derive(Debug, Clone)]
pub struct RunRequest<'a> {
    pub code: &'a str,
    pub workspace: &'a NodeWorkspace,
    pub timeout: Duration,
}

/// What happened when the code ran.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: ExecutionOutcome,
    /// Captured output, used as the debug trace for failed attempts.
    pub trace: String,
    pub duration: Duration,
}

/// Abstraction over code execution backends.
pub trait CodeRunner {
    /// Run `request.code` inside `request.workspace`.
    ///
    /// Errors mean the runner itself failed (e.g. could not spawn); the
    /// environment records them as `runtime_error`.
    fn run(&self, request: &RunRequest<'_>) -> Result<RunReport>;
}

/// Runs code as `python solution.py` with the workspace as working directory.
#[derive(Debug, Clone)]
pub struct PythonRunner {
    pub python: String,
    pub data_dir: PathBuf,
    pub output_limit_bytes: usize,
}

impl CodeRunner for PythonRunner {
    #[instrument(skip_all, fields(workspace = %request.workspace.dir.display(), timeout_secs = request.timeout.as_secs()))]
    fn run(&self, request: &RunRequest<'_>) -> Result<RunReport> {
        let workspace = request.workspace;
        workspace.create()?;
        workspace.clear_outputs()?;
        fs::write(&workspace.solution_path, request.code)
            .with_context(|| format!("write {}", workspace.solution_path.display()))?;

        let data_dir = absolute(&self.data_dir);
        let mut cmd = Command::new(&self.python);
        cmd.arg(&workspace.solution_path)
            .current_dir(&workspace.dir)
            .env(DATA_DIR_ENV, &data_dir)
            .env(WORKSPACE_ENV, absolute(&workspace.dir));

        info!("executing solution");
        let output = run_with_timeout(cmd, None, request.timeout, self.output_limit_bytes)
            .with_context(|| format!("run {}", self.python))?;
        let trace = output.render_log("solution");
        fs::write(&workspace.exec_log_path, &trace)
            .with_context(|| format!("write {}", workspace.exec_log_path.display()))?;

        let outcome = if output.timed_out {
            warn!(elapsed_ms = output.elapsed.as_millis() as u64, "solution timed out");
            ExecutionOutcome::Timeout
        } else if output.status.success() {
            ExecutionOutcome::Success
        } else {
            debug!(exit_code = ?output.status.code(), "solution failed");
            ExecutionOutcome::RuntimeError
        };

        Ok(RunReport {
            outcome,
            trace,
            duration: output.elapsed,
        })
    }
}

fn absolute(path: &std::path::Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Uses `sh` as the interpreter so the test needs no Python install.
    fn runner(data_dir: PathBuf) -> PythonRunner {
        PythonRunner {
            python: "sh".to_string(),
            data_dir,
            output_limit_bytes: 10_000,
        }
    }

    #[test]
    fn success_writes_solution_and_log() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = NodeWorkspace::new(temp.path().join("ws/0"));
        let report = runner(temp.path().to_path_buf())
            .run(&RunRequest {
                code: "echo \"data=$DOJO_DATA_DIR\"",
                workspace: &ws,
                timeout: Duration::from_secs(5),
            })
            .expect("run");

        assert_eq!(report.outcome, ExecutionOutcome::Success);
        assert!(report.trace.contains("data=/"));
        assert!(ws.solution_path.is_file());
        assert!(ws.exec_log_path.is_file());
    }

    #[test]
    fn nonzero_exit_is_runtime_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = NodeWorkspace::new(temp.path().join("ws/1"));
        let report = runner(temp.path().to_path_buf())
            .run(&RunRequest {
                code: "echo boom >&2; exit 1",
                workspace: &ws,
                timeout: Duration::from_secs(5),
            })
            .expect("run");

        assert_eq!(report.outcome, ExecutionOutcome::RuntimeError);
        assert!(report.trace.contains("boom"));
    }

    #[test]
    fn slow_code_times_out() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = NodeWorkspace::new(temp.path().join("ws/2"));
        let report = runner(temp.path().to_path_buf())
            .run(&RunRequest {
                code: "exec sleep 5",
                workspace: &ws,
                timeout: Duration::from_millis(100),
            })
            .expect("run");

        assert_eq!(report.outcome, ExecutionOutcome::Timeout);
    }

    #[test]
    fn stale_submission_is_removed_before_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = NodeWorkspace::new(temp.path().join("ws/3"));
        ws.create().expect("create");
        fs::write(&ws.submission_path, "id,label\n3,0\n").expect("old submission");

        let report = runner(temp.path().to_path_buf())
            .run(&RunRequest {
                code: "echo 'writes nothing'",
                workspace: &ws,
                timeout: Duration::from_secs(5),
            })
            .expect("run");

        assert_eq!(report.outcome, ExecutionOutcome::Success);
        assert!(!ws.submission_path.exists());
    }

    #[test]
    fn timeout_is_enforced_with_background_workers() {
        let temp = tempfile::tempdir().expect("tempdir");
        let ws = NodeWorkspace::new(temp.path().join("ws/4"));
        let started = std::time::Instant::now();
        let report = runner(temp.path().to_path_buf())
            .run(&RunRequest {
                code: "sleep 4 & sleep 30",
                workspace: &ws,
                timeout: Duration::from_millis(200),
            })
            .expect("run");

        assert_eq!(report.outcome, ExecutionOutcome::Timeout);
        assert!(started.elapsed() < Duration::from_secs(3));
    }
}
