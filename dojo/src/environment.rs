//! Episode state machine.
//!
//! An [`Environment`] owns one competition run: it executes submitted code
//! through a [`CodeRunner`], scores successful runs with a [`Scorer`],
//! resolves leaderboard ranks and keeps the step history in memory.
//! History reaches disk only at [`Environment::checkpoint`] and
//! [`Environment::teardown`].
//!
//! ```text
//! Initialized --reset--> Running --step--> Running
//! Running --step limit | time limit | target score--> Terminal
//! Initialized | Running --teardown--> Terminal (closed)
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::core::budget::{execution_timeout, remaining_budget};
use crate::core::history::HistorySummary;
use crate::core::score::is_better_score;
use crate::core::types::{BoardType, EpisodeStatus, ExecutionOutcome, StepRecord, TerminalReason};
use crate::io::config::DojoConfig;
use crate::io::history_log::HistoryLog;
use crate::io::leaderboard::LeaderboardResolver;
use crate::io::paths::{EpisodePaths, NodeWorkspace, write_atomic};
use crate::io::sandbox::{CodeRunner, RunReport, RunRequest};
use crate::io::scorer::{Metric, Scorer};

#[derive(Debug, Error)]
pub enum EnvError {
    /// The call is not allowed in the episode's current state.
    #[error("episode is {actual}, expected {expected}")]
    InvalidState {
        expected: EpisodeStatus,
        actual: EpisodeStatus,
    },
    /// The episode directory still holds a previous episode's output.
    #[error("{} already holds episode artifacts; enable overwrite to replace them", dir.display())]
    EpisodeExists { dir: PathBuf },
    #[error(transparent)]
    Persistence(#[from] anyhow::Error),
}

/// Fixed parameters of one episode.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    pub competition: String,
    /// Episode output directory (`<output_dir>/<competition>`).
    pub episode_dir: PathBuf,
    pub metric: Metric,
    pub execution_timeout: Duration,
    pub max_steps: u32,
    pub time_limit: Duration,
    pub target_score: Option<f64>,
    pub leaderboard_dir: Option<PathBuf>,
    pub rank_board: BoardType,
    /// Delete a previous episode's artifacts on reset instead of refusing.
    pub overwrite: bool,
}

impl EnvSettings {
    pub fn from_config(cfg: &DojoConfig) -> Self {
        Self {
            competition: cfg.competition.name.clone(),
            episode_dir: cfg.episode_dir(),
            metric: cfg.competition.metric,
            execution_timeout: Duration::from_secs(cfg.env.execution_timeout_secs),
            max_steps: cfg.env.max_steps,
            time_limit: Duration::from_secs(cfg.env.time_limit_secs),
            target_score: cfg.env.target_score,
            leaderboard_dir: cfg.competition.leaderboard_dir.clone(),
            rank_board: cfg.competition.rank_board,
            overwrite: cfg.env.overwrite,
        }
    }
}

/// What the caller sees after a step.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub record: StepRecord,
    pub summary: HistorySummary,
    pub status: EpisodeStatus,
    pub best_score: Option<f64>,
    pub terminal_reason: Option<TerminalReason>,
}

/// Contents of `episode.json`.
#[derive(Debug, Clone, Serialize)]
struct EpisodeMeta<'a> {
    competition: &'a str,
    metric: Metric,
    higher_is_better: bool,
    status: EpisodeStatus,
    terminal_reason: Option<TerminalReason>,
    steps: u32,
    best_score: Option<f64>,
    best_step: Option<u32>,
    best_rank: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    ended_at: DateTime<Utc>,
}

pub struct Environment<R: CodeRunner, S: Scorer> {
    paths: EpisodePaths,
    settings: EnvSettings,
    runner: R,
    scorer: S,
    resolver: LeaderboardResolver,
    higher_is_better: bool,
    status: EpisodeStatus,
    terminal_reason: Option<TerminalReason>,
    step_index: u32,
    best_score: Option<f64>,
    log: HistoryLog,
    summary: HistorySummary,
    started: Option<(Instant, DateTime<Utc>)>,
    torn_down: bool,
}

impl<R: CodeRunner, S: Scorer> Environment<R, S> {
    pub fn new(settings: EnvSettings, runner: R, scorer: S, resolver: LeaderboardResolver) -> Self {
        let higher_is_better = settings.metric.higher_is_better();
        if higher_is_better != scorer.higher_is_better() {
            warn!(
                metric = ?settings.metric,
                "scorer direction disagrees with metric, using metric"
            );
        }
        let paths = EpisodePaths::new(&settings.episode_dir);
        let log = HistoryLog::new(&paths.history_path);
        Self {
            paths,
            settings,
            runner,
            scorer,
            resolver,
            higher_is_better,
            status: EpisodeStatus::Initialized,
            terminal_reason: None,
            step_index: 0,
            best_score: None,
            log,
            summary: HistorySummary::new(higher_is_better),
            started: None,
            torn_down: false,
        }
    }

    /// Start the episode clock. Only valid once, from `Initialized`.
    #[instrument(skip_all, fields(competition = %self.settings.competition))]
    pub fn reset(&mut self) -> Result<(), EnvError> {
        self.require(EpisodeStatus::Initialized)?;
        if !self.paths.previous_artifacts().is_empty() {
            if !self.settings.overwrite {
                return Err(EnvError::EpisodeExists {
                    dir: self.paths.dir.clone(),
                });
            }
            self.paths.clear_previous()?;
        }
        let dir = &self.paths.dir;
        fs::create_dir_all(dir)
            .map_err(|err| anyhow::anyhow!("create episode dir {}: {err}", dir.display()))?;
        self.started = Some((Instant::now(), Utc::now()));
        self.status = EpisodeStatus::Running;
        info!(
            max_steps = self.settings.max_steps,
            time_limit_secs = self.settings.time_limit.as_secs(),
            higher_is_better = self.higher_is_better,
            "episode started"
        );
        Ok(())
    }

    /// Run `code` in `workspaces/<step_index>`.
    pub fn step(&mut self, code: &str) -> Result<Observation, EnvError> {
        let workspace = self.paths.workspace(self.step_index);
        self.step_in(code, &workspace)
    }

    /// Run `code` in the given workspace and record the result.
    ///
    /// Execution failures and scoring failures are recorded, not returned.
    /// The only error is calling this outside `Running`.
    #[instrument(skip_all, fields(step = self.step_index, workspace = %workspace.dir.display()))]
    pub fn step_in(&mut self, code: &str, workspace: &NodeWorkspace) -> Result<Observation, EnvError> {
        self.require(EpisodeStatus::Running)?;
        let (clock_start, _) = self.clock();
        let deadline = clock_start + self.settings.time_limit;
        let step_started = Instant::now();
        let timeout = execution_timeout(self.settings.execution_timeout, deadline, step_started);

        let report = self
            .runner
            .run(&RunRequest {
                code,
                workspace,
                timeout,
            })
            .unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "runner failed");
                RunReport {
                    outcome: ExecutionOutcome::RuntimeError,
                    trace: format!("[runner error: {err:#}]"),
                    duration: step_started.elapsed(),
                }
            });

        let (outcome, trace, score) = self.score_report(report, workspace);
        let leaderboard_rank = score.and_then(|score| self.resolve_rank(score));

        let record = StepRecord {
            step_index: self.step_index,
            submitted_code: code.to_string(),
            outcome,
            trace,
            score,
            leaderboard_rank,
            timestamp: Utc::now(),
            duration_ms: step_started.elapsed().as_millis() as u64,
        };
        if let Some(score) = score
            && is_better_score(score, self.best_score, self.higher_is_better)
        {
            info!(score, previous = ?self.best_score, "new best score");
            self.best_score = Some(score);
        }
        self.summary.record(&record);
        self.log.push(record.clone());
        self.step_index += 1;
        info!(
            outcome = %record.outcome,
            score = ?record.score,
            rank = ?record.leaderboard_rank,
            duration_ms = record.duration_ms,
            "step recorded"
        );

        if let Some(reason) = self.terminal_condition(Instant::now()) {
            self.status = EpisodeStatus::Terminal;
            self.terminal_reason = Some(reason);
            info!(?reason, steps = self.step_index, "episode terminal");
        }

        Ok(Observation {
            record,
            summary: self.summary.clone(),
            status: self.status,
            best_score: self.best_score,
            terminal_reason: self.terminal_reason,
        })
    }

    /// Append records not yet on disk to `history.jsonl`.
    pub fn checkpoint(&mut self) -> Result<usize, EnvError> {
        Ok(self.log.checkpoint()?)
    }

    /// Flush history and write `episode.json`. Later calls are no-ops.
    #[instrument(skip_all, fields(competition = %self.settings.competition))]
    pub fn teardown(&mut self) -> Result<(), EnvError> {
        if self.torn_down {
            debug!("teardown already done");
            return Ok(());
        }
        if self.status != EpisodeStatus::Terminal {
            self.status = EpisodeStatus::Terminal;
            self.terminal_reason = Some(TerminalReason::Closed);
        }
        if self.started.is_none() {
            // Never reset: the directory may still hold another episode.
            self.torn_down = true;
            debug!("episode never started, nothing to persist");
            return Ok(());
        }
        self.log.close()?;

        let meta = EpisodeMeta {
            competition: &self.settings.competition,
            metric: self.settings.metric,
            higher_is_better: self.higher_is_better,
            status: self.status,
            terminal_reason: self.terminal_reason,
            steps: self.step_index,
            best_score: self.best_score,
            best_step: self.summary.best_step,
            best_rank: self.summary.best_rank,
            started_at: self.started.map(|(_, at)| at),
            ended_at: Utc::now(),
        };
        let mut buf = serde_json::to_string_pretty(&meta).map_err(anyhow::Error::from)?;
        buf.push('\n');
        write_atomic(&self.paths.episode_meta_path, &buf)?;

        self.torn_down = true;
        info!(
            steps = self.step_index,
            best_score = ?self.best_score,
            reason = ?self.terminal_reason,
            "episode closed"
        );
        Ok(())
    }

    pub fn status(&self) -> EpisodeStatus {
        self.status
    }

    pub fn terminal_reason(&self) -> Option<TerminalReason> {
        self.terminal_reason
    }

    pub fn history(&self) -> &[StepRecord] {
        self.log.records()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best_score
    }

    /// Steps recorded so far; also the index the next step receives.
    pub fn step_index(&self) -> u32 {
        self.step_index
    }

    pub fn higher_is_better(&self) -> bool {
        self.higher_is_better
    }

    pub fn summary(&self) -> &HistorySummary {
        &self.summary
    }

    pub fn paths(&self) -> &EpisodePaths {
        &self.paths
    }

    pub fn settings(&self) -> &EnvSettings {
        &self.settings
    }

    pub fn resolver(&self) -> &LeaderboardResolver {
        &self.resolver
    }

    /// Time left before the episode's time limit, if it has started.
    pub fn remaining_time(&self) -> Option<Duration> {
        self.started.map(|(start, _)| {
            remaining_budget(start + self.settings.time_limit, Instant::now())
        })
    }

    fn require(&self, expected: EpisodeStatus) -> Result<(), EnvError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(EnvError::InvalidState {
                expected,
                actual: self.status,
            })
        }
    }

    fn clock(&self) -> (Instant, DateTime<Utc>) {
        // `require(Running)` guarantees the clock was started by `reset`.
        self.started.unwrap_or_else(|| (Instant::now(), Utc::now()))
    }

    /// Score a successful run. A scoring failure downgrades the outcome to
    /// `runtime_error` so that a score exists iff the outcome is success.
    fn score_report(
        &self,
        report: RunReport,
        workspace: &NodeWorkspace,
    ) -> (ExecutionOutcome, String, Option<f64>) {
        if !report.outcome.is_success() {
            return (report.outcome, report.trace, None);
        }
        let mut trace = report.trace;
        match self.scorer.score(workspace.path()) {
            Ok(score) if !score.is_nan() => (ExecutionOutcome::Success, trace, Some(score)),
            Ok(_) => {
                warn!("scorer returned NaN");
                trace.push_str("\n[scoring failed: score is NaN]\n");
                (ExecutionOutcome::RuntimeError, trace, None)
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "scoring failed");
                trace.push_str(&format!("\n[scoring failed: {err:#}]\n"));
                (ExecutionOutcome::RuntimeError, trace, None)
            }
        }
    }

    fn resolve_rank(&mut self, score: f64) -> Option<u32> {
        let dir = self.settings.leaderboard_dir.as_deref()?;
        match self
            .resolver
            .rank(score, dir, self.settings.rank_board, self.higher_is_better)
        {
            Ok(rank) => Some(rank),
            Err(err) => {
                debug!(err = %err, "leaderboard rank unavailable");
                None
            }
        }
    }

    fn terminal_condition(&self, now: Instant) -> Option<TerminalReason> {
        if self.step_index >= self.settings.max_steps {
            return Some(TerminalReason::StepLimit);
        }
        let (start, _) = self.clock();
        if now.saturating_duration_since(start) >= self.settings.time_limit {
            return Some(TerminalReason::TimeLimit);
        }
        let target_reached = match (self.settings.target_score, self.best_score) {
            (Some(target), Some(best)) => {
                if self.higher_is_better {
                    best >= target
                } else {
                    best <= target
                }
            }
            _ => false,
        };
        target_reached.then_some(TerminalReason::TargetReached)
    }
}

impl<R: CodeRunner, S: Scorer> Drop for Environment<R, S> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Err(err) = self.teardown() {
            error!(err = %err, "teardown on drop failed");
        }
    }
}
