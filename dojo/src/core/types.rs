//! Shared deterministic types for the episode engine.
//!
//! These types define stable contracts between the environment, the journal
//! and the search controller. They carry no I/O and serialize to the
//! on-disk history and journal formats.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result classification of one code execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    RuntimeError,
    Timeout,
}

impl ExecutionOutcome {
    pub fn is_success(self) -> bool {
        self == ExecutionOutcome::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::RuntimeError => "runtime_error",
            ExecutionOutcome::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ExecutionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of an episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    Initialized,
    Running,
    Terminal,
}

impl fmt::Display for EpisodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EpisodeStatus::Initialized => "initialized",
            EpisodeStatus::Running => "running",
            EpisodeStatus::Terminal => "terminal",
        };
        f.write_str(label)
    }
}

/// Why an episode entered `Terminal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    /// `step_index` reached the configured step limit.
    StepLimit,
    /// Elapsed wall-clock time exceeded the configured limit.
    TimeLimit,
    /// A score met the configured target (explicit success signal).
    TargetReached,
    /// The episode was torn down while still live.
    Closed,
}

/// Which leaderboard a rank is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BoardType {
    #[default]
    Public,
    Private,
}

impl BoardType {
    pub fn as_str(self) -> &'static str {
        match self {
            BoardType::Public => "public",
            BoardType::Private => "private",
        }
    }

    /// File name of this board inside a leaderboard directory.
    pub fn file_name(self) -> String {
        format!("{}_leaderboard.csv", self.as_str())
    }
}

/// One executed step of an episode. Immutable once appended to history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_index: u32,
    pub submitted_code: String,
    pub outcome: ExecutionOutcome,
    /// Captured stdout/stderr (bounded) plus any scoring failure.
    pub trace: String,
    /// Present iff `outcome` is `Success`.
    pub score: Option<f64>,
    pub leaderboard_rank: Option<u32>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}
