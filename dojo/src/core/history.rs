//! Constant-size summary of an episode's step history.

use std::collections::VecDeque;

use serde::Serialize;

use crate::core::score::is_better_score;
use crate::core::types::{ExecutionOutcome, StepRecord};

/// Number of most recent steps kept in the summary window.
pub const RECENT_WINDOW: usize = 5;

/// Compact view of one recent step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentStep {
    pub step_index: u32,
    pub outcome: ExecutionOutcome,
    pub score: Option<f64>,
    pub leaderboard_rank: Option<u32>,
}

/// Running totals plus a fixed window of recent steps.
///
/// Updated incrementally per step; its size does not grow with the episode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistorySummary {
    pub total_steps: u32,
    pub successes: u32,
    pub runtime_errors: u32,
    pub timeouts: u32,
    pub best_score: Option<f64>,
    pub best_step: Option<u32>,
    pub best_rank: Option<u32>,
    pub recent: VecDeque<RecentStep>,
    #[serde(skip)]
    higher_is_better: bool,
}

impl HistorySummary {
    pub fn new(higher_is_better: bool) -> Self {
        Self {
            total_steps: 0,
            successes: 0,
            runtime_errors: 0,
            timeouts: 0,
            best_score: None,
            best_step: None,
            best_rank: None,
            recent: VecDeque::with_capacity(RECENT_WINDOW),
            higher_is_better,
        }
    }

    pub fn record(&mut self, record: &StepRecord) {
        self.total_steps += 1;
        match record.outcome {
            ExecutionOutcome::Success => self.successes += 1,
            ExecutionOutcome::RuntimeError => self.runtime_errors += 1,
            ExecutionOutcome::Timeout => self.timeouts += 1,
        }
        if let Some(score) = record.score
            && is_better_score(score, self.best_score, self.higher_is_better)
        {
            self.best_score = Some(score);
            self.best_step = Some(record.step_index);
            self.best_rank = record.leaderboard_rank;
        }
        if self.recent.len() == RECENT_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(RecentStep {
            step_index: record.step_index,
            outcome: record.outcome,
            score: record.score,
            leaderboard_rank: record.leaderboard_rank,
        });
    }

    /// Render as short plain text for prompts and logs.
    pub fn render(&self) -> String {
        let mut out = format!(
            "steps={} success={} error={} timeout={}",
            self.total_steps, self.successes, self.runtime_errors, self.timeouts
        );
        if let Some(best) = self.best_score {
            out.push_str(&format!(" best={best:.6}"));
            if let Some(rank) = self.best_rank {
                out.push_str(&format!(" best_rank={rank}"));
            }
        }
        for step in &self.recent {
            out.push_str(&format!("\n- step {}: {}", step.step_index, step.outcome));
            if let Some(score) = step.score {
                out.push_str(&format!(" score={score:.6}"));
            }
        }
        out
    }
}
