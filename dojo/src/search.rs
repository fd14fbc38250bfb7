//! Search controller: grows the solution journal one attempt per step.
//!
//! Each iteration asks the policy for an [`Action`], renders a prompt,
//! generates code (with bounded retries on collaborator errors), runs it
//! through the [`Environment`] and appends the result to the [`Journal`].

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::journal::{Journal, NodeId, NodeStage, PendingNode};
use crate::core::policy::{Action, AgentKind, SearchConfig, next_action};
use crate::core::types::{EpisodeStatus, ExecutionOutcome, TerminalReason};
use crate::environment::Environment;
use crate::io::config::DojoConfig;
use crate::io::generator::{CodeGenerator, Generation, GenerationRequest};
use crate::io::journal_store::{export_best_solution, save_journal};
use crate::io::paths::NodeWorkspace;
use crate::io::prompt::{PromptBuilder, PromptInputs, journal_memory};
use crate::io::sandbox::CodeRunner;
use crate::io::scorer::{Metric, Scorer};
use crate::io::task::TaskContext;

/// Every generation attempt for one step failed; the episode is aborted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{action} generation failed after {attempts} attempt(s): {last_error}")]
pub struct GenerationFailedError {
    pub action: &'static str,
    pub attempts: u32,
    pub last_error: String,
}

/// Why [`SearchController::run`] stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStop {
    /// The configured step budget was used up.
    BudgetExhausted,
    /// The environment reached a terminal state first.
    EpisodeTerminal(TerminalReason),
}

/// Reported to the `on_step` callback after each attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchStep {
    pub node_id: NodeId,
    pub action: Action,
    pub outcome: ExecutionOutcome,
    pub metric: Option<f64>,
    pub rank: Option<u32>,
}

/// Summary of a search run.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub steps_executed: u32,
    pub stop: SearchStop,
    pub best_node: Option<NodeId>,
    pub best_metric: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub kind: AgentKind,
    /// Step budget of this search.
    pub steps: u32,
    pub search: SearchConfig,
    /// Generation attempts per step.
    pub max_retries: u32,
    pub metric: Metric,
    /// Execution timeout quoted to the generator.
    pub timeout_secs: u64,
    pub prompt_budget_bytes: usize,
}

impl SearchSettings {
    pub fn from_config(cfg: &DojoConfig) -> Self {
        Self {
            kind: cfg.agent_type,
            steps: cfg.agent.steps,
            search: cfg.agent.search,
            max_retries: cfg.agent.code.max_retries,
            metric: cfg.competition.metric,
            timeout_secs: cfg.env.execution_timeout_secs,
            prompt_budget_bytes: cfg.agent.code.prompt_budget_bytes,
        }
    }
}

pub struct SearchController<G: CodeGenerator> {
    generator: G,
    prompts: PromptBuilder,
    task: TaskContext,
    settings: SearchSettings,
    journal: Journal,
}

impl<G: CodeGenerator> SearchController<G> {
    pub fn new(generator: G, task: TaskContext, settings: SearchSettings) -> Self {
        Self {
            prompts: PromptBuilder::new(settings.prompt_budget_bytes),
            generator,
            task,
            settings,
            journal: Journal::new(),
        }
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    /// Run until the step budget is spent or the episode becomes terminal.
    ///
    /// The journal, best solution and history are checkpointed after every
    /// step, before `on_step` sees it, and saved again on every exit path,
    /// including an aborted generation.
    #[instrument(skip_all, fields(agent = ?self.settings.kind, steps = self.settings.steps))]
    pub fn run<R, S, F>(&mut self, env: &mut Environment<R, S>, mut on_step: F) -> Result<SearchOutcome>
    where
        R: CodeRunner,
        S: Scorer,
        F: FnMut(&SearchStep),
    {
        let mut steps_executed = 0u32;
        let result = loop {
            if env.status() == EpisodeStatus::Terminal {
                let reason = env.terminal_reason().unwrap_or(TerminalReason::Closed);
                break Ok(SearchStop::EpisodeTerminal(reason));
            }
            if steps_executed >= self.settings.steps {
                break Ok(SearchStop::BudgetExhausted);
            }
            let steps_left = self.settings.steps - steps_executed;
            let step = match self.step_once(env, steps_left) {
                Ok(step) => step,
                Err(err) => break Err(err),
            };
            steps_executed += 1;
            if let Err(err) = self.checkpoint(env) {
                break Err(err);
            }
            on_step(&step);
        };

        let persisted = self.persist(env);
        let stop = match result {
            Ok(stop) => stop,
            Err(err) => {
                if let Err(persist_err) = persisted {
                    warn!(err = %format!("{persist_err:#}"), "failed to save journal after abort");
                }
                return Err(err);
            }
        };
        persisted?;

        let best = self.journal.best_node(env.higher_is_better());
        info!(steps_executed, ?stop, best = ?best.map(|n| n.id.0), "search finished");
        Ok(SearchOutcome {
            steps_executed,
            stop,
            best_node: best.map(|n| n.id),
            best_metric: best.and_then(|n| n.metric),
        })
    }

    fn step_once<R: CodeRunner, S: Scorer>(
        &mut self,
        env: &mut Environment<R, S>,
        steps_left: u32,
    ) -> Result<SearchStep> {
        let higher_is_better = env.higher_is_better();
        let action = next_action(
            self.settings.kind,
            &self.journal,
            &self.settings.search,
            higher_is_better,
        );
        let node_id = self.journal.next_id();
        let workspace = env.paths().workspace(node_id.0);
        info!(node = %node_id, action = action.label(), target = ?action.target().map(|t| t.0), "next action");

        // Drafts start from scratch.
        let memory = match action {
            Action::Improve { .. } => format!(
                "{}\nEpisode so far: {}",
                journal_memory(&self.journal),
                env.summary().render()
            ),
            Action::Draft | Action::Debug { .. } => String::new(),
        };
        let env_steps_left = env.settings().max_steps.saturating_sub(env.step_index());
        let prompt = self.prompts.build(&PromptInputs {
            task: &self.task,
            action,
            target: action.target().and_then(|id| self.journal.get(id)),
            memory,
            metric: self.settings.metric.as_str(),
            higher_is_better,
            timeout_secs: self.settings.timeout_secs,
            steps_left: steps_left.min(env_steps_left),
            time_left_secs: env.remaining_time().map(|left| left.as_secs()),
        })?;
        if !prompt.dropped().is_empty() {
            info!(dropped = ?prompt.dropped(), "prompt sections dropped for budget");
        }

        let generation = self.generate_with_retries(action, prompt.as_str(), &workspace)?;
        let observation = env.step_in(&generation.code, &workspace)?;
        let record = observation.record;

        let stage = match action {
            Action::Draft => NodeStage::Draft,
            Action::Debug { .. } => NodeStage::Debug,
            Action::Improve { .. } => NodeStage::Improve,
        };
        let appended = self.journal.append(PendingNode {
            parent_id: action.target(),
            stage,
            plan: generation.plan,
            code: generation.code,
            outcome: record.outcome,
            trace: record.trace,
            metric: record.score,
            step_index: Some(record.step_index),
        })?;
        Ok(SearchStep {
            node_id: appended,
            action,
            outcome: record.outcome,
            metric: record.score,
            rank: record.leaderboard_rank,
        })
    }

    /// Immediate retries, no backoff.
    fn generate_with_retries(
        &self,
        action: Action,
        prompt: &str,
        workspace: &NodeWorkspace,
    ) -> Result<Generation, GenerationFailedError> {
        let attempts = self.settings.max_retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            let request = GenerationRequest {
                action,
                prompt,
                workspace,
            };
            match self.generator.generate(&request) {
                Ok(generation) => return Ok(generation),
                Err(err) => {
                    last_error = format!("{err:#}");
                    warn!(attempt, attempts, err = %last_error, "generation failed");
                }
            }
        }
        Err(GenerationFailedError {
            action: action.label(),
            attempts,
            last_error,
        })
    }

    fn checkpoint<R: CodeRunner, S: Scorer>(&self, env: &mut Environment<R, S>) -> Result<()> {
        self.persist(env)?;
        let flushed = env.checkpoint()?;
        debug!(flushed, nodes = self.journal.len(), "checkpointed step");
        Ok(())
    }

    fn persist<R: CodeRunner, S: Scorer>(&self, env: &Environment<R, S>) -> Result<()> {
        let paths = env.paths();
        save_journal(&paths.journal_path, &self.journal)?;
        export_best_solution(&paths.best_solution_path, &self.journal, env.higher_is_better())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::BoardType;
    use crate::environment::EnvSettings;
    use crate::io::journal_store::load_journal;
    use crate::io::leaderboard::LeaderboardResolver;
    use crate::test_support::{ScriptedGenerator, ScriptedRunner, ScriptedScorer, generation};
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    fn task() -> TaskContext {
        TaskContext {
            competition: "titanic".to_string(),
            description: "Predict survival.".to_string(),
            public_dir: PathBuf::from("data/public"),
            data_overview: "- `train.csv`".to_string(),
        }
    }

    fn settings(kind: AgentKind, steps: u32) -> SearchSettings {
        SearchSettings {
            kind,
            steps,
            search: SearchConfig {
                num_drafts: 2,
                max_debug_depth: 1,
            },
            max_retries: 3,
            metric: Metric::Accuracy,
            timeout_secs: 60,
            prompt_budget_bytes: 20_000,
        }
    }

    fn environment(
        dir: &Path,
        max_steps: u32,
        runner: ScriptedRunner,
        scorer: ScriptedScorer,
    ) -> Environment<ScriptedRunner, ScriptedScorer> {
        let mut env = Environment::new(
            EnvSettings {
                competition: "titanic".to_string(),
                episode_dir: dir.join("titanic"),
                metric: Metric::Accuracy,
                execution_timeout: Duration::from_secs(60),
                max_steps,
                time_limit: Duration::from_secs(3600),
                target_score: None,
                leaderboard_dir: None,
                rank_board: BoardType::Public,
                overwrite: false,
            },
            runner,
            scorer,
            LeaderboardResolver::new(),
        );
        env.reset().expect("reset");
        env
    }

    #[test]
    fn retries_then_succeeds() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = environment(
            temp.path(),
            10,
            ScriptedRunner::always(ExecutionOutcome::Success),
            ScriptedScorer::constant(0.5),
        );
        let generator = ScriptedGenerator::new([
            Err("rate limited".to_string()),
            Err("rate limited".to_string()),
            Ok(generation("p", "print(1)")),
        ]);
        let mut controller =
            SearchController::new(generator, task(), settings(AgentKind::TreeSearch, 1));

        let outcome = controller.run(&mut env, |_| {}).expect("run");
        assert_eq!(outcome.steps_executed, 1);
        assert_eq!(outcome.stop, SearchStop::BudgetExhausted);
        assert_eq!(controller.generator().requests().len(), 3);
        assert_eq!(controller.journal().len(), 1);
    }

    #[test]
    fn exhausted_retries_abort_and_still_save_journal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = environment(
            temp.path(),
            10,
            ScriptedRunner::always(ExecutionOutcome::Success),
            ScriptedScorer::constant(0.5),
        );
        let generator = ScriptedGenerator::new([
            Ok(generation("p", "print(1)")),
            Err("unauthorized".to_string()),
            Err("unauthorized".to_string()),
            Err("unauthorized".to_string()),
        ]);
        let mut controller =
            SearchController::new(generator, task(), settings(AgentKind::TreeSearch, 5));

        let err = controller.run(&mut env, |_| {}).unwrap_err();
        let failed = err
            .downcast_ref::<GenerationFailedError>()
            .expect("generation failure");
        assert_eq!(failed.attempts, 3);
        assert!(failed.last_error.contains("unauthorized"));
        assert!(env.paths().journal_path.is_file());
        assert!(env.paths().best_solution_path.is_file());
        assert_eq!(env.history().len(), 1);
    }

    #[test]
    fn stops_when_episode_turns_terminal() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = environment(
            temp.path(),
            2,
            ScriptedRunner::always(ExecutionOutcome::RuntimeError),
            ScriptedScorer::constant(0.5),
        );
        let mut controller = SearchController::new(
            ScriptedGenerator::default(),
            task(),
            settings(AgentKind::TreeSearch, 10),
        );
        let mut seen = Vec::new();
        let outcome = controller
            .run(&mut env, |step| seen.push(step.node_id))
            .expect("run");

        assert_eq!(outcome.stop, SearchStop::EpisodeTerminal(TerminalReason::StepLimit));
        assert_eq!(outcome.steps_executed, 2);
        assert_eq!(seen, vec![NodeId(0), NodeId(1)]);
        assert_eq!(outcome.best_node, None);
        assert!(!env.paths().best_solution_path.exists());
    }

    #[test]
    fn nodes_link_to_steps_and_workspaces() {
        let temp = tempfile::tempdir().expect("tempdir");
        let runner = ScriptedRunner::sequence([
            ExecutionOutcome::Success,
            ExecutionOutcome::RuntimeError,
            ExecutionOutcome::Success,
        ]);
        let mut env = environment(temp.path(), 10, runner, ScriptedScorer::constant(0.5));
        let mut controller = SearchController::new(
            ScriptedGenerator::default(),
            task(),
            settings(AgentKind::TreeSearch, 3),
        );
        controller.run(&mut env, |_| {}).expect("run");

        for node in controller.journal().nodes() {
            assert_eq!(node.step_index, Some(node.id.0));
            let record = &env.history()[node.id.0 as usize];
            assert_eq!(record.submitted_code, node.code);
            assert_eq!(record.score, node.metric);
        }
        let workspace = env.paths().workspace(2);
        assert!(workspace.solution_path.is_file());
    }

    #[test]
    fn only_improve_prompts_carry_memory() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = environment(
            temp.path(),
            10,
            ScriptedRunner::always(ExecutionOutcome::Success),
            ScriptedScorer::constant(0.5),
        );
        let mut controller = SearchController::new(
            ScriptedGenerator::default(),
            task(),
            settings(AgentKind::TreeSearch, 3),
        );
        controller.run(&mut env, |_| {}).expect("run");

        let requests = controller.generator().requests();
        let actions: Vec<Action> = requests.iter().map(|(action, _)| *action).collect();
        assert_eq!(
            actions,
            vec![Action::Draft, Action::Draft, Action::Improve { target: NodeId(0) }]
        );
        assert!(!requests[1].1.contains("### Previous Attempts"));
        assert!(!requests[1].1.contains("Episode so far"));
        assert!(requests[2].1.contains("### Previous Attempts"));
        assert!(requests[2].1.contains("attempt 1 (draft)"));
    }

    #[test]
    fn prompts_count_down_remaining_steps() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = environment(
            temp.path(),
            2,
            ScriptedRunner::always(ExecutionOutcome::RuntimeError),
            ScriptedScorer::constant(0.5),
        );
        let mut controller = SearchController::new(
            ScriptedGenerator::default(),
            task(),
            settings(AgentKind::DirectApi, 5),
        );
        controller.run(&mut env, |_| {}).expect("run");

        let requests = controller.generator().requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].1.contains("Budget left for the whole run: 2 attempt(s), about"));
        assert!(requests[1].1.contains("Budget left for the whole run: 1 attempt(s), about"));
    }

    #[test]
    fn journal_and_history_are_saved_after_every_step() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = environment(
            temp.path(),
            10,
            ScriptedRunner::always(ExecutionOutcome::Success),
            ScriptedScorer::constant(0.5),
        );
        let journal_path = env.paths().journal_path.clone();
        let history_path = env.paths().history_path.clone();
        let mut controller = SearchController::new(
            ScriptedGenerator::default(),
            task(),
            settings(AgentKind::TreeSearch, 3),
        );
        let mut seen = Vec::new();
        controller
            .run(&mut env, |_| {
                let saved = load_journal(&journal_path).expect("load journal");
                let history = std::fs::read_to_string(&history_path).expect("read history");
                seen.push((saved.len(), history.lines().count()));
            })
            .expect("run");

        assert_eq!(seen, vec![(1, 1), (2, 2), (3, 3)]);
    }

    #[test]
    fn direct_api_only_drafts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut env = environment(
            temp.path(),
            10,
            ScriptedRunner::always(ExecutionOutcome::RuntimeError),
            ScriptedScorer::constant(0.5),
        );
        let mut controller = SearchController::new(
            ScriptedGenerator::default(),
            task(),
            settings(AgentKind::DirectApi, 4),
        );
        let mut actions = Vec::new();
        controller
            .run(&mut env, |step| actions.push(step.action))
            .expect("run");
        assert_eq!(actions, vec![Action::Draft; 4]);
        assert!(controller.journal().nodes().iter().all(|n| n.parent_id.is_none()));
    }
}
