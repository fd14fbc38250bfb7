//! Wiring for `dojo run`: builds the collaborators from config, runs the
//! search against a fresh environment and tears the episode down.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, instrument};

use crate::core::policy::AgentKind;
use crate::core::types::TerminalReason;
use crate::environment::{EnvSettings, Environment};
use crate::io::config::DojoConfig;
use crate::io::generator::{BaselineGenerator, CodeGenerator, CommandGenerator, write_generation_schema};
use crate::io::leaderboard::LeaderboardResolver;
use crate::io::paths::EpisodePaths;
use crate::io::sandbox::{CodeRunner, PythonRunner};
use crate::io::scorer::{Scorer, SubmissionScorer};
use crate::io::task::TaskContext;
use crate::search::{SearchController, SearchOutcome, SearchSettings, SearchStep};

/// Result of a completed episode.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeReport {
    pub competition: String,
    pub episode_dir: PathBuf,
    pub search: SearchOutcome,
    pub steps: u32,
    pub best_score: Option<f64>,
    pub terminal_reason: Option<TerminalReason>,
}

/// Run one episode as configured by `cfg`.
#[instrument(skip_all, fields(competition = %cfg.competition.name, agent = ?cfg.agent_type))]
pub fn run_episode<F: FnMut(&SearchStep)>(cfg: &DojoConfig, on_step: F) -> Result<EpisodeReport> {
    cfg.validate()?;
    cfg.check_paths()?;
    let data_dir = &cfg.competition.data_dir;
    let task = TaskContext::load(&cfg.competition.name, data_dir)?;
    let scorer = SubmissionScorer::new(
        cfg.competition.metric,
        &cfg.answer_path(),
        cfg.competition.id_column.clone(),
        cfg.competition.target_column.clone(),
    )?;
    let runner = PythonRunner {
        python: cfg.env.python.clone(),
        data_dir: data_dir.join("public"),
        output_limit_bytes: cfg.env.output_limit_bytes,
    };
    let env = Environment::new(
        EnvSettings::from_config(cfg),
        runner,
        scorer,
        LeaderboardResolver::new(),
    );
    let settings = SearchSettings::from_config(cfg);

    match cfg.agent_type {
        AgentKind::Baseline => run_with(env, BaselineGenerator, task, settings, on_step),
        AgentKind::TreeSearch | AgentKind::Sequential | AgentKind::DirectApi => {
            let schema_path = EpisodePaths::new(cfg.episode_dir()).generation_schema_path;
            write_generation_schema(&schema_path)?;
            let generator = CommandGenerator::new(
                cfg.agent.code.command.clone(),
                cfg.agent.code.model_name.clone(),
                schema_path,
                Duration::from_secs(cfg.agent.code.timeout_secs),
                cfg.env.output_limit_bytes,
            )?;
            run_with(env, generator, task, settings, on_step)
        }
    }
}

/// Drive `env` with a controller over `generator`, then tear the episode
/// down. Teardown happens even when the search aborts.
pub fn run_with<R, S, G, F>(
    mut env: Environment<R, S>,
    generator: G,
    task: TaskContext,
    settings: SearchSettings,
    on_step: F,
) -> Result<EpisodeReport>
where
    R: CodeRunner,
    S: Scorer,
    G: CodeGenerator,
    F: FnMut(&SearchStep),
{
    env.reset().context("reset episode")?;
    let mut controller = SearchController::new(generator, task, settings);
    let searched = controller.run(&mut env, on_step);
    let torn_down = env.teardown();

    let search = match searched {
        Ok(search) => search,
        Err(err) => {
            if let Err(teardown_err) = torn_down {
                error!(err = %teardown_err, "teardown after abort failed");
            }
            return Err(err);
        }
    };
    torn_down.context("tear down episode")?;

    let report = EpisodeReport {
        competition: env.settings().competition.clone(),
        episode_dir: env.paths().dir.clone(),
        search,
        steps: env.step_index(),
        best_score: env.best_score(),
        terminal_reason: env.terminal_reason(),
    };
    info!(
        steps = report.steps,
        best_score = ?report.best_score,
        reason = ?report.terminal_reason,
        "episode complete"
    );
    Ok(report)
}
