//! `dojo`: run competition episodes with a tree-search solution agent.
//!
//! Commands read a TOML config (`dojo.toml` by default). `run` drives one
//! episode to completion and prints one line per step to stdout; tracing
//! diagnostics go to stderr.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use dojo::core::types::BoardType;
use dojo::episode::run_episode;
use dojo::exit_codes;
use dojo::io::config::{DojoConfig, load_config, write_config};
use dojo::io::leaderboard::LeaderboardResolver;
use dojo::logging;
use dojo::search::{GenerationFailedError, SearchStep};

#[derive(Parser)]
#[command(
    name = "dojo",
    version,
    about = "Competition episode engine and tree-search solution agent"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one episode: search for solutions until the budget or the episode ends.
    Run {
        #[arg(short, long, default_value = "dojo.toml")]
        config: PathBuf,
        /// Override `agent.steps`.
        #[arg(long)]
        steps: Option<u32>,
        /// Replace output left by a previous episode of this competition.
        #[arg(short, long)]
        force: bool,
    },
    /// Validate the config and check that its data paths exist.
    Check {
        #[arg(short, long, default_value = "dojo.toml")]
        config: PathBuf,
    },
    /// Print the leaderboard rank a score would take.
    Rank {
        #[arg(long)]
        leaderboard_dir: PathBuf,
        #[arg(long, allow_negative_numbers = true)]
        score: f64,
        #[arg(long, value_enum, default_value_t = Board::Public)]
        board: Board,
        /// Treat lower scores as better (error metrics).
        #[arg(long)]
        lower_is_better: bool,
    },
    /// Write a default config file.
    Init {
        #[arg(short, long, default_value = "dojo.toml")]
        config: PathBuf,
        /// Competition name to put in the config.
        #[arg(long)]
        competition: Option<String>,
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Board {
    Public,
    Private,
}

impl From<Board> for BoardType {
    fn from(board: Board) -> Self {
        match board {
            Board::Public => BoardType::Public,
            Board::Private => BoardType::Private,
        }
    }
}

fn main() {
    logging::init();
    let cli = Cli::parse();
    let code = match dispatch(cli.command) {
        Ok(()) => exit_codes::OK,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<GenerationFailedError>().is_some() {
        exit_codes::ABORTED
    } else {
        exit_codes::INVALID
    }
}

fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Run {
            config,
            steps,
            force,
        } => cmd_run(&config, steps, force),
        Command::Check { config } => cmd_check(&config),
        Command::Rank {
            leaderboard_dir,
            score,
            board,
            lower_is_better,
        } => cmd_rank(&leaderboard_dir, score, board.into(), !lower_is_better),
        Command::Init {
            config,
            competition,
            force,
        } => cmd_init(&config, competition, force),
    }
}

fn cmd_run(config: &Path, steps: Option<u32>, force: bool) -> Result<()> {
    let mut cfg = load_config(config)?;
    cfg.env.overwrite |= force;
    if let Some(steps) = steps {
        if steps == 0 {
            bail!("--steps must be > 0");
        }
        cfg.agent.steps = steps;
    }
    let report = run_episode(&cfg, print_step)?;
    println!(
        "episode {} finished after {} step(s): best={} reason={}",
        report.competition,
        report.steps,
        format_score(report.best_score),
        report
            .terminal_reason
            .map(|reason| format!("{reason:?}"))
            .unwrap_or_else(|| "none".to_string()),
    );
    println!("artifacts: {}", report.episode_dir.display());
    Ok(())
}

fn print_step(step: &SearchStep) {
    let target = step
        .action
        .target()
        .map(|id| format!("({id})"))
        .unwrap_or_default();
    let rank = step
        .rank
        .map(|rank| format!(" rank={rank}"))
        .unwrap_or_default();
    println!(
        "node {} {}{} {} score={}{}",
        step.node_id,
        step.action.label(),
        target,
        step.outcome,
        format_score(step.metric),
        rank
    );
}

fn format_score(score: Option<f64>) -> String {
    score.map_or_else(|| "-".to_string(), |score| format!("{score:.6}"))
}

fn cmd_check(config: &Path) -> Result<()> {
    let cfg = load_config(config)?;
    cfg.check_paths()?;
    println!("ok: {} ({})", cfg.competition.name, config.display());
    Ok(())
}

fn cmd_rank(dir: &Path, score: f64, board: BoardType, higher_is_better: bool) -> Result<()> {
    if !score.is_finite() {
        bail!("score must be finite");
    }
    let mut resolver = LeaderboardResolver::new();
    let rank = resolver
        .rank(score, dir, board, higher_is_better)
        .with_context(|| format!("resolve {} rank", board.as_str()))?;
    println!("{rank}");
    Ok(())
}

fn cmd_init(config: &Path, competition: Option<String>, force: bool) -> Result<()> {
    if config.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            config.display()
        );
    }
    let mut cfg = DojoConfig::default();
    if let Some(name) = competition {
        cfg.competition.name = name;
    }
    write_config(config, &cfg)?;
    println!("wrote {}", config.display());
    Ok(())
}
