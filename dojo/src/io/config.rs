//! Episode configuration stored in `dojo.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::policy::{AgentKind, SearchConfig};
use crate::core::types::BoardType;
use crate::io::paths::write_atomic;
use crate::io::scorer::Metric;

/// Overrides `competition.name` when set.
pub const COMPETITION_NAME_ENV: &str = "COMPETITION_NAME";

/// Top-level configuration (TOML).
///
/// Missing fields fall back to defaults; unknown enum values fail at parse
/// time, before any episode starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DojoConfig {
    pub agent_type: AgentKind,
    /// Base directory; each episode writes to `<output_dir>/<competition>`.
    pub output_dir: PathBuf,
    pub competition: CompetitionConfig,
    pub env: EnvConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompetitionConfig {
    pub name: String,
    /// Competition root containing `public/` and `private/`.
    pub data_dir: PathBuf,
    pub metric: Metric,
    pub id_column: String,
    pub target_column: String,
    /// Ground-truth file, relative to `data_dir`.
    pub answer_file: PathBuf,
    /// Directory holding `public_leaderboard.csv` / `private_leaderboard.csv`.
    pub leaderboard_dir: Option<PathBuf>,
    pub rank_board: BoardType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EnvConfig {
    /// Wall-clock limit for one code execution.
    pub execution_timeout_secs: u64,
    /// Steps after which the episode becomes terminal.
    pub max_steps: u32,
    /// Wall-clock limit for the whole episode.
    pub time_limit_secs: u64,
    /// Score that ends the episode early once reached.
    pub target_score: Option<f64>,
    /// Interpreter used to run submitted code.
    pub python: String,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
    /// Replace a previous episode's output instead of refusing to start.
    pub overwrite: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentConfig {
    /// Total step budget for the search controller.
    pub steps: u32,
    pub code: CodeConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CodeConfig {
    pub model_name: String,
    /// Agent CLI invoked for generation; prompt goes to stdin.
    pub command: Vec<String>,
    pub timeout_secs: u64,
    /// Generation attempts per step before the episode is aborted.
    pub max_retries: u32,
    pub prompt_budget_bytes: usize,
}

impl Default for DojoConfig {
    fn default() -> Self {
        Self {
            agent_type: AgentKind::TreeSearch,
            output_dir: PathBuf::from("output"),
            competition: CompetitionConfig::default(),
            env: EnvConfig::default(),
            agent: AgentConfig::default(),
        }
    }
}

impl Default for CompetitionConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            data_dir: PathBuf::from("data"),
            metric: Metric::Accuracy,
            id_column: "id".to_string(),
            target_column: "target".to_string(),
            answer_file: PathBuf::from("private/test_answer.csv"),
            leaderboard_dir: None,
            rank_board: BoardType::Public,
        }
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: 600,
            max_steps: 20,
            time_limit_secs: 12 * 60 * 60,
            target_score: None,
            python: "python3".to_string(),
            output_limit_bytes: 100_000,
            overwrite: false,
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            steps: 20,
            code: CodeConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for CodeConfig {
    fn default() -> Self {
        Self {
            model_name: "o3".to_string(),
            command: vec!["codex".to_string(), "exec".to_string()],
            timeout_secs: 15 * 60,
            max_retries: 3,
            prompt_budget_bytes: 40_000,
        }
    }
}

impl DojoConfig {
    /// Structural checks that need no filesystem access.
    pub fn validate(&self) -> Result<()> {
        if self.competition.name.trim().is_empty() {
            return Err(anyhow!("competition.name must be set"));
        }
        if self.competition.id_column.trim().is_empty()
            || self.competition.target_column.trim().is_empty()
        {
            return Err(anyhow!(
                "competition.id_column and competition.target_column must be non-empty"
            ));
        }
        if self.env.execution_timeout_secs == 0 {
            return Err(anyhow!("env.execution_timeout_secs must be > 0"));
        }
        if self.env.max_steps == 0 {
            return Err(anyhow!("env.max_steps must be > 0"));
        }
        if self.env.time_limit_secs == 0 {
            return Err(anyhow!("env.time_limit_secs must be > 0"));
        }
        if self.env.python.trim().is_empty() {
            return Err(anyhow!("env.python must be non-empty"));
        }
        if self.env.output_limit_bytes == 0 {
            return Err(anyhow!("env.output_limit_bytes must be > 0"));
        }
        if self.agent.steps == 0 {
            return Err(anyhow!("agent.steps must be > 0"));
        }
        if self.agent.search.num_drafts == 0 && self.agent_type == AgentKind::TreeSearch {
            return Err(anyhow!("agent.search.num_drafts must be > 0"));
        }
        if self.agent.code.command.is_empty() || self.agent.code.command[0].trim().is_empty() {
            return Err(anyhow!("agent.code.command must be a non-empty array"));
        }
        if self.agent.code.timeout_secs == 0 {
            return Err(anyhow!("agent.code.timeout_secs must be > 0"));
        }
        if self.agent.code.max_retries == 0 {
            return Err(anyhow!("agent.code.max_retries must be > 0"));
        }
        Ok(())
    }

    /// Filesystem checks run once at startup.
    pub fn check_paths(&self) -> Result<()> {
        let data_dir = &self.competition.data_dir;
        if !data_dir.is_dir() {
            return Err(anyhow!(
                "competition.data_dir {} does not exist",
                data_dir.display()
            ));
        }
        if let Some(dir) = &self.competition.leaderboard_dir
            && !dir.is_dir()
        {
            return Err(anyhow!(
                "competition.leaderboard_dir {} does not exist",
                dir.display()
            ));
        }
        Ok(())
    }

    /// Output directory of this competition's episode.
    pub fn episode_dir(&self) -> PathBuf {
        self.output_dir.join(&self.competition.name)
    }

    pub fn answer_path(&self) -> PathBuf {
        self.competition.data_dir.join(&self.competition.answer_file)
    }

    pub fn higher_is_better(&self) -> bool {
        self.competition.metric.higher_is_better()
    }
}

/// Load config from a TOML file, apply env overrides and validate.
pub fn load_config(path: &Path) -> Result<DojoConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let mut cfg: DojoConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    if let Ok(name) = std::env::var(COMPETITION_NAME_ENV)
        && !name.trim().is_empty()
    {
        debug!(competition = %name, "competition name overridden from environment");
        cfg.competition.name = name;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &DojoConfig) -> Result<()> {
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
