//! Code generation collaborator.
//!
//! The [`CodeGenerator`] trait decouples the search controller from the LLM
//! backend. [`CommandGenerator`] drives an agent CLI (by default
//! `codex exec`) with the prompt on stdin and a JSON Schema constraining its
//! final message. Tests use scripted generators instead.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use jsonschema::Validator;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::policy::Action;
use crate::io::paths::NodeWorkspace;
use crate::io::process::run_with_timeout;

/// Schema of the generator's final message.
pub const GENERATION_SCHEMA: &str = r#"{
  "$schema": "https://json-schema.org/draft/2020-12/schema",
  "type": "object",
  "additionalProperties": false,
  "required": ["plan", "code"],
  "properties": {
    "plan": { "type": "string" },
    "code": { "type": "string" }
  }
}
"#;

static CODE_FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\r?\n(.*?)```").expect("code fence regex should be valid")
});

/// Parameters for one generation.
#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub action: Action,
    pub prompt: &'a str,
    pub workspace: &'a NodeWorkspace,
}

/// A plan and the code implementing it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Generation {
    pub plan: String,
    pub code: String,
}

/// Abstraction over code generation backends.
pub trait CodeGenerator {
    /// Produce code for `request.action`.
    ///
    /// Errors are collaborator failures (auth, rate limits, crashes) and are
    /// retried by the controller. Malformed output is not an error.
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation>;
}

/// Write [`GENERATION_SCHEMA`] where the agent CLI can read it.
pub fn write_generation_schema(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    fs::write(path, GENERATION_SCHEMA).with_context(|| format!("write schema {}", path.display()))
}

/// Generator that spawns an agent CLI per request.
pub struct CommandGenerator {
    command: Vec<String>,
    model_name: String,
    schema_path: PathBuf,
    timeout: Duration,
    output_limit_bytes: usize,
    validator: Validator,
}

impl CommandGenerator {
    pub fn new(
        command: Vec<String>,
        model_name: String,
        schema_path: PathBuf,
        timeout: Duration,
        output_limit_bytes: usize,
    ) -> Result<Self> {
        if command.is_empty() {
            return Err(anyhow!("generator command is empty"));
        }
        let schema: Value =
            serde_json::from_str(GENERATION_SCHEMA).context("parse generation schema")?;
        let validator = jsonschema::validator_for(&schema)
            .map_err(|err| anyhow!("invalid generation schema: {err}"))?;
        Ok(Self {
            command,
            model_name,
            schema_path,
            timeout,
            output_limit_bytes,
            validator,
        })
    }

    /// Interpret the agent's final message; never fails.
    pub fn parse_output(&self, raw: &str) -> Generation {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) if self.validator.is_valid(&value) => {
                match serde_json::from_value::<Generation>(value) {
                    Ok(generation) => Generation {
                        plan: generation.plan.trim().to_string(),
                        code: extract_code(&generation.code),
                    },
                    Err(err) => {
                        warn!(err = %err, "generation output did not deserialize");
                        raw_generation(raw)
                    }
                }
            }
            Ok(value) => {
                let messages: Vec<String> = self
                    .validator
                    .iter_errors(&value)
                    .map(|err| err.to_string())
                    .collect();
                warn!(errors = %messages.join("; "), "generation output failed schema validation");
                raw_generation(raw)
            }
            Err(err) => {
                warn!(err = %err, "generation output is not JSON");
                raw_generation(raw)
            }
        }
    }
}

impl CodeGenerator for CommandGenerator {
    #[instrument(skip_all, fields(action = request.action.label(), timeout_secs = self.timeout.as_secs()))]
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation> {
        let workspace = request.workspace;
        workspace.create()?;
        fs::write(&workspace.prompt_path, request.prompt)
            .with_context(|| format!("write {}", workspace.prompt_path.display()))?;
        if !self.schema_path.exists() {
            return Err(anyhow!(
                "missing generation schema {}",
                self.schema_path.display()
            ));
        }
        // A stale message from an earlier attempt must not be mistaken for output.
        if workspace.generation_path.exists() {
            fs::remove_file(&workspace.generation_path)
                .with_context(|| format!("remove {}", workspace.generation_path.display()))?;
        }

        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args);
        if !self.model_name.trim().is_empty() {
            cmd.arg("--model").arg(&self.model_name);
        }
        cmd.arg("--output-schema")
            .arg(&self.schema_path)
            .arg("--output-last-message")
            .arg(&workspace.generation_path)
            .arg("-")
            .current_dir(&workspace.dir);

        info!(program = %program, "starting generator");
        let output = run_with_timeout(
            cmd,
            Some(request.prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run {program}"))?;
        fs::write(&workspace.generation_log_path, output.render_log("generator"))
            .with_context(|| format!("write {}", workspace.generation_log_path.display()))?;

        if output.timed_out {
            return Err(anyhow!("{program} timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "{program} failed with status {:?}",
                output.status.code()
            ));
        }
        if !workspace.generation_path.is_file() {
            return Err(anyhow!(
                "missing generator output {}",
                workspace.generation_path.display()
            ));
        }
        let raw = fs::read_to_string(&workspace.generation_path)
            .with_context(|| format!("read {}", workspace.generation_path.display()))?;
        let generation = self.parse_output(&raw);
        debug!(plan_bytes = generation.plan.len(), code_bytes = generation.code.len(), "generation parsed");
        Ok(generation)
    }
}

/// Submits a fixed script that copies the sample submission.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineGenerator;

pub const BASELINE_PLAN: &str = "Copy the sample submission unchanged.";

pub const BASELINE_SCRIPT: &str = r#"import glob
import os
import shutil

data_dir = os.environ.get("DOJO_DATA_DIR", ".")
candidates = sorted(glob.glob(os.path.join(data_dir, "**", "sample_submission*.csv"), recursive=True))
if not candidates:
    raise SystemExit("no sample submission found under " + data_dir)
shutil.copyfile(candidates[0], "submission.csv")
print("copied", candidates[0])
"#;

impl CodeGenerator for BaselineGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation> {
        debug!(action = request.action.label(), "baseline generation");
        Ok(Generation {
            plan: BASELINE_PLAN.to_string(),
            code: BASELINE_SCRIPT.to_string(),
        })
    }
}

/// Code inside the first fenced block, or the whole text when unfenced.
pub fn extract_code(text: &str) -> String {
    match CODE_FENCE_RE.captures(text).and_then(|caps| caps.get(1)) {
        Some(body) => body.as_str().trim_end().to_string(),
        None => text.trim().to_string(),
    }
}

fn raw_generation(raw: &str) -> Generation {
    Generation {
        plan: String::new(),
        code: extract_code(raw),
    }
}
