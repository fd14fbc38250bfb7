//! Test-only collaborators and fixtures.
//!
//! Scripted runners, scorers and generators replay canned results so that
//! episode and search behavior can be tested without Python or an LLM.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::core::policy::Action;
use crate::core::types::{BoardType, ExecutionOutcome};
use crate::io::generator::{CodeGenerator, Generation, GenerationRequest};
use crate::io::sandbox::{CodeRunner, RunReport, RunRequest};
use crate::io::scorer::Scorer;

/// Pop the next scripted item, repeating the last one once the script runs out.
fn next_or_last<T: Clone>(queue: &RefCell<VecDeque<T>>, last: &RefCell<Option<T>>) -> Option<T> {
    match queue.borrow_mut().pop_front() {
        Some(item) => {
            *last.borrow_mut() = Some(item.clone());
            Some(item)
        }
        None => last.borrow().clone(),
    }
}

/// Runner that replays outcomes and writes `solution.py` like the real one.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    outcomes: RefCell<VecDeque<ExecutionOutcome>>,
    last: RefCell<Option<ExecutionOutcome>>,
    calls: RefCell<Vec<(String, PathBuf, Duration)>>,
}

impl ScriptedRunner {
    pub fn always(outcome: ExecutionOutcome) -> Self {
        Self::sequence([outcome])
    }

    pub fn sequence(outcomes: impl IntoIterator<Item = ExecutionOutcome>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into_iter().collect()),
            ..Self::default()
        }
    }

    /// `(code, workspace dir, timeout)` per call.
    pub fn calls(&self) -> Vec<(String, PathBuf, Duration)> {
        self.calls.borrow().clone()
    }
}

impl CodeRunner for ScriptedRunner {
    fn run(&self, request: &RunRequest<'_>) -> Result<RunReport> {
        request.workspace.create()?;
        fs::write(&request.workspace.solution_path, request.code)?;
        self.calls.borrow_mut().push((
            request.code.to_string(),
            request.workspace.dir.clone(),
            request.timeout,
        ));
        let outcome = next_or_last(&self.outcomes, &self.last)
            .ok_or_else(|| anyhow!("scripted runner has no outcomes"))?;
        Ok(RunReport {
            outcome,
            trace: format!("scripted {outcome}"),
            duration: Duration::from_millis(1),
        })
    }
}

/// Scorer that replays scores or errors.
#[derive(Debug)]
pub struct ScriptedScorer {
    scores: RefCell<VecDeque<Result<f64, String>>>,
    last: RefCell<Option<Result<f64, String>>>,
    higher_is_better: bool,
}

impl ScriptedScorer {
    pub fn constant(score: f64) -> Self {
        Self::sequence([score])
    }

    pub fn sequence(scores: impl IntoIterator<Item = f64>) -> Self {
        Self {
            scores: RefCell::new(scores.into_iter().map(Ok).collect()),
            last: RefCell::new(None),
            higher_is_better: true,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            scores: RefCell::new(VecDeque::from([Err(message.to_string())])),
            last: RefCell::new(None),
            higher_is_better: true,
        }
    }

    pub fn lower_is_better(mut self) -> Self {
        self.higher_is_better = false;
        self
    }
}

impl Scorer for ScriptedScorer {
    fn score(&self, _workspace: &Path) -> Result<f64> {
        match next_or_last(&self.scores, &self.last) {
            Some(Ok(score)) => Ok(score),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted scorer has no scores")),
        }
    }

    fn higher_is_better(&self) -> bool {
        self.higher_is_better
    }
}

/// Generator that replays responses; collaborator errors are `Err(message)`.
#[derive(Debug, Default)]
pub struct ScriptedGenerator {
    responses: RefCell<VecDeque<Result<Generation, String>>>,
    requests: RefCell<Vec<(Action, String)>>,
}

impl ScriptedGenerator {
    pub fn new(responses: impl IntoIterator<Item = Result<Generation, String>>) -> Self {
        Self {
            responses: RefCell::new(responses.into_iter().collect()),
            requests: RefCell::new(Vec::new()),
        }
    }

    /// `(action, prompt)` per call, including failed attempts.
    pub fn requests(&self) -> Vec<(Action, String)> {
        self.requests.borrow().clone()
    }
}

impl CodeGenerator for ScriptedGenerator {
    fn generate(&self, request: &GenerationRequest<'_>) -> Result<Generation> {
        let call = {
            let mut requests = self.requests.borrow_mut();
            requests.push((request.action, request.prompt.to_string()));
            requests.len()
        };
        match self.responses.borrow_mut().pop_front() {
            Some(Ok(generation)) => Ok(generation),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(generation(&format!("plan {call}"), &format!("print({call})"))),
        }
    }
}

pub fn generation(plan: &str, code: &str) -> Generation {
    Generation {
        plan: plan.to_string(),
        code: code.to_string(),
    }
}

/// Write `<dir>/<board>_leaderboard.csv` with one team per score.
pub fn write_leaderboard(dir: &Path, board: BoardType, scores: &[f64]) {
    fs::create_dir_all(dir).expect("create leaderboard dir");
    let mut body = String::from("TeamName,Score\n");
    for (idx, score) in scores.iter().enumerate() {
        body.push_str(&format!("team-{idx},{score}\n"));
    }
    fs::write(dir.join(board.file_name()), body).expect("write leaderboard");
}

/// Minimal competition data directory: `public/` with a description, train
/// and sample submission, `private/` with the answers.
pub fn write_competition(dir: &Path) -> PathBuf {
    let public = dir.join("public");
    let private = dir.join("private");
    fs::create_dir_all(&public).expect("create public dir");
    fs::create_dir_all(&private).expect("create private dir");
    fs::write(public.join("description.txt"), "Predict the label.\n").expect("description");
    fs::write(public.join("train.csv"), "id,x,label\n1,0.1,0\n2,0.9,1\n").expect("train");
    fs::write(public.join("test.csv"), "id,x\n3,0.2\n4,0.8\n").expect("test");
    fs::write(public.join("sample_submission.csv"), "id,label\n3,0\n4,0\n")
        .expect("sample submission");
    fs::write(private.join("test_answer.csv"), "id,label\n3,0\n4,1\n").expect("answers");
    dir.to_path_buf()
}
