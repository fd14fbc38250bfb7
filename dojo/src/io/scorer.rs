//! Scoring collaborator: turns a finished workspace into a metric value.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::table::Table;

/// File a solution must write into its workspace.
pub const SUBMISSION_FILE: &str = "submission.csv";

/// Competition metric; fixes the optimization direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    Accuracy,
    Rmse,
    Mae,
    LogLoss,
}

impl Metric {
    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::Rmse => "rmse",
            Metric::Mae => "mae",
            Metric::LogLoss => "log-loss",
        }
    }

    pub fn higher_is_better(self) -> bool {
        match self {
            Metric::Accuracy => true,
            Metric::Rmse | Metric::Mae | Metric::LogLoss => false,
        }
    }

    /// Evaluate aligned `(prediction, truth)` cells.
    pub fn evaluate(self, pairs: &[(&str, &str)]) -> Result<f64> {
        if pairs.is_empty() {
            return Err(anyhow!("no rows to score"));
        }
        let n = pairs.len() as f64;
        match self {
            Metric::Accuracy => {
                let hits = pairs
                    .iter()
                    .filter(|(pred, truth)| labels_match(pred, truth))
                    .count();
                Ok(hits as f64 / n)
            }
            Metric::Rmse => {
                let sum: f64 = numeric(pairs)?.iter().map(|(p, t)| (p - t).powi(2)).sum();
                Ok((sum / n).sqrt())
            }
            Metric::Mae => {
                let sum: f64 = numeric(pairs)?.iter().map(|(p, t)| (p - t).abs()).sum();
                Ok(sum / n)
            }
            Metric::LogLoss => {
                const EPS: f64 = 1e-15;
                let sum: f64 = numeric(pairs)?
                    .iter()
                    .map(|(p, t)| {
                        let p = p.clamp(EPS, 1.0 - EPS);
                        -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
                    })
                    .sum();
                Ok(sum / n)
            }
        }
    }
}

fn labels_match(pred: &str, truth: &str) -> bool {
    let (pred, truth) = (pred.trim(), truth.trim());
    if pred == truth {
        return true;
    }
    match (pred.parse::<f64>(), truth.parse::<f64>()) {
        (Ok(p), Ok(t)) => p == t,
        _ => false,
    }
}

fn numeric(pairs: &[(&str, &str)]) -> Result<Vec<(f64, f64)>> {
    pairs
        .iter()
        .map(|(pred, truth)| {
            let p = pred
                .trim()
                .parse::<f64>()
                .with_context(|| format!("prediction '{pred}' is not numeric"))?;
            let t = truth
                .trim()
                .parse::<f64>()
                .with_context(|| format!("answer '{truth}' is not numeric"))?;
            Ok((p, t))
        })
        .collect()
}

/// Abstraction over the competition's scoring function.
pub trait Scorer {
    /// Score the submission produced in `workspace`.
    fn score(&self, workspace: &Path) -> Result<f64>;

    fn higher_is_better(&self) -> bool;
}

/// Scores `submission.csv` against the private answer file.
///
/// The answer file is read once at construction.
#[derive(Debug, Clone)]
pub struct SubmissionScorer {
    metric: Metric,
    id_column: String,
    target_column: String,
    /// `(id, truth)` in answer file order.
    answers: Vec<(String, String)>,
}

impl SubmissionScorer {
    pub fn new(
        metric: Metric,
        answer_path: &Path,
        id_column: impl Into<String>,
        target_column: impl Into<String>,
    ) -> Result<Self> {
        let id_column = id_column.into();
        let target_column = target_column.into();
        let table = Table::read(answer_path)
            .with_context(|| format!("load answers {}", answer_path.display()))?;
        let (id, target) = required_columns(&table, [id_column.as_str(), target_column.as_str()], "answer file")?;
        let answers = table
            .rows
            .iter()
            .map(|row| (row[id].trim().to_string(), row[target].clone()))
            .collect::<Vec<_>>();
        debug!(path = %answer_path.display(), rows = answers.len(), "answers loaded");
        Ok(Self {
            metric,
            id_column,
            target_column,
            answers,
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }
}

impl Scorer for SubmissionScorer {
    fn score(&self, workspace: &Path) -> Result<f64> {
        let submission_path = workspace.join(SUBMISSION_FILE);
        if !submission_path.is_file() {
            return Err(anyhow!("no {SUBMISSION_FILE} written to workspace"));
        }
        let submission = Table::read(&submission_path)?;
        let (sub_id, sub_target) = required_columns(
            &submission,
            [self.id_column.as_str(), self.target_column.as_str()],
            "submission",
        )?;

        let mut predicted: HashMap<&str, &str> = HashMap::with_capacity(submission.rows.len());
        for row in &submission.rows {
            let id = row[sub_id].trim();
            if predicted.insert(id, row[sub_target].as_str()).is_some() {
                return Err(anyhow!("submission has duplicate id '{id}'"));
            }
        }

        let mut pairs = Vec::with_capacity(self.answers.len());
        for (id, truth) in &self.answers {
            let pred = predicted
                .get(id.as_str())
                .ok_or_else(|| anyhow!("submission is missing id '{id}'"))?;
            pairs.push((*pred, truth.as_str()));
        }
        let score = self.metric.evaluate(&pairs)?;
        debug!(metric = ?self.metric, rows = pairs.len(), score, "submission scored");
        Ok(score)
    }

    fn higher_is_better(&self) -> bool {
        self.metric.higher_is_better()
    }
}

fn required_columns(table: &Table, columns: [&str; 2], label: &str) -> Result<(usize, usize)> {
    let id = table
        .column(&[columns[0]])
        .ok_or_else(|| anyhow!("{label} has no '{}' column", columns[0]))?;
    let target = table
        .column(&[columns[1]])
        .ok_or_else(|| anyhow!("{label} has no '{}' column", columns[1]))?;
    Ok((id, target))
}
