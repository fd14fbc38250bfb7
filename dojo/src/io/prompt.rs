//! Prompt builder for the code generator.
//!
//! Templates mark each section with `<!-- section:KEY required|droppable -->`.
//! The rendered prompt is split on those markers so that droppable sections
//! can be removed, in a fixed order, until the prompt fits its byte budget.

use std::sync::LazyLock;

use anyhow::Result;
use minijinja::{Environment, context};
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::core::journal::{Journal, Node};
use crate::core::policy::Action;
use crate::io::scorer::SUBMISSION_FILE;
use crate::io::task::TaskContext;

const DRAFT_TEMPLATE: &str = include_str!("prompts/draft.md");
const DEBUG_TEMPLATE: &str = include_str!("prompts/debug.md");
const IMPROVE_TEMPLATE: &str = include_str!("prompts/improve.md");

/// Sections removed first when over budget.
const DROP_ORDER: [&str; 3] = ["memory", "data", "trace"];
const TRUNCATION_MARKER: &str = "\n[truncated]";
/// Good attempts listed in the memory section, most recent first.
const MEMORY_LIMIT: usize = 10;

static SECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*section:(\w+)\s+(required|droppable)\s*-->")
        .expect("section marker regex should be valid")
});

/// Target node fields exposed to templates.
#[derive(Debug, Clone, Serialize)]
struct TargetContext<'a> {
    id: u32,
    code: &'a str,
    trace: &'a str,
    outcome: &'a str,
    metric: Option<f64>,
}

impl<'a> TargetContext<'a> {
    fn from_node(node: &'a Node) -> Self {
        Self {
            id: node.id.0,
            code: node.code.trim(),
            trace: node.trace.trim(),
            outcome: node.outcome.as_str(),
            metric: node.metric,
        }
    }
}

/// Everything a prompt may draw on for one action.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub task: &'a TaskContext,
    pub action: Action,
    /// Node named by `action`; required for debug and improve.
    pub target: Option<&'a Node>,
    /// Summary of earlier attempts (see [`journal_memory`]). Only the
    /// improve template shows it.
    pub memory: String,
    pub metric: &'a str,
    pub higher_is_better: bool,
    pub timeout_secs: u64,
    /// Attempts left in the run, this one included.
    pub steps_left: u32,
    /// Whole seconds before the episode's time limit.
    pub time_left_secs: Option<u64>,
}

/// A rendered prompt ready for the generator.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptPack {
    content: String,
    dropped: Vec<String>,
}

impl PromptPack {
    pub fn as_str(&self) -> &str {
        &self.content
    }

    /// Section keys removed to meet the budget.
    pub fn dropped(&self) -> &[String] {
        &self.dropped
    }
}

#[derive(Debug, Clone)]
struct ParsedSection {
    key: String,
    required: bool,
    content: String,
}

#[derive(Debug)]
pub struct PromptBuilder {
    env: Environment<'static>,
    budget_bytes: usize,
}

impl PromptBuilder {
    pub fn new(budget_bytes: usize) -> Self {
        let mut env = Environment::new();
        env.add_template("draft", DRAFT_TEMPLATE)
            .expect("draft template should be valid");
        env.add_template("debug", DEBUG_TEMPLATE)
            .expect("debug template should be valid");
        env.add_template("improve", IMPROVE_TEMPLATE)
            .expect("improve template should be valid");
        Self { env, budget_bytes }
    }

    /// Render the template for `input.action` and fit it to the budget.
    pub fn build(&self, input: &PromptInputs<'_>) -> Result<PromptPack> {
        let template = self.env.get_template(input.action.label())?;
        let target = match (input.action.target(), input.target) {
            (Some(expected), Some(node)) if node.id == expected => {
                Some(TargetContext::from_node(node))
            }
            (Some(expected), _) => {
                anyhow::bail!("prompt for {} is missing target node {expected}", input.action.label())
            }
            (None, _) => None,
        };
        let memory = input.memory.trim();
        let rendered = template.render(context! {
            competition => input.task.competition.as_str(),
            description => input.task.description.trim(),
            data_overview => input.task.data_overview.trim(),
            memory => (!memory.is_empty()).then_some(memory),
            target => target,
            metric => input.metric,
            direction => if input.higher_is_better { "higher" } else { "lower" },
            timeout_secs => input.timeout_secs,
            steps_left => input.steps_left,
            time_left_secs => input.time_left_secs,
            submission_file => SUBMISSION_FILE,
        })?;

        let mut sections = parse_sections(&rendered);
        let dropped = apply_budget(&mut sections, self.budget_bytes);
        Ok(PromptPack {
            content: render_sections(&sections),
            dropped,
        })
    }
}

/// Plans and metrics of the most recent good attempts, for prompt memory.
pub fn journal_memory(journal: &Journal) -> String {
    let good = journal.good_nodes();
    let mut out = String::new();
    for node in good.iter().rev().take(MEMORY_LIMIT) {
        let plan = node.plan.trim();
        out.push_str(&format!(
            "- attempt {} ({}): metric {}\n  {}\n",
            node.id,
            node.stage.as_str(),
            node.metric.map(|m| format!("{m:.6}")).unwrap_or_default(),
            if plan.is_empty() { "(no plan)" } else { plan },
        ));
    }
    let failed = journal.len() - good.len();
    if failed > 0 {
        out.push_str(&format!("- {failed} attempt(s) failed to run\n"));
    }
    out
}

fn parse_sections(rendered: &str) -> Vec<ParsedSection> {
    let markers: Vec<_> = SECTION_RE.captures_iter(rendered).collect();
    let mut sections = Vec::with_capacity(markers.len());

    for (i, caps) in markers.iter().enumerate() {
        let (Some(whole), Some(key), Some(kind)) = (caps.get(0), caps.get(1), caps.get(2)) else {
            continue;
        };
        let end = markers
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(rendered.len(), |m| m.start());
        let required = kind.as_str() == "required";
        let content = rendered[whole.end()..end].trim().to_string();
        if !content.is_empty() || required {
            sections.push(ParsedSection {
                key: key.as_str().to_string(),
                required,
                content,
            });
        }
    }
    sections
}

/// Drop droppable sections in [`DROP_ORDER`], then truncate the last section.
fn apply_budget(sections: &mut Vec<ParsedSection>, budget: usize) -> Vec<String> {
    let total = |secs: &[ParsedSection]| -> usize { secs.iter().map(|s| s.content.len()).sum() };
    let mut dropped = Vec::new();

    for key in DROP_ORDER {
        if total(sections) <= budget {
            return dropped;
        }
        if let Some(idx) = sections.iter().position(|s| s.key == key && !s.required) {
            let section = sections.remove(idx);
            debug!(section = key, bytes_dropped = section.content.len(), "dropped section for budget");
            dropped.push(section.key);
        }
    }

    let over = total(sections).saturating_sub(budget);
    if over > 0
        && let Some(last) = sections.last_mut()
    {
        let before_len = last.content.len();
        let keep = before_len.saturating_sub(over + TRUNCATION_MARKER.len());
        truncate_at_boundary(&mut last.content, keep);
        last.content.push_str(TRUNCATION_MARKER);
        debug!(section = %last.key, before_len, after_len = last.content.len(), "truncated section for budget");
    }
    dropped
}

fn truncate_at_boundary(text: &mut String, max_len: usize) {
    if text.len() <= max_len {
        return;
    }
    let mut cut = max_len;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text.truncate(cut);
}

fn render_sections(sections: &[ParsedSection]) -> String {
    sections
        .iter()
        .map(|s| s.content.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}
