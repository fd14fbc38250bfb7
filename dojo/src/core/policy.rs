//! Action selection for the search controller.
//!
//! Pure function of the journal and the search settings: the controller calls
//! [`next_action`] once per iteration and matches the returned [`Action`].

use serde::{Deserialize, Serialize};

use crate::core::journal::{Journal, Node, NodeId};

/// Agent strategy selected by `agent_type` in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AgentKind {
    /// Draft-first exploration, bounded repair, greedy improvement.
    #[default]
    TreeSearch,
    /// A single lineage: repair or refine the latest attempt.
    Sequential,
    /// Independent one-shot generations every step.
    DirectApi,
    /// Fixed baseline script every step.
    Baseline,
}

/// Tree-search breadth and repair limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Independent root drafts to create before any refinement.
    pub num_drafts: u32,
    /// Consecutive debug attempts allowed on one lineage.
    pub max_debug_depth: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            num_drafts: 5,
            max_debug_depth: 3,
        }
    }
}

/// What the controller does next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Action {
    /// Fresh, context-free generation forming a new root.
    Draft,
    /// Repair `target` using its code and execution trace.
    Debug { target: NodeId },
    /// Refine `target`, the current best validated node.
    Improve { target: NodeId },
}

impl Action {
    pub fn label(&self) -> &'static str {
        match self {
            Action::Draft => "draft",
            Action::Debug { .. } => "debug",
            Action::Improve { .. } => "improve",
        }
    }

    pub fn target(&self) -> Option<NodeId> {
        match self {
            Action::Draft => None,
            Action::Debug { target } | Action::Improve { target } => Some(*target),
        }
    }
}

/// Choose the next action for `kind` given the current journal.
pub fn next_action(
    kind: AgentKind,
    journal: &Journal,
    config: &SearchConfig,
    higher_is_better: bool,
) -> Action {
    match kind {
        AgentKind::TreeSearch => tree_search_action(journal, config, higher_is_better),
        AgentKind::Sequential => sequential_action(journal, config),
        AgentKind::DirectApi | AgentKind::Baseline => Action::Draft,
    }
}

/// Fixed-priority rule: draft until `num_drafts` roots exist, then debug the
/// most recent debuggable node, then improve the best node.
pub fn tree_search_action(
    journal: &Journal,
    config: &SearchConfig,
    higher_is_better: bool,
) -> Action {
    if (journal.draft_nodes().len() as u32) < config.num_drafts {
        return Action::Draft;
    }

    if let Some(target) = journal
        .nodes()
        .iter()
        .rev()
        .find(|node| is_debuggable(journal, node, config))
    {
        return Action::Debug { target: target.id };
    }

    match journal.best_node(higher_is_better) {
        Some(best) => Action::Improve { target: best.id },
        None => Action::Draft,
    }
}

fn sequential_action(journal: &Journal, config: &SearchConfig) -> Action {
    let Some(latest) = journal.nodes().last() else {
        return Action::Draft;
    };
    if is_debuggable(journal, latest, config) {
        return Action::Debug { target: latest.id };
    }
    match journal.nodes().iter().rev().find(|node| !node.is_buggy()) {
        Some(good) => Action::Improve { target: good.id },
        None => Action::Draft,
    }
}

/// Buggy leaf whose lineage still has debug budget left.
pub fn is_debuggable(journal: &Journal, node: &Node, config: &SearchConfig) -> bool {
    node.is_buggy() && journal.is_leaf(node.id) && node.debug_depth < config.max_debug_depth
}
