//! Solution journal: an append-only arena of attempt nodes.
//!
//! Nodes reference their parent by id. The parent -> children relation is a
//! lookup index derived from `parent_id` and maintained on append; nodes never
//! own each other, so the journal serializes as a flat list.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::score::is_better_score;
use crate::core::types::ExecutionOutcome;

/// Journal-assigned node identifier. Also names the node's workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which search action produced a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStage {
    Draft,
    Debug,
    Improve,
}

impl NodeStage {
    pub fn as_str(self) -> &'static str {
        match self {
            NodeStage::Draft => "draft",
            NodeStage::Debug => "debug",
            NodeStage::Improve => "improve",
        }
    }
}

/// One generated-and-executed code attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub parent_id: Option<NodeId>,
    pub stage: NodeStage,
    pub plan: String,
    pub code: String,
    pub outcome: ExecutionOutcome,
    pub trace: String,
    /// Present iff `outcome` is `Success`.
    pub metric: Option<f64>,
    pub depth: u32,
    /// Consecutive debug attempts ending at this node (0 unless `stage` is debug).
    pub debug_depth: u32,
    pub created_order: u32,
    /// Environment step that executed this node's code.
    pub step_index: Option<u32>,
}

impl Node {
    pub fn is_buggy(&self) -> bool {
        !self.outcome.is_success()
    }
}

/// Node contents supplied by the controller; the journal derives the rest.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingNode {
    pub parent_id: Option<NodeId>,
    pub stage: NodeStage,
    pub plan: String,
    pub code: String,
    pub outcome: ExecutionOutcome,
    pub trace: String,
    pub metric: Option<f64>,
    pub step_index: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("parent node {parent} is not in the journal")]
pub struct DanglingParentError {
    pub parent: NodeId,
}

/// Rejected journal contents when rebuilding from a saved node list.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JournalLoadError {
    #[error("node at position {position} has id {found}, expected {expected}")]
    IdOutOfSequence {
        position: usize,
        expected: NodeId,
        found: NodeId,
    },
    #[error(transparent)]
    DanglingParent(#[from] DanglingParentError),
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Journal {
    nodes: Vec<Node>,
    #[serde(skip)]
    children: HashMap<NodeId, Vec<NodeId>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a journal from a node list, revalidating ids and parent links.
    pub fn from_nodes(nodes: Vec<Node>) -> Result<Self, JournalLoadError> {
        let mut journal = Journal::new();
        for (position, node) in nodes.into_iter().enumerate() {
            let expected = journal.next_id();
            if node.id != expected {
                return Err(JournalLoadError::IdOutOfSequence {
                    position,
                    expected,
                    found: node.id,
                });
            }
            if let Some(parent) = node.parent_id {
                journal.ensure_present(parent)?;
                journal.children.entry(parent).or_default().push(node.id);
            }
            journal.nodes.push(node);
        }
        Ok(journal)
    }

    /// Id the next `append` will assign.
    pub fn next_id(&self) -> NodeId {
        NodeId(self.nodes.len() as u32)
    }

    /// Append a node, assigning its id and lineage fields.
    ///
    /// A missing parent is rejected before anything is stored.
    pub fn append(&mut self, pending: PendingNode) -> Result<NodeId, DanglingParentError> {
        let (depth, debug_depth) = match pending.parent_id {
            None => (0, 0),
            Some(parent_id) => {
                let parent = self
                    .get(parent_id)
                    .ok_or(DanglingParentError { parent: parent_id })?;
                let debug_depth = match pending.stage {
                    NodeStage::Debug => parent.debug_depth + 1,
                    NodeStage::Draft | NodeStage::Improve => 0,
                };
                (parent.depth + 1, debug_depth)
            }
        };

        let id = self.next_id();
        let metric = if pending.outcome.is_success() {
            pending.metric
        } else {
            None
        };
        self.nodes.push(Node {
            id,
            parent_id: pending.parent_id,
            stage: pending.stage,
            plan: pending.plan,
            code: pending.code,
            outcome: pending.outcome,
            trace: pending.trace,
            metric,
            depth,
            debug_depth,
            created_order: id.0,
            step_index: pending.step_index,
        });
        if let Some(parent) = pending.parent_id {
            self.children.entry(parent).or_default().push(id);
        }
        Ok(id)
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Children of `id` in creation order.
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.children.get(&id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.children(id).is_empty()
    }

    pub fn draft_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.parent_id.is_none()).collect()
    }

    pub fn buggy_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| n.is_buggy()).collect()
    }

    pub fn good_nodes(&self) -> Vec<&Node> {
        self.nodes.iter().filter(|n| !n.is_buggy()).collect()
    }

    /// Best validated node; earliest created wins ties.
    pub fn best_node(&self, higher_is_better: bool) -> Option<&Node> {
        let mut best: Option<&Node> = None;
        for node in self.nodes.iter().filter(|n| !n.is_buggy()) {
            let Some(metric) = node.metric else {
                continue;
            };
            // Nodes are visited in created_order, so only a strict improvement
            // displaces the current best.
            if is_better_score(metric, best.and_then(|b| b.metric), higher_is_better) {
                best = Some(node);
            }
        }
        best
    }

    fn ensure_present(&self, id: NodeId) -> Result<(), DanglingParentError> {
        if self.get(id).is_some() {
            Ok(())
        } else {
            Err(DanglingParentError { parent: id })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(parent: Option<u32>, stage: NodeStage, metric: Option<f64>) -> PendingNode {
        PendingNode {
            parent_id: parent.map(NodeId),
            stage,
            plan: String::new(),
            code: "print('hi')".to_string(),
            outcome: if metric.is_some() {
                ExecutionOutcome::Success
            } else {
                ExecutionOutcome::RuntimeError
            },
            trace: String::new(),
            metric,
            step_index: None,
        }
    }

    #[test]
    fn append_assigns_monotonic_ids_and_depths() {
        let mut journal = Journal::new();
        let root = journal
            .append(pending(None, NodeStage::Draft, None))
            .expect("root");
        let fix = journal
            .append(pending(Some(root.0), NodeStage::Debug, None))
            .expect("debug");
        let fix2 = journal
            .append(pending(Some(fix.0), NodeStage::Debug, Some(0.5)))
            .expect("debug 2");
        let better = journal
            .append(pending(Some(fix2.0), NodeStage::Improve, Some(0.6)))
            .expect("improve");

        assert_eq!([root, fix, fix2, better], [NodeId(0), NodeId(1), NodeId(2), NodeId(3)]);
        let node = journal.get(fix2).expect("node");
        assert_eq!(node.depth, 2);
        assert_eq!(node.debug_depth, 2);
        assert_eq!(journal.get(better).expect("node").debug_depth, 0);
        assert_eq!(journal.children(root), &[fix]);
        assert!(journal.is_leaf(better));
        assert_eq!(journal.get(better).expect("node").parent_id, Some(fix2));
    }

    #[test]
    fn dangling_parent_leaves_journal_unchanged() {
        let mut journal = Journal::new();
        journal
            .append(pending(None, NodeStage::Draft, Some(1.0)))
            .expect("root");

        let err = journal
            .append(pending(Some(7), NodeStage::Improve, Some(2.0)))
            .unwrap_err();

        assert_eq!(err, DanglingParentError { parent: NodeId(7) });
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.next_id(), NodeId(1));
        assert!(journal.children(NodeId(7)).is_empty());
    }

    #[test]
    fn views_partition_by_outcome_and_parent() {
        let mut journal = Journal::new();
        let a = journal
            .append(pending(None, NodeStage::Draft, None))
            .expect("a");
        journal
            .append(pending(None, NodeStage::Draft, Some(0.3)))
            .expect("b");
        journal
            .append(pending(Some(a.0), NodeStage::Debug, Some(0.2)))
            .expect("c");

        assert_eq!(journal.draft_nodes().len(), 2);
        assert_eq!(journal.buggy_nodes().len(), 1);
        assert_eq!(journal.good_nodes().len(), 2);
    }

    #[test]
    fn best_node_is_none_without_good_nodes() {
        let mut journal = Journal::new();
        assert!(journal.best_node(true).is_none());
        journal
            .append(pending(None, NodeStage::Draft, None))
            .expect("buggy");
        assert!(journal.best_node(true).is_none());
        assert!(journal.best_node(false).is_none());
    }

    #[test]
    fn best_node_respects_direction_and_breaks_ties_by_creation() {
        let mut journal = Journal::new();
        journal
            .append(pending(None, NodeStage::Draft, Some(0.7)))
            .expect("0");
        journal
            .append(pending(None, NodeStage::Draft, Some(0.9)))
            .expect("1");
        journal
            .append(pending(None, NodeStage::Draft, Some(0.9)))
            .expect("2");
        journal
            .append(pending(None, NodeStage::Draft, Some(0.1)))
            .expect("3");
        journal
            .append(pending(None, NodeStage::Draft, None))
            .expect("4");

        let best = journal.best_node(true).expect("best");
        assert_eq!(best.id, NodeId(1));
        assert!(!best.is_buggy());
        assert_eq!(journal.best_node(false).expect("best").id, NodeId(3));
    }

    #[test]
    fn failed_outcome_drops_metric() {
        let mut journal = Journal::new();
        let mut node = pending(None, NodeStage::Draft, Some(1.0));
        node.outcome = ExecutionOutcome::Timeout;
        let id = journal.append(node).expect("append");
        assert_eq!(journal.get(id).expect("node").metric, None);
        assert!(journal.best_node(true).is_none());
    }

    #[test]
    fn from_nodes_rebuilds_children_and_rejects_bad_input() {
        let mut journal = Journal::new();
        let root = journal
            .append(pending(None, NodeStage::Draft, Some(0.1)))
            .expect("root");
        journal
            .append(pending(Some(root.0), NodeStage::Improve, Some(0.2)))
            .expect("child");

        let rebuilt = Journal::from_nodes(journal.nodes().to_vec()).expect("rebuild");
        assert_eq!(rebuilt.children(root), &[NodeId(1)]);

        let mut orphan = journal.nodes().to_vec();
        orphan[1].parent_id = Some(NodeId(5));
        assert!(matches!(
            Journal::from_nodes(orphan),
            Err(JournalLoadError::DanglingParent(_))
        ));

        let mut shuffled = journal.nodes().to_vec();
        shuffled.swap(0, 1);
        assert!(matches!(
            Journal::from_nodes(shuffled),
            Err(JournalLoadError::IdOutOfSequence { position: 0, .. })
        ));
    }
}
