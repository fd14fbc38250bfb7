//! Journal persistence (`journal.json`) and best-solution export.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::core::journal::{Journal, Node};
use crate::io::paths::write_atomic;

/// Load a saved journal, revalidating ids and parent links.
pub fn load_journal(path: &Path) -> Result<Journal> {
    debug!(path = %path.display(), "loading journal");
    let contents =
        fs::read_to_string(path).with_context(|| format!("read journal {}", path.display()))?;
    let nodes: Vec<Node> = serde_json::from_str(&contents)
        .with_context(|| format!("parse journal {}", path.display()))?;
    let journal = Journal::from_nodes(nodes)
        .with_context(|| format!("validate journal {}", path.display()))?;
    debug!(nodes = journal.len(), "journal loaded");
    Ok(journal)
}

/// Atomically write the journal node list (temp file + rename).
pub fn save_journal(path: &Path, journal: &Journal) -> Result<()> {
    debug!(path = %path.display(), nodes = journal.len(), "writing journal");
    let mut buf = serde_json::to_string_pretty(journal.nodes())?;
    buf.push('\n');
    write_atomic(path, &buf)
}

/// Write the best node's code to `path`. Returns false when no node is good.
pub fn export_best_solution(path: &Path, journal: &Journal, higher_is_better: bool) -> Result<bool> {
    let Some(best) = journal.best_node(higher_is_better) else {
        info!("no successful node, skipping best solution export");
        return Ok(false);
    };
    write_atomic(path, &best.code)?;
    info!(node = %best.id, metric = ?best.metric, path = %path.display(), "best solution exported");
    Ok(true)
}
