//! Append-only step history with deferred persistence.
//!
//! Records are buffered in memory while an episode runs; `checkpoint`
//! appends only the records written since the previous checkpoint to
//! `history.jsonl`, so I/O stays proportional to new records.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use crate::core::types::StepRecord;

#[derive(Debug)]
pub struct HistoryLog {
    path: PathBuf,
    records: Vec<StepRecord>,
    persisted: usize,
    closed: bool,
}

impl HistoryLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
            persisted: 0,
            closed: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer one record. Never touches disk.
    pub fn push(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records not yet written to disk.
    pub fn pending(&self) -> usize {
        self.records.len() - self.persisted
    }

    /// Append unpersisted records as JSON lines. Returns how many were written.
    pub fn checkpoint(&mut self) -> Result<usize> {
        let pending = &self.records[self.persisted..];
        if pending.is_empty() {
            return Ok(0);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }

        let mut buf = String::new();
        for record in pending {
            buf.push_str(&serde_json::to_string(record).context("serialize step record")?);
            buf.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open history {}", self.path.display()))?;
        file.write_all(buf.as_bytes())
            .with_context(|| format!("append history {}", self.path.display()))?;

        let written = pending.len();
        self.persisted = self.records.len();
        debug!(path = %self.path.display(), written, "history checkpoint");
        Ok(written)
    }

    /// Final flush. Later calls are no-ops.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.checkpoint()?;
        self.closed = true;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Read a `history.jsonl` file back into records.
pub fn load_history(path: &Path) -> Result<Vec<StepRecord>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read history {}", path.display()))?;
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("parse history {} line {}", path.display(), idx + 1))
        })
        .collect()
}
