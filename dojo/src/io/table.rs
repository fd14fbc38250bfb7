//! Minimal CSV reader for leaderboards, submissions and answer files.
//!
//! Handles a header row, quoted fields with embedded commas and doubled
//! quotes, and CRLF line endings. Multi-line quoted fields are not supported.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};

/// Parsed CSV file: header plus rows of raw string cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("parse {}", path.display()))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let mut lines = contents
            .lines()
            .map(|line| line.trim_end_matches('\r'))
            .filter(|line| !line.trim().is_empty());
        let header_line = lines.next().ok_or_else(|| anyhow!("empty csv"))?;
        let header = split_row(header_line.trim_start_matches('\u{feff}'))?;
        let mut rows = Vec::new();
        for (idx, line) in lines.enumerate() {
            let row = split_row(line).with_context(|| format!("row {}", idx + 1))?;
            if row.len() != header.len() {
                return Err(anyhow!(
                    "row {} has {} fields, header has {}",
                    idx + 1,
                    row.len(),
                    header.len()
                ));
            }
            rows.push(row);
        }
        Ok(Self { header, rows })
    }

    /// Index of the first header matching any of `names` (case-insensitive).
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            self.header
                .iter()
                .position(|h| h.trim().eq_ignore_ascii_case(name))
        })
    }
}

fn split_row(line: &str) -> Result<Vec<String>> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match (ch, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => fields.push(std::mem::take(&mut field)),
            (other, _) => field.push(other),
        }
    }
    if in_quotes {
        return Err(anyhow!("unterminated quoted field"));
    }
    fields.push(field);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_fields() {
        let table = Table::parse(
            "TeamId,TeamName,Score\r\n1,\"Smith, Jones\",0.91\r\n2,\"say \"\"hi\"\"\",0.5\r\n",
        )
        .expect("parse");
        assert_eq!(table.header, vec!["TeamId", "TeamName", "Score"]);
        assert_eq!(table.rows[0][1], "Smith, Jones");
        assert_eq!(table.rows[1][1], "say \"hi\"");
        assert_eq!(table.column(&["score"]), Some(2));
        assert_eq!(table.column(&["missing", "teamname"]), Some(1));
    }

    #[test]
    fn rejects_ragged_rows_and_empty_input() {
        assert!(Table::parse("a,b\n1\n").is_err());
        assert!(Table::parse("\n\n").is_err());
        assert!(Table::parse("a\n\"open\n").is_err());
    }
}
