//! Competition task context shown to the code generator.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

const DESCRIPTION_FILE: &str = "description.txt";
const MAX_LISTED_FILES: usize = 50;
const PREVIEW_LINES: usize = 3;
const PREVIEW_LINE_BYTES: usize = 300;

/// Task description plus a listing of the public data files.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskContext {
    pub competition: String,
    pub description: String,
    pub public_dir: PathBuf,
    /// Markdown listing of public files with sizes and CSV previews.
    pub data_overview: String,
}

impl TaskContext {
    /// Read `<data_dir>/public/description.txt` and list `<data_dir>/public`.
    pub fn load(competition: &str, data_dir: &Path) -> Result<Self> {
        let public_dir = data_dir.join("public");
        let desc_path = public_dir.join(DESCRIPTION_FILE);
        let description = if desc_path.is_file() {
            fs::read_to_string(&desc_path)
                .with_context(|| format!("read {}", desc_path.display()))?
        } else {
            warn!(path = %desc_path.display(), "task description missing");
            format!("Competition `{competition}`. No description was provided.")
        };
        let data_overview = if public_dir.is_dir() {
            describe_dir(&public_dir)?
        } else {
            warn!(path = %public_dir.display(), "public data directory missing");
            String::from("(no public data directory)")
        };
        debug!(competition, bytes = description.len(), "task context loaded");
        Ok(Self {
            competition: competition.to_string(),
            description,
            public_dir,
            data_overview,
        })
    }
}

fn describe_dir(dir: &Path) -> Result<String> {
    let mut files = Vec::new();
    collect_files(dir, dir, &mut files)?;
    files.sort();

    let mut out = String::new();
    for rel in files.iter().take(MAX_LISTED_FILES) {
        let path = dir.join(rel);
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        out.push_str(&format!("- `{}` ({})\n", rel.display(), human_size(size)));
        if rel.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("csv")) {
            for line in preview(&path)? {
                out.push_str(&format!("    {line}\n"));
            }
        }
    }
    if files.len() > MAX_LISTED_FILES {
        out.push_str(&format!(
            "- ... {} more files\n",
            files.len() - MAX_LISTED_FILES
        ));
    }
    Ok(out)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read dir {}", dir.display()))? {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else if path.file_name().is_some_and(|name| name != DESCRIPTION_FILE)
            && let Ok(rel) = path.strip_prefix(root)
        {
            out.push(rel.to_path_buf());
        }
    }
    Ok(())
}

fn preview(path: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(path).with_context(|| format!("open {}", path.display()))?;
    let mut lines = Vec::new();
    for line in BufReader::new(file).lines().take(PREVIEW_LINES) {
        let Ok(mut line) = line else {
            break;
        };
        if line.len() > PREVIEW_LINE_BYTES {
            let mut cut = PREVIEW_LINE_BYTES;
            while !line.is_char_boundary(cut) {
                cut -= 1;
            }
            line.truncate(cut);
            line.push_str("...");
        }
        lines.push(line);
    }
    Ok(lines)
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
