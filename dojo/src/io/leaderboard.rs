//! Cached leaderboard loading and rank resolution.
//!
//! Each `(directory, board)` pair is parsed at most once per resolver; later
//! queries reuse the sorted in-memory board, or the recorded failure when the
//! board was missing or corrupt. The cache lives on the resolver
//! instance, so independent resolvers never share state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use crate::core::ranking::competition_rank;
use crate::core::types::BoardType;
use crate::io::table::Table;

const SCORE_COLUMNS: &[&str] = &["score", "publicscore", "privatescore"];
const IDENTIFIER_COLUMNS: &[&str] = &["teamname", "teamid", "team", "id", "name"];

/// Leaderboard missing or unreadable. Callers treat the rank as absent.
#[derive(Debug, Clone, Error)]
#[error("leaderboard {path} unavailable: {reason}")]
pub struct ResolverUnavailableError {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardEntry {
    pub score: f64,
    pub identifier: String,
}

/// Entries of one board, sorted ascending by score.
#[derive(Debug, Clone, PartialEq)]
pub struct Leaderboard {
    entries: Vec<LeaderboardEntry>,
    scores: Vec<f64>,
}

impl Leaderboard {
    pub fn new(mut entries: Vec<LeaderboardEntry>) -> Self {
        entries.sort_by(|a, b| a.score.total_cmp(&b.score));
        let scores = entries.iter().map(|e| e.score).collect();
        Self { entries, scores }
    }

    pub fn entries(&self) -> &[LeaderboardEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn rank(&self, score: f64, higher_is_better: bool) -> u32 {
        competition_rank(&self.scores, score, higher_is_better)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BoardKey {
    dir: PathBuf,
    board: BoardType,
}

#[derive(Debug, Default)]
pub struct LeaderboardResolver {
    cache: HashMap<BoardKey, Result<Arc<Leaderboard>, ResolverUnavailableError>>,
    loads: usize,
}

impl LeaderboardResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or fetch from cache) the `board` leaderboard under `dir`.
    pub fn load(
        &mut self,
        dir: &Path,
        board: BoardType,
    ) -> Result<Arc<Leaderboard>, ResolverUnavailableError> {
        let key = BoardKey {
            dir: dir.to_path_buf(),
            board,
        };
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }

        let path = dir.join(board.file_name());
        self.loads += 1;
        let loaded = parse_leaderboard(&path).map(Arc::new);
        match &loaded {
            Ok(leaderboard) => debug!(
                path = %path.display(),
                entries = leaderboard.len(),
                "leaderboard loaded"
            ),
            Err(err) => warn!(err = %err, "leaderboard unavailable, ranks will be absent"),
        }
        self.cache.insert(key, loaded.clone());
        loaded
    }

    /// Standard competition rank of `score` on the given board.
    pub fn rank(
        &mut self,
        score: f64,
        dir: &Path,
        board: BoardType,
        higher_is_better: bool,
    ) -> Result<u32, ResolverUnavailableError> {
        let leaderboard = self.load(dir, board)?;
        Ok(leaderboard.rank(score, higher_is_better))
    }

    /// Number of board files parsed so far (cache misses).
    pub fn load_count(&self) -> usize {
        self.loads
    }
}

fn parse_leaderboard(path: &Path) -> Result<Leaderboard, ResolverUnavailableError> {
    let unavailable = |reason: String| ResolverUnavailableError {
        path: path.to_path_buf(),
        reason,
    };
    if !path.is_file() {
        warn!(path = %path.display(), "leaderboard file missing");
        return Err(unavailable("file not found".to_string()));
    }
    let table = Table::read(path).map_err(|err| unavailable(format!("{err:#}")))?;
    let score_idx = table
        .column(SCORE_COLUMNS)
        .ok_or_else(|| unavailable("no score column".to_string()))?;
    let id_idx = table
        .column(IDENTIFIER_COLUMNS)
        .ok_or_else(|| unavailable("no identifier column".to_string()))?;

    let mut entries = Vec::with_capacity(table.rows.len());
    for (row_idx, row) in table.rows.iter().enumerate() {
        let raw = row[score_idx].trim();
        let score: f64 = raw
            .parse()
            .map_err(|_| unavailable(format!("row {}: bad score '{raw}'", row_idx + 1)))?;
        if score.is_nan() {
            return Err(unavailable(format!("row {}: score is NaN", row_idx + 1)));
        }
        entries.push(LeaderboardEntry {
            score,
            identifier: row[id_idx].trim().to_string(),
        });
    }
    if entries.is_empty() {
        return Err(unavailable("no entries".to_string()));
    }
    Ok(Leaderboard::new(entries))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_board(dir: &Path, board: BoardType, body: &str) {
        fs::write(dir.join(board.file_name()), body).expect("write board");
    }

    const BOARD: &str = "TeamName,Score\nalpha,10\nbeta,20\ngamma,20\ndelta,30\n";

    // Lower-is-better also gives 2: only 10 is strictly better than 20
    // (standard competition ranking, see DESIGN.md "Rank example conflict").
    #[test]
    fn ranks_with_ties_in_both_directions() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_board(temp.path(), BoardType::Public, BOARD);
        let mut resolver = LeaderboardResolver::new();

        let up = resolver
            .rank(20.0, temp.path(), BoardType::Public, true)
            .expect("rank");
        let down = resolver
            .rank(20.0, temp.path(), BoardType::Public, false)
            .expect("rank");
        assert_eq!(up, 2);
        assert_eq!(down, 2);
        assert_eq!(
            resolver
                .rank(15.0, temp.path(), BoardType::Public, false)
                .expect("rank"),
            2
        );
    }

    #[test]
    fn repeated_queries_parse_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_board(temp.path(), BoardType::Public, BOARD);
        let mut resolver = LeaderboardResolver::new();

        resolver
            .rank(12.0, temp.path(), BoardType::Public, true)
            .expect("first");
        // Removing the file proves the second query never touches disk.
        fs::remove_file(temp.path().join(BoardType::Public.file_name())).expect("remove");
        resolver
            .rank(25.0, temp.path(), BoardType::Public, true)
            .expect("second");

        assert_eq!(resolver.load_count(), 1);
    }

    #[test]
    fn missing_board_is_not_reloaded() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut resolver = LeaderboardResolver::new();

        for _ in 0..3 {
            assert!(
                resolver
                    .rank(0.5, temp.path(), BoardType::Public, true)
                    .is_err()
            );
        }
        // Appearing later does not matter: the failure is cached.
        write_board(temp.path(), BoardType::Public, BOARD);
        assert!(
            resolver
                .rank(0.5, temp.path(), BoardType::Public, true)
                .is_err()
        );
        assert_eq!(resolver.load_count(), 1);
    }

    #[test]
    fn boards_are_cached_independently() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_board(temp.path(), BoardType::Public, BOARD);
        write_board(temp.path(), BoardType::Private, "teamId,score\n7,0.5\n");
        let mut resolver = LeaderboardResolver::new();

        let public = resolver.load(temp.path(), BoardType::Public).expect("public");
        let private = resolver
            .load(temp.path(), BoardType::Private)
            .expect("private");
        assert_eq!(public.len(), 4);
        assert_eq!(private.entries()[0].identifier, "7");
        assert_eq!(resolver.load_count(), 2);

        let other = LeaderboardResolver::new();
        assert_eq!(other.load_count(), 0);
    }

    #[test]
    fn missing_or_corrupt_boards_are_unavailable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut resolver = LeaderboardResolver::new();
        let err = resolver
            .rank(1.0, temp.path(), BoardType::Public, true)
            .unwrap_err();
        assert!(err.to_string().contains("file not found"));

        write_board(temp.path(), BoardType::Private, "TeamName,Score\nx,not-a-number\n");
        assert!(
            resolver
                .rank(1.0, temp.path(), BoardType::Private, true)
                .is_err()
        );

        let other = tempfile::tempdir().expect("tempdir");
        write_board(other.path(), BoardType::Public, "TeamName,Points\nx,1\n");
        let err = resolver
            .load(other.path(), BoardType::Public)
            .unwrap_err();
        assert!(err.reason.contains("score column"));
    }
}
