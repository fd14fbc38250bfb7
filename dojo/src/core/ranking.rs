//! Standard competition ranking ("1224") over a sorted score distribution.

/// Rank of `score` among `ascending` (scores sorted low to high).
///
/// `rank = 1 + #{entries strictly better than score}`. Tied entries share a
/// rank and do not push the queried score down.
pub fn competition_rank(ascending: &[f64], score: f64, higher_is_better: bool) -> u32 {
    let strictly_better = if higher_is_better {
        let not_greater = ascending.partition_point(|&entry| entry <= score);
        ascending.len() - not_greater
    } else {
        ascending.partition_point(|&entry| entry < score)
    };
    1 + strictly_better as u32
}
