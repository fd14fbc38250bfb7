//! Metric comparison under a fixed optimization direction.

/// True if `candidate` strictly improves on `current`.
///
/// A missing `current` is improved by any comparable score. Equal scores are
/// not an improvement, and NaN never compares as better.
pub fn is_better_score(candidate: f64, current: Option<f64>, higher_is_better: bool) -> bool {
    if candidate.is_nan() {
        return false;
    }
    match current {
        None => true,
        Some(best) if best.is_nan() => true,
        Some(best) if higher_is_better => candidate > best,
        Some(best) => candidate < best,
    }
}
