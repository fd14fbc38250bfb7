//! Wall-clock budget helpers for the episode clock.

use std::time::{Duration, Instant};

/// Time left until `deadline`, saturating at zero.
pub fn remaining_budget(deadline: Instant, now: Instant) -> Duration {
    deadline
        .checked_duration_since(now)
        .unwrap_or(Duration::from_secs(0))
}

/// Per-execution timeout: the configured timeout, capped by what is left of
/// the episode. Never returns zero so a child always gets a chance to start.
pub fn execution_timeout(configured: Duration, deadline: Instant, now: Instant) -> Duration {
    configured
        .min(remaining_budget(deadline, now))
        .max(Duration::from_millis(1))
}
