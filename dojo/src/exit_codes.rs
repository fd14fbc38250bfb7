//! Stable exit codes for dojo CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Invalid config, missing paths, persistence failures or other errors.
pub const INVALID: i32 = 1;
/// `dojo run` gave up after every generation attempt for a step failed.
pub const ABORTED: i32 = 2;
