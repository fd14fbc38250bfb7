//! Competition episode engine and tree-search solution agent.
//!
//! An [`environment::Environment`] runs candidate solution scripts against a
//! competition dataset, scores their submissions and keeps the episode
//! history. A [`search::SearchController`] drives that environment, growing a
//! journal of attempts by drafting, debugging and improving code.
//!
//! - **[`core`]**: Pure, deterministic logic (types, ranking, history
//!   summaries, the journal and the action policy). No I/O.
//! - **[`io`]**: Side-effecting operations (config, filesystem, child
//!   processes, scoring, prompts, code generation).
//!
//! [`episode`] wires both together for the `dojo run` command.

pub mod core;
pub mod environment;
pub mod episode;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod search;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
