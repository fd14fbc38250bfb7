//! Side-effecting collaborators: config, processes, files and external tools.

pub mod config;
pub mod generator;
pub mod history_log;
pub mod journal_store;
pub mod leaderboard;
pub mod paths;
pub mod process;
pub mod prompt;
pub mod sandbox;
pub mod scorer;
pub mod table;
pub mod task;
