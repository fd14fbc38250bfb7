//! Deterministic, pure logic shared by the episode engine.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod budget;
pub mod history;
pub mod journal;
pub mod policy;
pub mod ranking;
pub mod score;
pub mod types;
