//! Episode lifecycle through the public environment API.
//!
//! Uses scripted runners and scorers; verifies history ordering, deferred
//! persistence and terminal behavior.

use std::path::Path;
use std::time::Duration;

use dojo::core::types::{BoardType, EpisodeStatus, ExecutionOutcome, TerminalReason};
use dojo::environment::{EnvError, EnvSettings, Environment};
use dojo::io::history_log::load_history;
use dojo::io::leaderboard::LeaderboardResolver;
use dojo::io::scorer::Metric;
use dojo::test_support::{ScriptedRunner, ScriptedScorer, write_leaderboard};

fn settings(dir: &Path, max_steps: u32) -> EnvSettings {
    EnvSettings {
        competition: "titanic".to_string(),
        episode_dir: dir.join("titanic"),
        metric: Metric::Accuracy,
        execution_timeout: Duration::from_secs(30),
        max_steps,
        time_limit: Duration::from_secs(3600),
        target_score: None,
        leaderboard_dir: None,
        rank_board: BoardType::Public,
        overwrite: false,
    }
}

#[test]
fn full_episode_records_every_step_in_order() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut env = Environment::new(
        settings(temp.path(), 3),
        ScriptedRunner::sequence([
            ExecutionOutcome::Success,
            ExecutionOutcome::Timeout,
            ExecutionOutcome::Success,
        ]),
        ScriptedScorer::sequence([0.6, 0.8]),
        LeaderboardResolver::new(),
    );
    env.reset().expect("reset");

    let first = env.step("print(1)").expect("step 0");
    assert_eq!(first.status, EpisodeStatus::Running);
    assert_eq!(first.record.score, Some(0.6));
    let second = env.step("print(2)").expect("step 1");
    assert_eq!(second.record.outcome, ExecutionOutcome::Timeout);
    assert_eq!(second.record.score, None);
    assert_eq!(second.best_score, Some(0.6));
    let third = env.step("print(3)").expect("step 2");
    assert_eq!(third.status, EpisodeStatus::Terminal);
    assert_eq!(third.terminal_reason, Some(TerminalReason::StepLimit));
    assert_eq!(third.best_score, Some(0.8));

    let indices: Vec<u32> = env.history().iter().map(|r| r.step_index).collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(env.summary().total_steps, 3);
    assert_eq!(env.summary().timeouts, 1);

    let err = env.step("print(4)").unwrap_err();
    assert!(matches!(err, EnvError::InvalidState { .. }));
    assert_eq!(env.history().len(), 3);

    let history_path = env.paths().history_path.clone();
    assert!(!history_path.exists());
    env.teardown().expect("teardown");
    env.teardown().expect("second teardown");

    let persisted = load_history(&history_path).expect("load history");
    assert_eq!(persisted, env.history());
    assert_eq!(persisted[2].submitted_code, "print(3)");
    assert_eq!(env.terminal_reason(), Some(TerminalReason::StepLimit));
}

#[test]
fn checkpoint_appends_only_new_records() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut env = Environment::new(
        settings(temp.path(), 10),
        ScriptedRunner::always(ExecutionOutcome::RuntimeError),
        ScriptedScorer::constant(0.0),
        LeaderboardResolver::new(),
    );
    env.reset().expect("reset");
    env.step("raise SystemExit(1)").expect("step 0");
    assert_eq!(env.checkpoint().expect("checkpoint"), 1);
    env.step("raise SystemExit(1)").expect("step 1");
    assert_eq!(env.checkpoint().expect("checkpoint"), 1);
    assert_eq!(env.checkpoint().expect("checkpoint"), 0);

    let persisted = load_history(&env.paths().history_path).expect("load history");
    assert_eq!(persisted.len(), 2);
    assert!(persisted.iter().all(|r| r.score.is_none()));
}

#[test]
fn rank_is_attached_to_scored_steps() {
    let temp = tempfile::tempdir().expect("tempdir");
    let boards = temp.path().join("leaderboards");
    write_leaderboard(&boards, BoardType::Private, &[0.9, 0.7, 0.5]);
    let mut cfg = settings(temp.path(), 10);
    cfg.leaderboard_dir = Some(boards);
    cfg.rank_board = BoardType::Private;

    let mut env = Environment::new(
        cfg,
        ScriptedRunner::always(ExecutionOutcome::Success),
        ScriptedScorer::sequence([0.8, 0.95]),
        LeaderboardResolver::new(),
    );
    env.reset().expect("reset");
    assert_eq!(env.step("a").expect("step").record.leaderboard_rank, Some(2));
    assert_eq!(env.step("b").expect("step").record.leaderboard_rank, Some(1));
    assert_eq!(env.resolver().load_count(), 1);
}

#[test]
fn lower_is_better_metric_tracks_minimum() {
    let temp = tempfile::tempdir().expect("tempdir");
    let mut cfg = settings(temp.path(), 10);
    cfg.metric = Metric::Rmse;
    cfg.target_score = Some(0.1);
    let mut env = Environment::new(
        cfg,
        ScriptedRunner::always(ExecutionOutcome::Success),
        ScriptedScorer::sequence([0.4, 0.6, 0.05]).lower_is_better(),
        LeaderboardResolver::new(),
    );
    env.reset().expect("reset");
    env.step("a").expect("step");
    assert_eq!(env.step("b").expect("step").best_score, Some(0.4));
    let last = env.step("c").expect("step");
    assert_eq!(last.best_score, Some(0.05));
    assert_eq!(last.terminal_reason, Some(TerminalReason::TargetReached));
}

fn two_step_episode(settings: EnvSettings) -> Result<Vec<u32>, EnvError> {
    let mut env = Environment::new(
        settings,
        ScriptedRunner::always(ExecutionOutcome::Success),
        ScriptedScorer::constant(0.5),
        LeaderboardResolver::new(),
    );
    env.reset()?;
    env.step("a")?;
    env.step("b")?;
    env.teardown()?;
    let history = load_history(&env.paths().history_path)?;
    Ok(history.iter().map(|r| r.step_index).collect())
}

#[test]
fn second_episode_in_same_dir_needs_overwrite() {
    let temp = tempfile::tempdir().expect("tempdir");
    assert_eq!(
        two_step_episode(settings(temp.path(), 10)).expect("first episode"),
        vec![0, 1]
    );

    let err = two_step_episode(settings(temp.path(), 10)).unwrap_err();
    assert!(matches!(err, EnvError::EpisodeExists { .. }));

    let mut replace = settings(temp.path(), 10);
    replace.overwrite = true;
    assert_eq!(
        two_step_episode(replace).expect("replacing episode"),
        vec![0, 1]
    );
}
