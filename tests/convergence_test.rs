//! Convergence against a real git repository with a simulated checkpoint engine.

mod common;

use checkpoint_harness::{HarnessError, MockAgent, MockResponse};
use common::{after, mock_harness, record_checkpoint, set_branch, setup_test_logging, write_session_state};
use std::time::Duration;

const REF: &str = "refs/heads/entire/checkpoints/v1";

#[tokio::test]
async fn test_prompt_then_checkpoint_converges() {
    setup_test_logging();
    let agent = MockAgent::new("mock").respond(
        MockResponse::success("created hello.txt")
            .with_effect(|dir| std::fs::write(dir.join("hello.txt"), "hi\n")),
    );
    let harness = mock_harness(agent, 1);
    let run = harness.begin("mock").await.unwrap();
    assert_eq!(run.repo().start_checkpoint(), None);

    run.run_prompt("create hello.txt containing hi", &[]).await.unwrap();
    run.wait_for_file("hello.txt").await.unwrap();

    let repo = run.path().to_path_buf();
    let engine = after(Duration::from_millis(200), async move {
        record_checkpoint(&repo, REF, "a1b2c3d4e5f6", "mock").await
    });

    let observed = run.wait_for_new_checkpoint().await.unwrap();
    assert_eq!(observed, engine.await.unwrap());

    let reader = run.checkpoints();
    assert_eq!(reader.list().await.unwrap(), vec!["a1b2c3d4e5f6"]);
    let summary = reader.summary("a1b2c3d4e5f6").await.unwrap();
    assert_eq!(summary.files_touched, vec!["hello.txt"]);
    let sessions = reader.sessions("a1b2c3d4e5f6").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].agent.as_deref(), Some("mock"));

    assert!(run.finish(true).is_none());
}

#[tokio::test]
async fn test_second_checkpoint_measured_from_first() {
    let harness = mock_harness(MockAgent::new("mock"), 1);
    let run = harness.begin("mock").await.unwrap();

    let first = record_checkpoint(run.path(), REF, "0a0b0c0d0e0f", "mock").await;
    assert_eq!(run.wait_for_new_checkpoint().await.unwrap(), first);

    let repo = run.path().to_path_buf();
    let engine = after(Duration::from_millis(150), async move {
        record_checkpoint(&repo, REF, "1a1b1c1d1e1f", "mock").await
    });
    let second = run
        .wait_for_checkpoint_advance(Some(&first), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(second, engine.await.unwrap());
    assert_eq!(
        run.checkpoints().list().await.unwrap(),
        vec!["0a0b0c0d0e0f", "1a1b1c1d1e1f"]
    );
    run.finish(true);
}

#[tokio::test]
async fn test_missing_checkpoint_times_out_with_context() {
    let harness = mock_harness(MockAgent::new("mock"), 1);
    let run = harness.begin("mock").await.unwrap();

    let err = run
        .wait_for_checkpoint_advance(None, Duration::from_millis(200))
        .await
        .unwrap_err();
    match &err {
        HarnessError::ConvergenceTimeout { target, timeout, .. } => {
            assert!(target.contains(REF), "target names the ref: {target}");
            assert_eq!(*timeout, Duration::from_millis(200));
        }
        other => panic!("expected ConvergenceTimeout, got {other:?}"),
    }
    assert!(err.is_timeout());
    run.finish(true);
}

#[tokio::test]
async fn test_sessions_go_idle() {
    let harness = mock_harness(MockAgent::new("mock"), 1);
    let run = harness.begin("mock").await.unwrap();
    let state_dir = run.repo().checkpoint_config().session_state_dir.clone();

    write_session_state(run.path(), &state_dir, "s1", "active").await;
    let repo = run.path().to_path_buf();
    let ender = after(Duration::from_millis(150), async move {
        write_session_state(&repo, &state_dir, "s1", "ended").await;
    });

    run.wait_for_sessions_idle().await.unwrap();
    ender.await.unwrap();
    run.finish(true);
}

#[tokio::test]
async fn test_shadow_branches_cleared() {
    let harness = mock_harness(MockAgent::new("mock"), 1);
    let run = harness.begin("mock").await.unwrap();

    set_branch(run.path(), "entire/3f2a1b0", true).await;
    assert_eq!(run.repo().shadow_branches().await.unwrap().len(), 1);

    let repo = run.path().to_path_buf();
    let cleaner = after(Duration::from_millis(150), async move {
        set_branch(&repo, "entire/3f2a1b0", false).await;
    });

    run.wait_for_shadow_branches_cleared().await.unwrap();
    cleaner.await.unwrap();
    run.finish(true);
}
