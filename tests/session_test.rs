//! Interactive sessions through the dialog automaton.

mod common;

use checkpoint_harness::services::DialogPlan;
use checkpoint_harness::{HarnessError, MockAgent};
use common::mock_harness;
use std::time::Duration;

#[tokio::test]
async fn test_trust_dialog_dismissed_before_prompt() {
    let agent = MockAgent::new("mock").with_session([
        "Trust this folder? (y/n)",
        "mock>",
        "created hello.txt\nmock>",
    ]);
    let harness = mock_harness(agent, 1);
    let run = harness.begin("mock").await.unwrap();

    let session = run
        .start_session()
        .await
        .unwrap()
        .into_session()
        .expect("mock supports sessions");
    session.send("create hello.txt").await.unwrap();
    let pane = session.wait_for("created hello\\.txt", run.session_wait()).await.unwrap();
    assert!(pane.ends_with("mock>"));

    session.close().await.unwrap();
    session.close().await.unwrap();
    run.finish(true);
}

#[tokio::test]
async fn test_batch_only_agent_skips_session() {
    let harness = mock_harness(MockAgent::new("mock"), 1);
    let run = harness.begin("mock").await.unwrap();
    let start = run.start_session().await.unwrap();
    assert!(!start.is_supported());
    run.finish(true);
}

#[tokio::test]
async fn test_dialog_that_never_clears_fails_with_pane() {
    let plan = DialogPlan {
        max_iterations: 3,
        wait_timeout: Duration::from_millis(20),
        settle: Duration::from_millis(1),
        ..DialogPlan::new("mock>")
    };
    let agent = MockAgent::new("mock")
        .with_dialog(plan)
        .with_session(["Loading...".to_string()]);
    let harness = mock_harness(agent, 1);
    let run = harness.begin("mock").await.unwrap();

    let err = run.start_session().await.unwrap_err();
    assert!(matches!(err, HarnessError::Setup(_)));
    assert!(err.to_string().contains("Loading..."));
    run.finish(true);
}

#[tokio::test]
async fn test_wait_reports_last_pane_on_timeout() {
    let agent = MockAgent::new("mock").with_session(["mock>"]);
    let harness = mock_harness(agent, 1);
    let run = harness.begin("mock").await.unwrap();
    let session = run.start_session().await.unwrap().into_session().unwrap();

    let err = session
        .wait_for("never printed", Duration::from_millis(20))
        .await
        .unwrap_err();
    match err {
        HarnessError::PatternTimeout { pane, .. } => assert_eq!(pane, "mock>"),
        other => panic!("expected PatternTimeout, got {other:?}"),
    }
    session.close().await.unwrap();
    run.finish(true);
}
