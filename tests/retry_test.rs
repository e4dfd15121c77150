//! Single transient retry through the harness.

mod common;

use checkpoint_harness::{with_model, HarnessError, MockAgent, MockResponse};
use common::mock_harness;
use std::sync::Arc;
use std::time::Duration;

fn overloaded() -> MockResponse {
    MockResponse::failure(1, "API Error: 529 overloaded_error")
}

#[tokio::test]
async fn test_transient_then_success() {
    let agent = MockAgent::new("mock")
        .with_transient_markers(["overloaded_error"])
        .respond(overloaded())
        .respond(MockResponse::success("ok"));
    let harness = mock_harness(agent, 1);
    let run = harness.begin("mock").await.unwrap();

    let output = run.run_prompt("add a test", &[with_model("haiku")]).await.unwrap();
    assert_eq!(output.stdout, "ok");
    run.finish(true);
}

#[tokio::test]
async fn test_two_transients_surface_second_failure() {
    let agent = MockAgent::new("mock")
        .with_transient_markers(["overloaded_error"])
        .respond(MockResponse::failure(1, "first overloaded_error"))
        .respond(MockResponse::failure(1, "second overloaded_error"));
    let harness = mock_harness(agent, 1);
    let run = harness.begin("mock").await.unwrap();

    let err = run.run_prompt("add a test", &[]).await.unwrap_err();
    let output = err.process_output().expect("command output attached");
    assert!(output.stderr.contains("second"));
    run.finish(false);
}

#[tokio::test]
async fn test_permanent_failure_not_retried() {
    let agent = Arc::new(
        MockAgent::new("mock")
            .with_transient_markers(["overloaded_error"])
            .respond(MockResponse::failure(2, "invalid model"))
            .respond(MockResponse::success("should not run")),
    );
    let registry = checkpoint_harness::AgentRegistry::builder()
        .register_arc(agent.clone())
        .build()
        .unwrap();
    let harness = checkpoint_harness::Harness::new(common::test_config(), registry);
    let run = harness.begin("mock").await.unwrap();

    let err = run.run_prompt("add a test", &[]).await.unwrap_err();
    assert!(matches!(err, HarnessError::CommandFailed(_)));
    assert_eq!(agent.calls(), 1);
    run.finish(true);
}

#[tokio::test]
async fn test_cancel_during_slow_prompt() {
    let agent = MockAgent::new("mock").respond(MockResponse::success("late").with_delay(Duration::from_secs(30)));
    let harness = mock_harness(agent, 1);
    let run = harness.begin("mock").await.unwrap();

    let token = run.cancel_token().clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });

    let started = std::time::Instant::now();
    let err = run.run_prompt("long task", &[]).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
    run.finish(false);
}
