//! Per-agent concurrency gates across concurrently running tests.

mod common;

use checkpoint_harness::adapters::agents::AgentRegistry;
use checkpoint_harness::{Harness, MockAgent};
use common::{mock_harness, test_config};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_runs_never_exceed_gate_capacity() {
    let harness = Arc::new(mock_harness(MockAgent::new("mock"), 2));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..6 {
        let harness = Arc::clone(&harness);
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        handles.push(tokio::spawn(async move {
            let run = harness.begin("mock").await.unwrap();
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            running.fetch_sub(1, Ordering::SeqCst);
            run.finish(true);
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(running.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_ungated_agent_runs_freely() {
    let registry = AgentRegistry::builder()
        .register(MockAgent::new("free"))
        .build()
        .unwrap();
    let harness = Harness::new(test_config(), registry);

    let a = harness.begin("free").await.unwrap();
    let b = harness.begin("free").await.unwrap();
    a.finish(true);
    b.finish(true);
}

#[tokio::test]
async fn test_dropped_run_releases_slot() {
    let harness = mock_harness(MockAgent::new("mock"), 1);
    {
        let _run = harness.begin("mock").await.unwrap();
    }
    let next = tokio::time::timeout(Duration::from_secs(5), harness.begin("mock"))
        .await
        .expect("slot returned when the run is dropped")
        .unwrap();
    next.finish(true);
}

#[tokio::test]
async fn test_panicking_test_releases_slot() {
    let harness = Arc::new(mock_harness(MockAgent::new("mock"), 1));

    let doomed = Arc::clone(&harness);
    let result = tokio::spawn(async move {
        let _run = doomed.begin("mock").await.unwrap();
        panic!("assertion failed inside test body");
    })
    .await;
    assert!(result.is_err());

    let next = tokio::time::timeout(Duration::from_secs(5), harness.begin("mock"))
        .await
        .expect("slot returned after panic")
        .unwrap();
    next.finish(true);
}

#[tokio::test]
async fn test_shutdown_cancels_gate_wait() {
    let harness = Arc::new(mock_harness(MockAgent::new("mock"), 1));
    let holder = harness.begin("mock").await.unwrap();

    let waiter = {
        let harness = Arc::clone(&harness);
        tokio::spawn(async move { harness.begin("mock").await.map(|run| run.finish(true)) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    harness.shutdown();

    let err = waiter.await.unwrap().unwrap_err();
    assert!(err.is_cancelled());
    holder.finish(true);
}
