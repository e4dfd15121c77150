//! Common test utilities for integration tests
//!
//! Provides a fast harness configuration, a mock-backed harness, and a
//! stand-in for the checkpoint engine that writes to the checkpoint ref
//! the way the real engine does: without touching the working tree.

#![allow(dead_code)]

use checkpoint_harness::adapters::agents::{AgentRegistry, MockAgent};
use checkpoint_harness::domain::models::checkpoint::{checkpoint_metadata_path, session_metadata_path};
use checkpoint_harness::{Harness, HarnessConfig};
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;

/// Setup test logging
///
/// Call this at the beginning of tests that need logging.
pub fn setup_test_logging() {
    checkpoint_harness::infrastructure::logging::init_test_logging();
}

/// Configuration with short timeouts suited to in-process fakes.
pub fn test_config() -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.timeouts.test_secs = 30;
    config.timeouts.convergence_secs = 5;
    config.timeouts.poll_interval_ms = 25;
    config.timeouts.retry_delay_ms = 10;
    config
}

/// Harness whose only agent is `agent`, gated to `capacity` slots.
pub fn mock_harness(agent: MockAgent, capacity: usize) -> Harness {
    let name = agent_name(&agent);
    let registry = AgentRegistry::builder()
        .register(agent)
        .with_gate(name, capacity)
        .build()
        .expect("registry builds");
    Harness::new(test_config(), registry)
}

fn agent_name(agent: &MockAgent) -> String {
    use checkpoint_harness::Agent;
    agent.name().to_string()
}

async fn git(repo: &Path, args: &[&str], index: Option<&Path>) -> String {
    let mut command = Command::new("git");
    command.arg("-C").arg(repo).args(args);
    if let Some(index) = index {
        command.env("GIT_INDEX_FILE", index);
    }
    let output = command.output().await.expect("git runs");
    assert!(
        output.status.success(),
        "git {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Summary document for `checkpoint_id` touching `files`.
pub fn summary_json(checkpoint_id: &str, files: &[&str]) -> String {
    json!({
        "version": 1,
        "checkpoint_id": checkpoint_id,
        "strategy": "manual-commit",
        "checkpoints_count": 1,
        "files_touched": files,
        "sessions": [{ "metadata": "0/metadata.json", "transcript": "0/full.jsonl" }],
        "token_usage": { "input_tokens": 120, "output_tokens": 30, "api_call_count": 1 }
    })
    .to_string()
}

/// Session metadata document recorded by `agent`.
pub fn session_json(checkpoint_id: &str, agent: &str) -> String {
    json!({
        "version": 1,
        "checkpoint_id": checkpoint_id,
        "session_id": format!("session-{checkpoint_id}"),
        "strategy": "manual-commit",
        "created_at": "2026-01-05T10:00:00Z",
        "agent": agent,
        "files_touched": ["hello.txt"],
    })
    .to_string()
}

/// Append a checkpoint to `ref_name` using a private index, leaving HEAD and
/// the working tree alone. Returns the new ref value.
pub async fn record_checkpoint(repo: &Path, ref_name: &str, checkpoint_id: &str, agent: &str) -> String {
    let scratch = tempfile::tempdir().expect("scratch dir");
    let index = scratch.path().join("index");

    let parent = Command::new("git")
        .arg("-C")
        .arg(repo)
        .args(["rev-parse", "--verify", "--quiet", ref_name])
        .output()
        .await
        .expect("git runs");
    let parent = parent
        .status
        .success()
        .then(|| String::from_utf8_lossy(&parent.stdout).trim().to_string());
    if let Some(parent) = &parent {
        git(repo, &["read-tree", parent], Some(&index)).await;
    }

    let documents = [
        (
            checkpoint_metadata_path(checkpoint_id).expect("valid id"),
            summary_json(checkpoint_id, &["hello.txt"]),
        ),
        (
            session_metadata_path(checkpoint_id, 0).expect("valid id"),
            session_json(checkpoint_id, agent),
        ),
    ];
    for (path, contents) in documents {
        let blob_file = scratch.path().join("blob");
        tokio::fs::write(&blob_file, contents).await.expect("write blob");
        let blob = git(repo, &["hash-object", "-w", blob_file.to_str().expect("utf-8 path")], None).await;
        let cacheinfo = format!("100644,{blob},{path}");
        git(repo, &["update-index", "--add", "--cacheinfo", &cacheinfo], Some(&index)).await;
    }

    let tree = git(repo, &["write-tree"], Some(&index)).await;
    let message = format!("Checkpoint: {checkpoint_id}");
    let mut args = vec!["commit-tree", tree.as_str(), "-m", message.as_str()];
    if let Some(parent) = &parent {
        args.extend(["-p", parent.as_str()]);
    }
    let commit = git(repo, &args, None).await;
    git(repo, &["update-ref", ref_name, &commit], None).await;
    commit
}

/// Write a session-state file the way the engine tracks live sessions.
pub async fn write_session_state(repo: &Path, state_dir: &str, session_id: &str, phase: &str) {
    let git_dir = git(repo, &["rev-parse", "--absolute-git-dir"], None).await;
    let dir = Path::new(&git_dir).join(state_dir);
    tokio::fs::create_dir_all(&dir).await.expect("state dir");
    let state = json!({ "session_id": session_id, "phase": phase }).to_string();
    tokio::fs::write(dir.join(format!("{session_id}.json")), state)
        .await
        .expect("write state");
}

/// Create or delete a branch without switching to it.
pub async fn set_branch(repo: &Path, branch: &str, present: bool) {
    if present {
        git(repo, &["branch", branch], None).await;
    } else {
        git(repo, &["branch", "-D", branch], None).await;
    }
}

/// Run `work` after `delay` on a background task.
pub fn after<F>(delay: Duration, work: F) -> tokio::task::JoinHandle<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        work.await
    })
}
