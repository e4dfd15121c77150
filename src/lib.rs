//! Checkpoint Harness - agent orchestration for end-to-end checkpoint tests
//!
//! Drives AI coding agents (Claude Code, Gemini CLI, OpenCode) against
//! throwaway git repositories and waits for the background checkpoint
//! engine to converge on the expected repository state.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): errors, data contracts and the `Agent`/`Session` ports
//! - **Adapters** (`adapters`): concrete agents and the agent registry
//! - **Infrastructure Layer** (`infrastructure`): processes, tmux, config, logging
//! - **Service Layer** (`services`): gates, dialogs, retry, convergence, repo state
//! - **Application Layer** (`application`): `Harness` and per-test `TestRun`
//!
//! # Example
//!
//! ```ignore
//! use checkpoint_harness::Harness;
//!
//! #[tokio::test]
//! async fn prompt_creates_checkpoint() -> anyhow::Result<()> {
//!     let harness = Harness::from_env()?;
//!     let _logger = harness.init_logging();
//!     for agent in harness.agent_names() {
//!         let run = harness.begin(agent).await?;
//!         run.run_prompt("create hello.txt containing hi", &[]).await?;
//!         run.wait_for_new_checkpoint().await?;
//!         run.finish(true);
//!     }
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use adapters::agents::{AgentRegistry, MockAgent, MockResponse};
pub use application::{Harness, TestRun};
pub use domain::models::{
    with_env, with_extra_args, with_model, with_permission_mode, with_timeout, CheckpointSummary,
    HarnessConfig, ProcessOutput, RunOption, SessionMetadata,
};
pub use domain::ports::{Agent, Session, SessionStart};
pub use domain::{HarnessError, HarnessResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{poll_until, poll_until_changed, RepoState};
