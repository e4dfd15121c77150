//! Composition root used by test cases.
//!
//! A [`Harness`] owns the agent registry and configuration for the whole
//! test process. Each test calls [`Harness::begin`] to obtain a [`TestRun`],
//! which bundles a gate slot, a deadline token and a fresh repository.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::agents::AgentRegistry;
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{HarnessConfig, ProcessOutput, RunOption};
use crate::domain::ports::{Agent, SessionStart};
use crate::infrastructure::config::ConfigLoader;
use crate::infrastructure::logging::{LogConfig, LoggerImpl};
use crate::services::{CheckpointReader, RepoState, RetryPolicy, SlotPermit};

/// Shared entry point for every test in a process.
pub struct Harness {
    config: Arc<HarnessConfig>,
    registry: Arc<AgentRegistry>,
    root: CancellationToken,
}

impl Harness {
    pub fn new(config: HarnessConfig, registry: AgentRegistry) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(registry),
            root: CancellationToken::new(),
        }
    }

    /// Register the built-in agents and gates from `config`.
    pub fn from_config(config: HarnessConfig) -> HarnessResult<Self> {
        let registry = AgentRegistry::from_config(&config)?;
        Ok(Self::new(config, registry))
    }

    /// Load `.e2e/` files and `E2E_*` variables, then build as [`Self::from_config`].
    pub fn from_env() -> HarnessResult<Self> {
        let config = ConfigLoader::load().map_err(|e| HarnessError::setup(format!("{e:#}")))?;
        Self::from_config(config)
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Install the global subscriber described by the `logging` section.
    ///
    /// Keep the returned logger alive for the test process; dropping it
    /// flushes the log file. Fails if a subscriber is already installed.
    pub fn init_logging(&self) -> HarnessResult<LoggerImpl> {
        LoggerImpl::init(&LogConfig::from(&self.config.logging))
            .map_err(|e| HarnessError::setup(format!("logging: {e:#}")))
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Names of the agents tests should iterate over.
    pub fn agent_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Cancel every run started from this harness.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    /// Prepare one test against `agent`.
    ///
    /// Bootstraps the agent, arms the scaled test deadline, waits for a gate
    /// slot and creates the repository. The deadline covers the gate wait.
    #[instrument(skip(self))]
    pub async fn begin(&self, agent: &str) -> HarnessResult<TestRun> {
        let agent = self.registry.get(agent)?;
        agent.bootstrap().await?;

        let id = Uuid::new_v4();
        let budget = agent.scaled(self.config.timeouts.test());
        let deadline = self.root.child_token();
        let timer = DeadlineTimer::arm(deadline.clone(), budget, agent.name().to_string());

        let permit = self.registry.gate().acquire(agent.name(), &deadline).await?;
        let repo = tokio::select! {
            biased;
            () = deadline.cancelled() => {
                return Err(HarnessError::Cancelled(format!(
                    "test deadline expired while creating repository for {}",
                    agent.name()
                )));
            }
            repo = RepoState::create(&self.config) => repo?,
        };

        info!(
            run_id = %id,
            agent = agent.name(),
            repo = %repo.path().display(),
            deadline = ?budget,
            gated = permit.is_gated(),
            "test run started"
        );

        Ok(TestRun {
            id,
            agent,
            repo,
            permit,
            deadline,
            _timer: timer,
            retry: RetryPolicy::new(self.config.timeouts.retry_delay()),
            convergence: self.config.timeouts.convergence(),
            session_wait: self.config.timeouts.session_wait(),
            started: Instant::now(),
        })
    }
}

/// Cancels the deadline token once the budget elapses. Aborted on drop.
struct DeadlineTimer(JoinHandle<()>);

impl DeadlineTimer {
    fn arm(token: CancellationToken, budget: Duration, agent: String) -> Self {
        Self(tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(budget) => {
                    warn!(agent = %agent, deadline = ?budget, "test deadline expired");
                    token.cancel();
                }
            }
        }))
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// One test's resources. Dropping it releases the gate slot and removes
/// the repository; call [`TestRun::finish`] to apply the preservation policy.
pub struct TestRun {
    id: Uuid,
    agent: Arc<dyn Agent>,
    repo: RepoState,
    permit: SlotPermit,
    deadline: CancellationToken,
    _timer: DeadlineTimer,
    retry: RetryPolicy,
    convergence: Duration,
    session_wait: Duration,
    started: Instant,
}

impl TestRun {
    pub const fn id(&self) -> Uuid {
        self.id
    }

    pub fn agent(&self) -> &dyn Agent {
        self.agent.as_ref()
    }

    pub const fn repo(&self) -> &RepoState {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        self.repo.path()
    }

    /// Token cancelled when the test deadline expires or the harness shuts down.
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_cancelled()
    }

    /// Scale `timeout` by the agent's multiplier.
    pub fn scaled(&self, timeout: Duration) -> Duration {
        self.agent.scaled(timeout)
    }

    /// Scaled default for `Session::wait_for` calls.
    pub fn session_wait(&self) -> Duration {
        self.scaled(self.session_wait)
    }

    /// Scaled default convergence timeout.
    pub fn convergence_timeout(&self) -> Duration {
        self.scaled(self.convergence)
    }

    pub fn checkpoints(&self) -> CheckpointReader<'_> {
        self.repo.checkpoints()
    }

    /// Run `prompt` in batch mode inside the repository, retrying once on
    /// a transient failure.
    pub async fn run_prompt(&self, prompt: &str, options: &[RunOption]) -> HarnessResult<ProcessOutput> {
        self.retry
            .run_batch(self.agent.as_ref(), self.repo.path(), prompt, options, &self.deadline)
            .await
    }

    /// Start an interactive session in the repository. Returns
    /// [`SessionStart::Unsupported`] for batch-only agents.
    pub async fn start_session(&self) -> HarnessResult<SessionStart> {
        self.within_deadline("starting session", self.agent.start_session(self.repo.path()))
            .await
    }

    /// Wait for the checkpoint ref to move past its value at repo creation.
    pub async fn wait_for_new_checkpoint(&self) -> HarnessResult<String> {
        let timeout = self.convergence_timeout();
        self.within_deadline("waiting for checkpoint", self.repo.wait_for_new_checkpoint(timeout))
            .await
    }

    /// Wait for the checkpoint ref to move past `from`. `timeout` is scaled.
    pub async fn wait_for_checkpoint_advance(&self, from: Option<&str>, timeout: Duration) -> HarnessResult<String> {
        let timeout = self.scaled(timeout);
        self.within_deadline(
            "waiting for checkpoint",
            self.repo.wait_for_checkpoint_advance(from, timeout),
        )
        .await
    }

    pub async fn wait_for_file(&self, relative: &str) -> HarnessResult<PathBuf> {
        let timeout = self.convergence_timeout();
        self.within_deadline("waiting for file", self.repo.wait_for_file(relative, timeout))
            .await
    }

    pub async fn wait_for_sessions_idle(&self) -> HarnessResult<()> {
        let timeout = self.convergence_timeout();
        self.within_deadline("waiting for idle sessions", self.repo.wait_for_sessions_idle(timeout))
            .await
    }

    pub async fn wait_for_shadow_branches_cleared(&self) -> HarnessResult<()> {
        let timeout = self.convergence_timeout();
        self.within_deadline(
            "waiting for shadow branches",
            self.repo.wait_for_shadow_branches_cleared(timeout),
        )
        .await
    }

    /// Release the gate slot and apply the repository preservation policy.
    /// Returns the preserved path, if any.
    pub fn finish(self, passed: bool) -> Option<PathBuf> {
        let Self {
            id,
            agent,
            repo,
            permit,
            started,
            ..
        } = self;
        permit.release();
        let kept = repo.finish(passed);
        info!(
            run_id = %id,
            agent = agent.name(),
            passed,
            elapsed = ?started.elapsed(),
            preserved = ?kept,
            "test run finished"
        );
        kept
    }

    async fn within_deadline<T>(
        &self,
        what: &str,
        work: impl Future<Output = HarnessResult<T>>,
    ) -> HarnessResult<T> {
        tokio::select! {
            biased;
            () = self.deadline.cancelled() => Err(HarnessError::Cancelled(format!(
                "test deadline expired while {what} ({})",
                self.agent.name()
            ))),
            result = work => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::agents::mock::{MockAgent, MockResponse};
    use crate::domain::models::with_model;

    fn harness(agent: MockAgent, capacity: usize) -> Harness {
        harness_with(agent, capacity, HarnessConfig::default())
    }

    fn harness_with(agent: MockAgent, capacity: usize, mut config: HarnessConfig) -> Harness {
        config.timeouts.retry_delay_ms = 10;
        config.timeouts.convergence_secs = 5;
        config.timeouts.poll_interval_ms = 20;
        let registry = AgentRegistry::builder()
            .register(agent)
            .with_gate("mock", capacity)
            .build()
            .unwrap();
        Harness::new(config, registry)
    }

    #[tokio::test]
    async fn test_begin_prepares_repo_and_slot() {
        let harness = harness(MockAgent::new("mock"), 1);
        let run = harness.begin("mock").await.unwrap();

        assert!(run.path().join(".git").exists());
        assert!(!run.is_expired());
        assert_eq!(run.repo().start_checkpoint(), None);

        let path = run.path().to_path_buf();
        assert_eq!(run.finish(true), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_init_logging_rejects_unknown_level() {
        let mut config = HarnessConfig::default();
        config.logging.level = "loud".to_string();
        let harness = harness_with(MockAgent::new("mock"), 1, config);

        let err = harness.init_logging().err().unwrap();
        assert!(matches!(err, HarnessError::Setup(_)));
        assert!(err.to_string().contains("loud"), "{err}");
    }

    #[tokio::test]
    async fn test_begin_unknown_agent() {
        let harness = harness(MockAgent::new("mock"), 1);
        let err = harness.begin("cursor").await.err().unwrap();
        assert!(matches!(err, HarnessError::UnknownAgent(_)));
    }

    #[tokio::test]
    async fn test_bootstrap_failure_aborts_begin() {
        let harness = harness(MockAgent::new("mock").failing_bootstrap("no binary"), 1);
        let err = harness.begin("mock").await.err().unwrap();
        assert!(matches!(err, HarnessError::Bootstrap { .. }));
    }

    #[tokio::test]
    async fn test_run_prompt_retries_transient_once() {
        let agent = MockAgent::new("mock")
            .with_transient_markers(["overloaded_error"])
            .respond(MockResponse::failure(1, "API Error: overloaded_error"))
            .respond(MockResponse::success("done"));
        let harness = harness(agent, 1);
        let run = harness.begin("mock").await.unwrap();

        let output = run.run_prompt("create hello.txt", &[with_model("haiku")]).await.unwrap();
        assert_eq!(output.stdout, "done");
        run.finish(true);
    }

    #[tokio::test]
    async fn test_prompt_effect_then_wait_for_file() {
        let agent = MockAgent::new("mock").respond(
            MockResponse::success("wrote file")
                .with_effect(|dir| std::fs::write(dir.join("hello.txt"), "hi")),
        );
        let harness = harness(agent, 1);
        let run = harness.begin("mock").await.unwrap();

        run.run_prompt("write hello.txt", &[]).await.unwrap();
        let path = run.wait_for_file("hello.txt").await.unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "hi");
        run.finish(true);
    }

    #[tokio::test]
    async fn test_session_unsupported_without_frames() {
        let harness = harness(MockAgent::new("mock"), 1);
        let run = harness.begin("mock").await.unwrap();
        assert!(!run.start_session().await.unwrap().is_supported());
        run.finish(true);
    }

    #[tokio::test]
    async fn test_slot_held_until_finish() {
        let harness = harness(MockAgent::new("mock"), 1);
        let first = harness.begin("mock").await.unwrap();

        let blocked = tokio::time::timeout(Duration::from_millis(100), harness.begin("mock")).await;
        assert!(blocked.is_err(), "second run must wait for the slot");

        first.finish(true);
        let second = harness.begin("mock").await.unwrap();
        second.finish(true);
    }

    #[tokio::test]
    async fn test_failed_run_preserved_when_configured() {
        let mut config = HarnessConfig::default();
        config.repo.keep_on_failure = true;
        let harness = harness_with(MockAgent::new("mock"), 1, config);
        let run = harness.begin("mock").await.unwrap();
        let kept = run.finish(false).expect("failed run keeps its repository");
        assert!(kept.exists());
        std::fs::remove_dir_all(kept).unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_cancels_runs() {
        let harness = harness(MockAgent::new("mock"), 1);
        let run = harness.begin("mock").await.unwrap();
        harness.shutdown();
        assert!(run.is_expired());

        let err = run.wait_for_file("never.txt").await.err().unwrap();
        assert!(err.is_cancelled());
        run.finish(true);
    }

    #[tokio::test]
    async fn test_scaled_uses_agent_multiplier() {
        let harness = harness(MockAgent::new("mock").with_timeout_multiplier(2.0), 1);
        let run = harness.begin("mock").await.unwrap();
        assert_eq!(run.scaled(Duration::from_secs(3)), Duration::from_secs(6));
        assert_eq!(run.convergence_timeout(), Duration::from_secs(10));
        run.finish(true);
    }
}
