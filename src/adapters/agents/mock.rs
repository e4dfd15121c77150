//! Mock agent and scripted session for testing.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OnceCell};
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{display_command, ProcessOutput, RunConfig, RunOption};
use crate::domain::ports::{Agent, CloseHook, Session, SessionStart};
use crate::services::dialog::{DialogPlan, DialogRule};
use crate::services::retry::TransientSignatures;

/// Side effect a mock invocation performs in the working directory.
pub type MockEffect = Arc<dyn Fn(&Path) -> std::io::Result<()> + Send + Sync>;

/// Scripted result of one batch invocation.
#[derive(Clone)]
pub struct MockResponse {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Simulated run time, interruptible by cancellation
    pub delay: Duration,
    effect: Option<MockEffect>,
}

impl Default for MockResponse {
    fn default() -> Self {
        Self {
            stdout: "Mock task completed successfully.".to_string(),
            stderr: String::new(),
            exit_code: 0,
            delay: Duration::ZERO,
            effect: None,
        }
    }
}

impl fmt::Debug for MockResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockResponse")
            .field("stdout", &self.stdout)
            .field("stderr", &self.stderr)
            .field("exit_code", &self.exit_code)
            .field("delay", &self.delay)
            .field("effect", &self.effect.is_some())
            .finish()
    }
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            exit_code,
            ..Default::default()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Run `effect` in the working directory before returning, e.g. to write
    /// the files a real agent would have produced.
    pub fn with_effect(mut self, effect: impl Fn(&Path) -> std::io::Result<()> + Send + Sync + 'static) -> Self {
        self.effect = Some(Arc::new(effect));
        self
    }
}

/// One recorded batch call.
#[derive(Debug, Clone)]
pub struct MockInvocation {
    pub workdir: PathBuf,
    pub prompt: String,
    pub config: RunConfig,
}

/// Agent whose behavior is scripted by the test.
pub struct MockAgent {
    name: String,
    responses: AsyncMutex<VecDeque<MockResponse>>,
    default_response: MockResponse,
    invocations: AsyncMutex<Vec<MockInvocation>>,
    calls: AtomicUsize,
    signatures: TransientSignatures,
    multiplier: f64,
    session_frames: Option<Vec<String>>,
    dialog: DialogPlan,
    bootstrapped: OnceCell<()>,
    bootstrap_runs: AtomicUsize,
    bootstrap_error: Option<String>,
}

/// Ready marker of the mock's scripted sessions.
pub const MOCK_READY_MARKER: &str = "mock>";

impl MockAgent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            responses: AsyncMutex::new(VecDeque::new()),
            default_response: MockResponse::default(),
            invocations: AsyncMutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            signatures: TransientSignatures::default(),
            multiplier: 1.0,
            session_frames: None,
            dialog: DialogPlan::new(MOCK_READY_MARKER)
                .rule(DialogRule::confirm("trust", "Trust this folder?")),
            bootstrapped: OnceCell::new(),
            bootstrap_runs: AtomicUsize::new(0),
            bootstrap_error: None,
        }
    }

    /// Queue a response; queued responses are consumed in order.
    pub fn respond(mut self, response: MockResponse) -> Self {
        self.responses.get_mut().push_back(response);
        self
    }

    /// Response used once the queue is empty.
    pub fn with_default_response(mut self, response: MockResponse) -> Self {
        self.default_response = response;
        self
    }

    pub fn with_transient_markers<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.signatures = TransientSignatures::new(markers);
        self
    }

    pub const fn with_timeout_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Enable interactive sessions that replay `frames`.
    pub fn with_session<I, S>(mut self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.session_frames = Some(frames.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_dialog(mut self, dialog: DialogPlan) -> Self {
        self.dialog = dialog;
        self
    }

    pub fn failing_bootstrap(mut self, reason: impl Into<String>) -> Self {
        self.bootstrap_error = Some(reason.into());
        self
    }

    /// Number of batch invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// How many times bootstrap actually ran its setup.
    pub fn bootstrap_runs(&self) -> usize {
        self.bootstrap_runs.load(Ordering::SeqCst)
    }

    pub async fn invocations(&self) -> Vec<MockInvocation> {
        self.invocations.lock().await.clone()
    }
}

#[async_trait]
impl Agent for MockAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run_batch(
        &self,
        workdir: &Path,
        prompt: &str,
        options: &[RunOption],
        cancel: &CancellationToken,
    ) -> HarnessResult<ProcessOutput> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let config = RunConfig::from_options(options);
        self.invocations.lock().await.push(MockInvocation {
            workdir: workdir.to_path_buf(),
            prompt: prompt.to_string(),
            config,
        });
        let response = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| self.default_response.clone());

        let command = display_command(&self.name, &["-p".to_string(), prompt.to_string()]);
        if cancel.is_cancelled() {
            return Err(HarnessError::Cancelled(format!("starting `{command}`")));
        }
        if !response.delay.is_zero() {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Err(HarnessError::Cancelled(format!("running `{command}`")));
                }
                () = tokio::time::sleep(response.delay) => {}
            }
        }
        if let Some(effect) = &response.effect {
            effect(workdir).map_err(|e| HarnessError::io(workdir, e))?;
        }

        let output = ProcessOutput::new(command, response.stdout, response.stderr, response.exit_code);
        if !output.success() {
            return Err(HarnessError::CommandFailed(Box::new(output)));
        }
        Ok(output)
    }

    async fn start_session(&self, _workdir: &Path) -> HarnessResult<SessionStart> {
        let Some(frames) = &self.session_frames else {
            return Ok(SessionStart::Unsupported);
        };
        let name = format!("{}-{}", self.name, &uuid::Uuid::new_v4().simple().to_string()[..8]);
        let session = ScriptedSession::new(name, frames.iter().map(String::as_str));
        if let Err(e) = self.dialog.dismiss(&session).await {
            session.close().await?;
            return Err(e);
        }
        Ok(SessionStart::Ready(Box::new(session)))
    }

    fn is_transient_error(&self, output: &ProcessOutput, error: Option<&HarnessError>) -> bool {
        self.signatures.matches(output, error)
    }

    async fn bootstrap(&self) -> HarnessResult<()> {
        self.bootstrapped
            .get_or_try_init(|| async {
                self.bootstrap_runs.fetch_add(1, Ordering::SeqCst);
                match &self.bootstrap_error {
                    Some(reason) => Err(HarnessError::Bootstrap {
                        agent: self.name.clone(),
                        reason: reason.clone(),
                    }),
                    None => Ok(()),
                }
            })
            .await
            .map(|_| ())
    }

    fn timeout_multiplier(&self) -> f64 {
        self.multiplier
    }
}

#[derive(Debug)]
struct ScriptState {
    frames: Vec<String>,
    position: usize,
    sent: Vec<String>,
    resets: usize,
}

impl ScriptState {
    fn current(&self) -> String {
        self.frames.get(self.position).cloned().unwrap_or_default()
    }

    fn advance(&mut self, input: String) {
        self.sent.push(input);
        if self.position + 1 < self.frames.len() {
            self.position += 1;
        }
    }
}

/// Session that shows a fixed sequence of pane frames.
///
/// Every send advances to the next frame; the last frame repeats forever.
pub struct ScriptedSession {
    name: String,
    state: Mutex<ScriptState>,
    hooks: Mutex<Vec<CloseHook>>,
    closed: AtomicBool,
}

impl ScriptedSession {
    pub fn new<I, S>(name: impl Into<String>, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            state: Mutex::new(ScriptState {
                frames: frames.into_iter().map(Into::into).collect(),
                position: 0,
                sent: Vec::new(),
                resets: 0,
            }),
            hooks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Everything sent so far: lines as typed, key batches joined by spaces.
    pub fn sent(&self) -> Vec<String> {
        lock(&self.state).sent.clone()
    }

    pub fn resets(&self) -> usize {
        lock(&self.state).resets
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> HarnessResult<()> {
        if self.is_closed() {
            return Err(HarnessError::Session(format!("session {} is closed", self.name)));
        }
        Ok(())
    }

    fn run_hooks(&self) {
        let hooks = std::mem::take(&mut *lock(&self.hooks));
        for hook in hooks {
            hook();
        }
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> HarnessResult<()> {
        self.ensure_open()?;
        lock(&self.state).advance(text.to_string());
        Ok(())
    }

    async fn send_keys(&self, keys: &[&str]) -> HarnessResult<()> {
        self.ensure_open()?;
        lock(&self.state).advance(keys.join(" "));
        Ok(())
    }

    async fn wait_for(&self, pattern: &str, timeout: Duration) -> HarnessResult<String> {
        self.ensure_open()?;
        let re = regex::Regex::new(pattern)
            .map_err(|e| HarnessError::Session(format!("invalid pattern `{pattern}`: {e}")))?;
        let pane = lock(&self.state).current();
        if re.is_match(&pane) {
            return Ok(pane);
        }
        tokio::time::sleep(timeout).await;
        Err(HarnessError::PatternTimeout {
            session: self.name.clone(),
            pattern: pattern.to_string(),
            timeout,
            pane,
        })
    }

    async fn capture(&self) -> HarnessResult<String> {
        self.ensure_open()?;
        Ok(lock(&self.state).current())
    }

    fn reset_last_sent(&self) {
        lock(&self.state).resets += 1;
    }

    fn on_close(&self, hook: CloseHook) {
        if self.is_closed() {
            hook();
            return;
        }
        lock(&self.hooks).push(hook);
    }

    async fn close(&self) -> HarnessResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.run_hooks();
        }
        Ok(())
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.run_hooks();
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{with_model, with_permission_mode};

    #[tokio::test]
    async fn test_scripted_responses_in_order() {
        let agent = MockAgent::new("mock")
            .respond(MockResponse::success("first"))
            .respond(MockResponse::failure(2, "second failed"));
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();

        let first = agent.run_batch(dir.path(), "a", &[], &cancel).await.unwrap();
        assert_eq!(first.stdout, "first");

        let err = agent.run_batch(dir.path(), "b", &[], &cancel).await.unwrap_err();
        assert_eq!(err.process_output().unwrap().exit_code, 2);

        let fallback = agent.run_batch(dir.path(), "c", &[], &cancel).await.unwrap();
        assert_eq!(fallback.stdout, MockResponse::default().stdout);
        assert_eq!(agent.calls(), 3);
    }

    #[tokio::test]
    async fn test_records_applied_options() {
        let agent = MockAgent::new("mock");
        let dir = tempfile::tempdir().unwrap();
        agent
            .run_batch(
                dir.path(),
                "fix the bug",
                &[with_model("haiku"), with_permission_mode("plan")],
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let invocations = agent.invocations().await;
        assert_eq!(invocations.len(), 1);
        assert_eq!(invocations[0].prompt, "fix the bug");
        assert_eq!(invocations[0].config.model.as_deref(), Some("haiku"));
        assert_eq!(invocations[0].config.permission_mode.as_deref(), Some("plan"));
    }

    #[tokio::test]
    async fn test_effect_runs_in_workdir() {
        let agent = MockAgent::new("mock").respond(
            MockResponse::success("wrote file")
                .with_effect(|dir| std::fs::write(dir.join("hello.txt"), "hi")),
        );
        let dir = tempfile::tempdir().unwrap();
        agent
            .run_batch(dir.path(), "write", &[], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("hello.txt")).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_delay_is_cancellable() {
        let agent = MockAgent::new("mock")
            .respond(MockResponse::success("slow").with_delay(Duration::from_secs(60)));
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = agent.run_batch(dir.path(), "x", &[], &cancel).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_bootstrap_runs_once() {
        let agent = MockAgent::new("mock");
        agent.bootstrap().await.unwrap();
        agent.bootstrap().await.unwrap();
        assert_eq!(agent.bootstrap_runs(), 1);

        let broken = MockAgent::new("broken").failing_bootstrap("binary missing");
        let err = broken.bootstrap().await.unwrap_err();
        assert!(matches!(err, HarnessError::Bootstrap { .. }));
    }

    #[tokio::test]
    async fn test_session_unsupported_without_frames() {
        let agent = MockAgent::new("mock");
        let start = agent.start_session(Path::new(".")).await.unwrap();
        assert!(!start.is_supported());
    }

    #[tokio::test]
    async fn test_session_dismisses_trust_dialog() {
        let agent = MockAgent::new("mock")
            .with_session(["Trust this folder?", "mock> "])
            .with_dialog(
                DialogPlan {
                    wait_timeout: Duration::from_millis(10),
                    settle: Duration::ZERO,
                    ..DialogPlan::new(MOCK_READY_MARKER)
                }
                .rule(DialogRule::confirm("trust", "Trust this folder?")),
            );

        let session = agent
            .start_session(Path::new("."))
            .await
            .unwrap()
            .into_session()
            .unwrap();
        assert!(session.capture().await.unwrap().contains("mock>"));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_scripted_session_close_runs_hook_once() {
        let session = ScriptedSession::new("s", ["a"]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        session.on_close(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        session.close().await.unwrap();
        session.close().await.unwrap();
        drop(session);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
