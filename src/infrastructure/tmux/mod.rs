//! tmux-backed interactive sessions.
//!
//! Each agent session runs in its own detached tmux session on a dedicated
//! server socket, so harness sessions never mix with the user's own tmux.

use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::ports::{CloseHook, Session};
use crate::infrastructure::process::EnvPolicy;

/// tmux server socket used for every harness session.
pub const TMUX_SOCKET: &str = "checkpoint-harness";

const PANE_WIDTH: u16 = 200;
const PANE_HEIGHT: u16 = 50;
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// An agent process running inside a detached tmux session.
pub struct TmuxSession {
    name: String,
    /// Pane content captured just before the most recent send.
    last_sent: Mutex<Option<String>>,
    hooks: Mutex<Vec<CloseHook>>,
    closed: AtomicBool,
}

impl TmuxSession {
    /// Launch `program args...` in a new detached session rooted at `workdir`.
    pub async fn start(
        name: impl Into<String>,
        workdir: &Path,
        env: &EnvPolicy,
        program: &str,
        args: &[String],
    ) -> HarnessResult<Self> {
        let name = name.into();
        let mut tmux_args = vec![
            "new-session".to_string(),
            "-d".to_string(),
            "-s".to_string(),
            name.clone(),
            "-x".to_string(),
            PANE_WIDTH.to_string(),
            "-y".to_string(),
            PANE_HEIGHT.to_string(),
            "-c".to_string(),
            workdir.display().to_string(),
            "--".to_string(),
        ];
        tmux_args.extend(env.env_prefix());
        tmux_args.push(program.to_string());
        tmux_args.extend(args.iter().cloned());

        tmux(&tmux_args).await?;
        // Keep the pane around after the agent exits so its last words can be captured.
        if let Err(e) = tmux(&["set-option", "-t", name.as_str(), "remain-on-exit", "on"]).await {
            debug!(session = %name, error = %e, "could not set remain-on-exit");
        }
        info!(session = %name, program, "tmux session started");

        Ok(Self {
            name,
            last_sent: Mutex::new(None),
            hooks: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Whether a usable tmux binary is on `PATH`.
    pub async fn available() -> bool {
        Command::new("tmux")
            .arg("-V")
            .output()
            .await
            .is_ok_and(|out| out.status.success())
    }

    async fn record_send(&self) {
        let before = self.capture().await.unwrap_or_default();
        *lock(&self.last_sent) = Some(before);
    }

    fn run_hooks(&self) {
        let hooks = std::mem::take(&mut *lock(&self.hooks));
        for hook in hooks {
            hook();
        }
    }
}

#[async_trait]
impl Session for TmuxSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> HarnessResult<()> {
        self.record_send().await;
        tmux(&["send-keys", "-t", self.name.as_str(), "-l", text]).await?;
        tmux(&["send-keys", "-t", self.name.as_str(), "Enter"]).await?;
        debug!(session = %self.name, chars = text.len(), "sent line");
        Ok(())
    }

    async fn send_keys(&self, keys: &[&str]) -> HarnessResult<()> {
        self.record_send().await;
        let mut args = vec!["send-keys", "-t", self.name.as_str()];
        args.extend_from_slice(keys);
        tmux(&args).await?;
        debug!(session = %self.name, ?keys, "sent keys");
        Ok(())
    }

    async fn wait_for(&self, pattern: &str, timeout: Duration) -> HarnessResult<String> {
        let re = Regex::new(pattern)
            .map_err(|e| HarnessError::Session(format!("invalid pattern `{pattern}`: {e}")))?;
        // None when the timeout is too large to represent; waits without a deadline.
        let deadline = Instant::now().checked_add(timeout);

        loop {
            let pane = self.capture().await?;
            let baseline = lock(&self.last_sent).clone();
            let changed = baseline.as_deref().map_or(true, |before| before != pane);
            if changed && re.is_match(&pane) {
                return Ok(pane);
            }

            let now = Instant::now();
            if deadline.is_some_and(|d| now >= d) {
                return Err(HarnessError::PatternTimeout {
                    session: self.name.clone(),
                    pattern: pattern.to_string(),
                    timeout,
                    pane,
                });
            }
            let pause = deadline.map_or(POLL_INTERVAL, |d| POLL_INTERVAL.min(d - now));
            tokio::time::sleep(pause).await;
        }
    }

    async fn capture(&self) -> HarnessResult<String> {
        tmux(&["capture-pane", "-p", "-J", "-t", self.name.as_str()]).await
    }

    fn reset_last_sent(&self) {
        *lock(&self.last_sent) = None;
    }

    fn on_close(&self, hook: CloseHook) {
        if self.closed.load(Ordering::SeqCst) {
            hook();
            return;
        }
        lock(&self.hooks).push(hook);
    }

    async fn close(&self) -> HarnessResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = tmux(&["kill-session", "-t", self.name.as_str()]).await {
            warn!(session = %self.name, error = %e, "failed to kill tmux session");
        }
        self.run_hooks();
        info!(session = %self.name, "tmux session closed");
        Ok(())
    }
}

impl Drop for TmuxSession {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(session = %self.name, "tmux session dropped without close, tearing down");
        let result = std::process::Command::new("tmux")
            .args(["-L", TMUX_SOCKET, "kill-session", "-t", self.name.as_str()])
            .output();
        if let Err(e) = result {
            warn!(session = %self.name, error = %e, "failed to kill tmux session on drop");
        }
        self.run_hooks();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Run a tmux command on the harness socket, returning stdout.
async fn tmux<S: AsRef<str>>(args: &[S]) -> HarnessResult<String> {
    let args: Vec<&str> = args.iter().map(AsRef::as_ref).collect();
    let output = Command::new("tmux")
        .arg("-L")
        .arg(TMUX_SOCKET)
        .args(&args)
        .output()
        .await
        .map_err(|e| HarnessError::Session(format!("failed to run `tmux {}`: {e}", args.join(" "))))?;

    if !output.status.success() {
        return Err(HarnessError::Session(format!(
            "`tmux {}` failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
