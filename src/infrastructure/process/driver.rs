//! Process-mode driver.
//!
//! Runs one agent invocation as a child process in its own process group,
//! captures both output streams, and on cancellation terminates the whole
//! group: SIGTERM, a bounded grace period, then SIGKILL.

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::env::EnvPolicy;
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{display_command, ProcessOutput, UNMAPPED_EXIT_CODE};

/// Everything needed to launch one child process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
    pub env: EnvPolicy,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, workdir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            workdir: workdir.into(),
            env: EnvPolicy::default(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, env: EnvPolicy) -> Self {
        self.env = env;
        self
    }

    pub fn display(&self) -> String {
        display_command(&self.program, &self.args)
    }
}

/// Executes [`ProcessSpec`]s with group-wide cancellation.
#[derive(Debug, Clone)]
pub struct ProcessDriver {
    kill_grace: Duration,
}

impl Default for ProcessDriver {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl ProcessDriver {
    pub const fn new(kill_grace: Duration) -> Self {
        Self { kill_grace }
    }

    /// Run the process to completion or until `cancel` fires.
    ///
    /// Returns the captured output on a zero exit, `CommandFailed` on a
    /// non-zero exit, and `Cancelled` when the token fired first.
    #[instrument(skip(self, spec, cancel), fields(command = %spec.display()))]
    pub async fn run(
        &self,
        spec: &ProcessSpec,
        cancel: &CancellationToken,
    ) -> HarnessResult<ProcessOutput> {
        let command = spec.display();
        if cancel.is_cancelled() {
            return Err(HarnessError::Cancelled(format!("starting `{command}`")));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        spec.env.apply(&mut cmd);

        let mut child = cmd.spawn().map_err(|source| HarnessError::Spawn {
            command: command.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(?pid, "agent process started");

        let stdout_task = capture(child.stdout.take());
        let stderr_task = capture(child.stderr.take());

        let (status, cancelled) = tokio::select! {
            status = child.wait() => (status.ok(), false),
            () = cancel.cancelled() => {
                warn!(?pid, "cancellation requested, terminating process group");
                (self.terminate_group(&mut child, pid).await, true)
            }
        };

        let stdout = self.collect(stdout_task).await;
        let stderr = self.collect(stderr_task).await;
        let code = status.as_ref().map_or(UNMAPPED_EXIT_CODE, exit_code);
        let output = ProcessOutput::new(command, stdout, stderr, code);

        if cancelled {
            return Err(HarnessError::Cancelled(format!("running agent\n{output}")));
        }
        if !output.success() {
            info!(exit_code = code, "agent process failed");
            return Err(HarnessError::CommandFailed(Box::new(output)));
        }
        Ok(output)
    }

    /// Like [`run`](Self::run), additionally cancelling the group once
    /// `timeout` elapses.
    pub async fn run_with_timeout(
        &self,
        spec: &ProcessSpec,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> HarnessResult<ProcessOutput> {
        let Some(timeout) = timeout else {
            return self.run(spec, cancel).await;
        };
        let token = cancel.child_token();
        let timer = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                token.cancel();
            })
        };
        let result = self.run(spec, &token).await;
        timer.abort();
        result
    }

    /// SIGTERM the group, wait the grace period, then SIGKILL and wait once more.
    async fn terminate_group(&self, child: &mut Child, pid: Option<u32>) -> Option<ExitStatus> {
        let Some(group) = pid.and_then(|p| i32::try_from(p).ok()).map(Pid::from_raw) else {
            // Already reaped
            return child.wait().await.ok();
        };

        signal_group(group, Signal::SIGTERM);
        if let Ok(status) = tokio::time::timeout(self.kill_grace, child.wait()).await {
            return status.ok();
        }

        warn!(pgid = group.as_raw(), "process group ignored SIGTERM, sending SIGKILL");
        signal_group(group, Signal::SIGKILL);
        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(status) => status.ok(),
            Err(_) => {
                warn!(pgid = group.as_raw(), "giving up waiting for killed process group");
                None
            }
        }
    }

    async fn collect(&self, task: JoinHandle<String>) -> String {
        match tokio::time::timeout(self.kill_grace, task).await {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                warn!(error = %e, "output reader task failed");
                String::new()
            }
            Err(_) => {
                warn!("output stream still open after process exit");
                String::new()
            }
        }
    }
}

/// Map an exit status to the harness convention: the real code when there is
/// one, [`UNMAPPED_EXIT_CODE`] otherwise (e.g. killed by a signal).
pub fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(UNMAPPED_EXIT_CODE)
}

fn signal_group(group: Pid, signal: Signal) {
    if let Err(e) = killpg(group, signal) {
        // ESRCH just means the group is already gone
        debug!(pgid = group.as_raw(), ?signal, error = %e, "killpg failed");
    }
}

fn capture<R>(stream: Option<R>) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stream) = stream {
            if let Err(e) = stream.read_to_end(&mut buf).await {
                debug!(error = %e, "error reading child output");
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}
