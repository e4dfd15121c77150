//! Agent port - the capability contract every agent driver satisfies.

use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{ProcessOutput, RunOption};
use crate::domain::ports::Session;

/// Outcome of asking an agent for an interactive session.
pub enum SessionStart {
    /// The session reached its ready prompt and accepts input.
    Ready(Box<dyn Session>),
    /// The agent has no interactive mode; callers skip rather than fail.
    Unsupported,
}

impl SessionStart {
    pub fn into_session(self) -> Option<Box<dyn Session>> {
        match self {
            Self::Ready(session) => Some(session),
            Self::Unsupported => None,
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

impl fmt::Debug for SessionStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ready(session) => f.debug_tuple("Ready").field(&session.name()).finish(),
            Self::Unsupported => f.write_str("Unsupported"),
        }
    }
}

/// An AI coding tool driven by the harness.
///
/// Agents are registered once at startup and shared read-only across
/// concurrently running tests.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier used for gating and selection.
    fn name(&self) -> &str;

    /// Run one prompt as a batch process in `workdir`.
    ///
    /// A non-zero exit is returned as [`HarnessError::CommandFailed`] carrying
    /// the captured output. Cancelling `cancel` kills the process group.
    async fn run_batch(
        &self,
        workdir: &Path,
        prompt: &str,
        options: &[RunOption],
        cancel: &CancellationToken,
    ) -> HarnessResult<ProcessOutput>;

    /// Start an interactive session that has reached its input prompt.
    async fn start_session(&self, workdir: &Path) -> HarnessResult<SessionStart>;

    /// Whether a failed invocation is worth one retry.
    ///
    /// Always `false` when `error` is `None`.
    fn is_transient_error(&self, output: &ProcessOutput, error: Option<&HarnessError>) -> bool;

    /// One-time setup. Repeated calls have no further effect.
    async fn bootstrap(&self) -> HarnessResult<()>;

    /// Factor applied to caller-supplied timeouts for slower agents.
    fn timeout_multiplier(&self) -> f64 {
        1.0
    }

    /// Scale a timeout by this agent's multiplier, saturating at `Duration::MAX`.
    fn scaled(&self, timeout: Duration) -> Duration {
        let factor = self.timeout_multiplier().max(0.0);
        Duration::try_from_secs_f64(timeout.as_secs_f64() * factor).unwrap_or(Duration::MAX)
    }
}
