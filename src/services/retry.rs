//! Transient-failure classification and the single-retry policy.

use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{ProcessOutput, RunOption, UNMAPPED_EXIT_CODE};
use crate::domain::ports::Agent;

/// Substrings that mark a failed invocation as a temporary external condition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransientSignatures {
    patterns: Vec<String>,
}

impl TransientSignatures {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Match against the captured output and the error's cause.
    ///
    /// The command line is never inspected, since it contains the prompt.
    /// No error means nothing failed, so nothing is transient. Cancellation is
    /// never transient.
    pub fn matches(&self, output: &ProcessOutput, error: Option<&HarnessError>) -> bool {
        let Some(error) = error else {
            return false;
        };
        if error.is_cancelled() {
            return false;
        }
        let mut haystack = output.combined();
        if error.process_output().is_none() {
            haystack.push('\n');
            haystack.push_str(&error.cause_text());
        }
        self.patterns
            .iter()
            .any(|pattern| haystack.contains(pattern.as_str()))
    }
}

/// Retry a transient batch failure once after a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl RetryPolicy {
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Run one batch invocation, retrying exactly once if the agent classifies
    /// the failure as transient. The second result is returned as-is.
    #[instrument(skip(self, agent, prompt, options, cancel), fields(agent = agent.name()))]
    pub async fn run_batch(
        &self,
        agent: &dyn Agent,
        workdir: &Path,
        prompt: &str,
        options: &[RunOption],
        cancel: &CancellationToken,
    ) -> HarnessResult<ProcessOutput> {
        let err = match agent.run_batch(workdir, prompt, options, cancel).await {
            Ok(output) => return Ok(output),
            Err(err) => err,
        };

        let output = err
            .process_output()
            .cloned()
            .unwrap_or_else(|| ProcessOutput::new(agent.name(), "", "", UNMAPPED_EXIT_CODE));
        if !agent.is_transient_error(&output, Some(&err)) {
            return Err(err);
        }

        warn!(attempt = 1, delay = ?self.delay, error = %err, "transient failure, retrying once");
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(HarnessError::Cancelled(format!(
                    "waiting to retry after transient failure: {err}"
                )));
            }
            () = tokio::time::sleep(self.delay) => {}
        }

        let result = agent.run_batch(workdir, prompt, options, cancel).await;
        match &result {
            Ok(_) => info!(attempt = 2, "retry succeeded"),
            Err(e) => warn!(attempt = 2, error = %e, "retry failed"),
        }
        result
    }
}
