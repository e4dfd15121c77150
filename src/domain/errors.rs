//! Domain errors for the checkpoint harness.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::domain::models::ProcessOutput;

/// Errors surfaced by harness operations.
///
/// Every variant that originates from an external command carries the literal
/// command (and captured output where there is one) so a failure can be
/// diagnosed without re-running the test.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Bootstrap failed for agent {agent}: {reason}")]
    Bootstrap { agent: String, reason: String },

    #[error("Failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command failed with exit code {}\n{}", .0.exit_code, .0)]
    CommandFailed(Box<ProcessOutput>),

    #[error("Cancelled while {0}")]
    Cancelled(String),

    #[error("Timed out after {timeout:?} waiting for pattern `{pattern}` in session {session}\n--- pane ---\n{pane}")]
    PatternTimeout {
        session: String,
        pattern: String,
        timeout: Duration,
        pane: String,
    },

    #[error("Convergence timeout after {timeout:?} waiting for {target} (last observed: {last_observed})")]
    ConvergenceTimeout {
        target: String,
        timeout: Duration,
        last_observed: String,
    },

    #[error("git command `{command}` failed: {stderr}")]
    Git { command: String, stderr: String },

    #[error("Session error: {0}")]
    Session(String),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid metadata at {location}: {reason}")]
    Metadata { location: String, reason: String },

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}

pub type HarnessResult<T> = Result<T, HarnessError>;

impl HarnessError {
    pub fn setup(reason: impl Into<String>) -> Self {
        Self::Setup(reason.into())
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Output captured from the child process, if this failure came from one.
    pub fn process_output(&self) -> Option<&ProcessOutput> {
        match self {
            Self::CommandFailed(output) => Some(output),
            _ => None,
        }
    }

    /// Text describing what went wrong, without the command line.
    ///
    /// Commands embed the prompt, so anything matched against failure text
    /// must not see them.
    pub fn cause_text(&self) -> String {
        match self {
            Self::CommandFailed(output) => output.combined(),
            Self::Spawn { source, .. } | Self::Io { source, .. } => source.to_string(),
            Self::Git { stderr, .. } => stderr.clone(),
            Self::Bootstrap { reason, .. } | Self::Metadata { reason, .. } => reason.clone(),
            Self::Setup(reason) | Self::Session(reason) | Self::UnknownAgent(reason) => reason.clone(),
            Self::Cancelled(_) | Self::PatternTimeout { .. } | Self::ConvergenceTimeout { .. } => {
                String::new()
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::PatternTimeout { .. } | Self::ConvergenceTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_failed_message_carries_output() {
        let output = ProcessOutput::new("claude -p hi", "partial", "overloaded_error", 1);
        let err = HarnessError::CommandFailed(Box::new(output));

        let message = err.to_string();
        assert!(message.contains("exit code 1"));
        assert!(message.contains("claude -p hi"));
        assert!(message.contains("overloaded_error"));
        assert_eq!(err.process_output().map(|o| o.exit_code), Some(1));
    }

    #[test]
    fn test_convergence_timeout_names_target() {
        let err = HarnessError::ConvergenceTimeout {
            target: "ref entire/checkpoints/v1 to move from abc123".to_string(),
            timeout: Duration::from_secs(15),
            last_observed: "abc123".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("15s"));
        assert!(message.contains("entire/checkpoints/v1"));
        assert!(err.is_timeout());
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cause_text_omits_command_line() {
        let output = ProcessOutput::new("gemini -p 'fix the 429 handler'", "", "Unknown argument: --yolo", 1);
        let err = HarnessError::CommandFailed(Box::new(output));
        assert_eq!(err.cause_text(), "Unknown argument: --yolo");

        let spawn = HarnessError::Spawn {
            command: "claude -p 'retry on ECONNRESET'".to_string(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert!(!spawn.cause_text().contains("ECONNRESET"));
        assert!(spawn.cause_text().contains("No such file"));
    }

    #[test]
    fn test_non_process_errors_have_no_output() {
        assert!(HarnessError::setup("no repo").process_output().is_none());
        assert!(HarnessError::Cancelled("acquiring slot".into()).is_cancelled());
    }
}
