//! OpenCode agent. Batch mode only.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::cli::verify_binary;
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{AgentSettings, ProcessOutput, RunConfig, RunOption};
use crate::domain::ports::{Agent, SessionStart};
use crate::infrastructure::process::{EnvPolicy, ProcessDriver, ProcessSpec};
use crate::services::retry::TransientSignatures;

pub const OPENCODE: &str = "opencode";

const TRANSIENT: [&str; 5] = ["overloaded", "rate limit", "429", "ECONNRESET", "ETIMEDOUT"];

#[derive(Debug, Clone)]
pub struct OpenCodeConfig {
    pub binary: String,
    pub default_model: String,
}

impl Default for OpenCodeConfig {
    fn default() -> Self {
        Self {
            binary: "opencode".to_string(),
            default_model: "anthropic/claude-haiku-4-5".to_string(),
        }
    }
}

impl OpenCodeConfig {
    pub fn with_settings(mut self, settings: &AgentSettings) -> Self {
        if let Some(binary) = &settings.binary {
            self.binary.clone_from(binary);
        }
        if let Some(model) = &settings.model {
            self.default_model.clone_from(model);
        }
        self
    }
}

pub struct OpenCodeAgent {
    config: OpenCodeConfig,
    driver: ProcessDriver,
    signatures: TransientSignatures,
    verified: OnceCell<String>,
}

impl OpenCodeAgent {
    pub fn new(config: OpenCodeConfig, driver: ProcessDriver) -> Self {
        Self {
            config,
            driver,
            signatures: TransientSignatures::new(TRANSIENT),
            verified: OnceCell::new(),
        }
    }

    fn batch_args(&self, prompt: &str, run: &RunConfig) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--model".to_string(),
            run.model_or(&self.config.default_model).to_string(),
        ];
        args.extend(run.extra_args.iter().cloned());
        args.push(prompt.to_string());
        args
    }
}

#[async_trait]
impl Agent for OpenCodeAgent {
    fn name(&self) -> &str {
        OPENCODE
    }

    #[instrument(skip(self, prompt, options, cancel), fields(agent = OPENCODE))]
    async fn run_batch(
        &self,
        workdir: &Path,
        prompt: &str,
        options: &[RunOption],
        cancel: &CancellationToken,
    ) -> HarnessResult<ProcessOutput> {
        let run = RunConfig::from_options(options);
        let env = EnvPolicy::new()
            .set("OPENCODE_DISABLE_AUTOUPDATE", "true")
            .set("NO_COLOR", "1")
            .extend(run.env.iter().cloned());
        let spec = ProcessSpec::new(&self.config.binary, workdir)
            .args(self.batch_args(prompt, &run))
            .env(env);
        self.driver.run_with_timeout(&spec, cancel, run.timeout).await
    }

    async fn start_session(&self, _workdir: &Path) -> HarnessResult<SessionStart> {
        Ok(SessionStart::Unsupported)
    }

    fn is_transient_error(&self, output: &ProcessOutput, error: Option<&HarnessError>) -> bool {
        self.signatures.matches(output, error)
    }

    async fn bootstrap(&self) -> HarnessResult<()> {
        verify_binary(OPENCODE, &self.config.binary, &self.driver, &self.verified).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::with_model;

    #[tokio::test]
    async fn test_no_interactive_mode() {
        let agent = OpenCodeAgent::new(OpenCodeConfig::default(), ProcessDriver::default());
        let start = agent.start_session(Path::new(".")).await.unwrap();
        assert!(start.into_session().is_none());
    }

    #[test]
    fn test_prompt_is_positional() {
        let agent = OpenCodeAgent::new(OpenCodeConfig::default(), ProcessDriver::default());
        let run = RunConfig::from_options(&[with_model("openai/gpt-5")]);
        assert_eq!(
            agent.batch_args("do it", &run),
            vec!["run", "--model", "openai/gpt-5", "do it"]
        );
    }
}
