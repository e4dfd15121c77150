//! Gemini CLI agent.

use async_trait::async_trait;
use std::path::Path;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::cli::{launch_session, verify_binary};
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{AgentSettings, DialogConfig, ProcessOutput, RunConfig, RunOption};
use crate::domain::ports::{Agent, SessionStart};
use crate::infrastructure::process::{EnvPolicy, ProcessDriver, ProcessSpec};
use crate::services::dialog::{DialogPlan, DialogRule};
use crate::services::retry::TransientSignatures;

pub const GEMINI_CLI: &str = "gemini-cli";

const TRANSIENT: [&str; 8] = [
    "RESOURCE_EXHAUSTED",
    "429",
    "INTERNAL",
    "UNAVAILABLE",
    "Unexpected end of JSON input",
    "ECONNRESET",
    "ETIMEDOUT",
    "fetch failed",
];

/// Gemini is noticeably slower to first output.
const TIMEOUT_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone)]
pub struct GeminiCliConfig {
    pub binary: String,
    pub default_model: String,
    pub dialog: DialogConfig,
}

impl Default for GeminiCliConfig {
    fn default() -> Self {
        Self {
            binary: "gemini".to_string(),
            default_model: "gemini-2.5-flash".to_string(),
            dialog: DialogConfig::default(),
        }
    }
}

impl GeminiCliConfig {
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

pub struct GeminiCliAgent {
    config: GeminiCliConfig,
    driver: ProcessDriver,
    signatures: TransientSignatures,
    verified: OnceCell<String>,
}

impl GeminiCliAgent {
    pub fn new(config: GeminiCliConfig, driver: ProcessDriver) -> Self {
        Self {
            config,
            driver,
            signatures: TransientSignatures::new(TRANSIENT),
            verified: OnceCell::new(),
        }
    }

    fn env_policy(batch: bool) -> EnvPolicy {
        let policy = EnvPolicy::new()
            .remove("GEMINI_CLI")
            .set("NO_BROWSER", "true")
            .set("GEMINI_CLI_DISABLE_AUTO_UPDATE", "true");
        if batch {
            policy.set("NO_COLOR", "1")
        } else {
            policy
        }
    }

    fn batch_args(&self, prompt: &str, run: &RunConfig) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            run.model_or(&self.config.default_model).to_string(),
            "--yolo".to_string(),
        ];
        args.extend(run.extra_args.iter().cloned());
        args.push("-p".to_string());
        args.push(prompt.to_string());
        args
    }

    pub fn dialog_plan(&self) -> DialogPlan {
        DialogPlan::new("Type your message")
            .rule(DialogRule::confirm("trust", "Do you trust this folder?"))
            .tuned(&self.config.dialog)
    }
}

#[async_trait]
impl Agent for GeminiCliAgent {
    fn name(&self) -> &str {
        GEMINI_CLI
    }

    #[instrument(skip(self, prompt, options, cancel), fields(agent = GEMINI_CLI))]
    async fn run_batch(
        &self,
        workdir: &Path,
        prompt: &str,
        options: &[RunOption],
        cancel: &CancellationToken,
    ) -> HarnessResult<ProcessOutput> {
        let run = RunConfig::from_options(options);
        let spec = ProcessSpec::new(&self.config.binary, workdir)
            .args(self.batch_args(prompt, &run))
            .env(Self::env_policy(true).extend(run.env.iter().cloned()));
        debug!(command = %spec.display(), "running gemini batch");
        self.driver.run_with_timeout(&spec, cancel, run.timeout).await
    }

    async fn start_session(&self, workdir: &Path) -> HarnessResult<SessionStart> {
        let args = vec![
            "-m".to_string(),
            self.config.default_model.clone(),
            "--yolo".to_string(),
        ];
        launch_session(
            GEMINI_CLI,
            workdir,
            &Self::env_policy(false),
            &self.config.binary,
            &args,
            &self.dialog_plan(),
            None,
        )
        .await
    }

    fn is_transient_error(&self, output: &ProcessOutput, error: Option<&HarnessError>) -> bool {
        self.signatures.matches(output, error)
    }

    async fn bootstrap(&self) -> HarnessResult<()> {
        verify_binary(GEMINI_CLI, &self.config.binary, &self.driver, &self.verified).await
    }

    fn timeout_multiplier(&self) -> f64 {
        TIMEOUT_MULTIPLIER
    }
}
