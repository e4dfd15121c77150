//! Claude Code CLI agent.
//!
//! Batch runs use `claude -p`; interactive runs launch the TUI in tmux. Every
//! invocation gets a private `CLAUDE_CONFIG_DIR` mirrored from the user's
//! `~/.claude`, minus history and caches, so parallel tests never share state.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::cli::{launch_session, verify_binary};
use crate::domain::errors::{HarnessError, HarnessResult};
use crate::domain::models::{AgentSettings, DialogConfig, ProcessOutput, RunConfig, RunOption};
use crate::domain::ports::{Agent, SessionStart};
use crate::infrastructure::process::{EnvPolicy, ProcessDriver, ProcessSpec, ScopedConfigDir};
use crate::services::dialog::{DialogPlan, DialogRule};
use crate::services::retry::TransientSignatures;

pub const CLAUDE_CODE: &str = "claude-code";

/// Subtrees of `~/.claude` never copied into the scoped config dir.
const PRUNED_CONFIG: [&str; 5] = ["projects", "todos", "shell-snapshots", "statsig", "ide"];

const TRANSIENT: [&str; 7] = [
    "overloaded_error",
    "529",
    "rate_limit_error",
    "API Error: 5",
    "ECONNRESET",
    "ETIMEDOUT",
    "socket hang up",
];

/// Claude Code agent configuration.
#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    /// Path to claude CLI binary
    pub binary: String,
    /// Model when a run does not choose one
    pub default_model: String,
    /// Permission mode when a run does not choose one
    pub default_permission_mode: String,
    /// Directory mirrored into each scoped config dir
    pub config_source: Option<PathBuf>,
    pub dialog: DialogConfig,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            binary: "claude".to_string(),
            default_model: "haiku".to_string(),
            default_permission_mode: "bypassPermissions".to_string(),
            config_source: std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".claude")),
            dialog: DialogConfig::default(),
        }
    }
}

impl ClaudeCodeConfig {
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

pub struct ClaudeCodeAgent {
    config: ClaudeCodeConfig,
    driver: ProcessDriver,
    signatures: TransientSignatures,
    verified: OnceCell<String>,
}

impl ClaudeCodeAgent {
    pub fn new(config: ClaudeCodeConfig, driver: ProcessDriver) -> Self {
        Self {
            config,
            driver,
            signatures: TransientSignatures::new(TRANSIENT),
            verified: OnceCell::new(),
        }
    }

    fn scoped_config(&self) -> HarnessResult<ScopedConfigDir> {
        match &self.config.config_source {
            Some(source) => ScopedConfigDir::mirror("e2e-claude-", source, &PRUNED_CONFIG),
            None => ScopedConfigDir::empty("e2e-claude-"),
        }
    }

    fn env_policy(config_dir: &Path, batch: bool) -> EnvPolicy {
        let policy = EnvPolicy::new()
            .remove("CLAUDECODE")
            .remove("CLAUDE_CODE_ENTRYPOINT")
            .set("CLAUDE_CONFIG_DIR", config_dir.display().to_string())
            .set("DISABLE_AUTOUPDATER", "1")
            .set("CLAUDE_CODE_DISABLE_NONESSENTIAL_TRAFFIC", "1");
        if batch {
            policy.set("NO_COLOR", "1")
        } else {
            policy
        }
    }

    fn batch_args(&self, prompt: &str, run: &RunConfig) -> Vec<String> {
        let mut args = vec![
            "--model".to_string(),
            run.model_or(&self.config.default_model).to_string(),
            "--permission-mode".to_string(),
            run.permission_mode_or(&self.config.default_permission_mode)
                .to_string(),
        ];
        args.extend(run.extra_args.iter().cloned());
        args.push("-p".to_string());
        args.push(prompt.to_string());
        args
    }

    fn session_args(&self) -> Vec<String> {
        vec![
            "--model".to_string(),
            self.config.default_model.clone(),
            "--permission-mode".to_string(),
            self.config.default_permission_mode.clone(),
        ]
    }

    /// Folder trust, then the bypass-permissions warning whose default declines.
    pub fn dialog_plan(&self) -> DialogPlan {
        DialogPlan::new("? for shortcuts")
            .rule(DialogRule::confirm("trust", "Do you trust the files in this folder?"))
            .rule(DialogRule::confirm("trust", "Yes, proceed"))
            .rule(DialogRule::navigate_then_confirm(
                "bypass-permissions",
                "Bypass Permissions mode",
                ["Down"],
            ))
            .tuned(&self.config.dialog)
    }
}

#[async_trait]
impl Agent for ClaudeCodeAgent {
    fn name(&self) -> &str {
        CLAUDE_CODE
    }

    #[instrument(skip(self, prompt, options, cancel), fields(agent = CLAUDE_CODE))]
    async fn run_batch(
        &self,
        workdir: &Path,
        prompt: &str,
        options: &[RunOption],
        cancel: &CancellationToken,
    ) -> HarnessResult<ProcessOutput> {
        let run = RunConfig::from_options(options);
        // Removed when this scope ends, whatever the outcome
        let config_dir = self.scoped_config()?;
        let spec = ProcessSpec::new(&self.config.binary, workdir)
            .args(self.batch_args(prompt, &run))
            .env(Self::env_policy(config_dir.path(), true).extend(run.env.iter().cloned()));
        debug!(command = %spec.display(), "running claude batch");
        self.driver.run_with_timeout(&spec, cancel, run.timeout).await
    }

    async fn start_session(&self, workdir: &Path) -> HarnessResult<SessionStart> {
        let config_dir = self.scoped_config()?;
        let env = Self::env_policy(config_dir.path(), false);
        launch_session(
            CLAUDE_CODE,
            workdir,
            &env,
            &self.config.binary,
            &self.session_args(),
            &self.dialog_plan(),
            Some(Box::new(move || config_dir.cleanup())),
        )
        .await
    }

    fn is_transient_error(&self, output: &ProcessOutput, error: Option<&HarnessError>) -> bool {
        self.signatures.matches(output, error)
    }

    async fn bootstrap(&self) -> HarnessResult<()> {
        verify_binary(CLAUDE_CODE, &self.config.binary, &self.driver, &self.verified).await
    }
}
