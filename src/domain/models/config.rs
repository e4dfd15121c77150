use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Main configuration structure for the harness
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct HarnessConfig {
    /// Restrict the process to a single registered agent (e.g. `E2E_AGENT=gemini-cli`)
    #[serde(default)]
    pub agent: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Timeouts and polling cadence
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Maximum concurrent invocations per agent name
    #[serde(default = "default_gates")]
    pub gates: HashMap<String, usize>,

    /// Startup dialog dismissal parameters
    #[serde(default)]
    pub dialog: DialogConfig,

    /// Ephemeral repository settings
    #[serde(default)]
    pub repo: RepoConfig,

    /// Where the checkpoint engine writes its state
    #[serde(default)]
    pub checkpoints: CheckpointConfig,

    /// Per-agent overrides keyed by agent name
    #[serde(default)]
    pub agents: HashMap<String, AgentSettings>,
}

fn default_gates() -> HashMap<String, usize> {
    HashMap::from([
        ("claude-code".to_string(), 4),
        ("gemini-cli".to_string(), 2),
    ])
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            agent: None,
            logging: LoggingConfig::default(),
            timeouts: TimeoutConfig::default(),
            gates: default_gates(),
            dialog: DialogConfig::default(),
            repo: RepoConfig::default(),
            checkpoints: CheckpointConfig::default(),
            agents: HashMap::new(),
        }
    }
}

impl HarnessConfig {
    /// Settings for one agent, or defaults when none are configured.
    pub fn agent_settings(&self, name: &str) -> AgentSettings {
        self.agents.get(name).cloned().unwrap_or_default()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Optional directory for a JSON log file
    #[serde(default)]
    pub log_dir: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
        }
    }
}

/// Timeouts, all before the per-agent multiplier is applied
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Overall deadline of one test
    #[serde(default = "default_test_secs")]
    pub test_secs: u64,

    /// Default wait for the checkpoint engine to converge
    #[serde(default = "default_convergence_secs")]
    pub convergence_secs: u64,

    /// Interval between convergence checks
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause before retrying a transient failure
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Grace period between SIGTERM and SIGKILL on cancellation
    #[serde(default = "default_kill_grace_ms")]
    pub kill_grace_ms: u64,

    /// Default wait for a pattern in an interactive session
    #[serde(default = "default_session_wait_secs")]
    pub session_wait_secs: u64,
}

const fn default_test_secs() -> u64 {
    600
}

const fn default_convergence_secs() -> u64 {
    30
}

const fn default_poll_interval_ms() -> u64 {
    500
}

const fn default_retry_delay_ms() -> u64 {
    5_000
}

const fn default_kill_grace_ms() -> u64 {
    5_000
}

const fn default_session_wait_secs() -> u64 {
    60
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            test_secs: default_test_secs(),
            convergence_secs: default_convergence_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            kill_grace_ms: default_kill_grace_ms(),
            session_wait_secs: default_session_wait_secs(),
        }
    }
}

impl TimeoutConfig {
    pub const fn test(&self) -> Duration {
        Duration::from_secs(self.test_secs)
    }

    pub const fn convergence(&self) -> Duration {
        Duration::from_secs(self.convergence_secs)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub const fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    pub const fn session_wait(&self) -> Duration {
        Duration::from_secs(self.session_wait_secs)
    }
}

/// Startup dialog dismissal parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DialogConfig {
    /// Maximum wait/dismiss iterations before giving up
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Wait for any known marker per iteration
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,

    /// Pause after a confirmation keystroke
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

const fn default_max_iterations() -> u32 {
    10
}

const fn default_wait_secs() -> u64 {
    15
}

const fn default_settle_ms() -> u64 {
    500
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            wait_secs: default_wait_secs(),
            settle_ms: default_settle_ms(),
        }
    }
}

/// Ephemeral repository settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RepoConfig {
    /// Keep the working tree of failed tests for debugging
    #[serde(default)]
    pub keep_on_failure: bool,

    /// Keep every working tree regardless of outcome
    #[serde(default)]
    pub keep_always: bool,

    /// Commands run inside a fresh repository after the initial commit
    #[serde(default)]
    pub setup_commands: Vec<Vec<String>>,
}

/// Locations the checkpoint engine writes to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointConfig {
    /// Reference holding the checkpoint metadata tree
    #[serde(default = "default_checkpoint_ref")]
    pub ref_name: String,

    /// Session-state directory, relative to the repository's git dir
    #[serde(default = "default_session_state_dir")]
    pub session_state_dir: String,

    /// Prefix of transient per-session shadow branches
    #[serde(default = "default_shadow_prefix")]
    pub shadow_branch_prefix: String,
}

fn default_checkpoint_ref() -> String {
    "refs/heads/entire/checkpoints/v1".to_string()
}

fn default_session_state_dir() -> String {
    "entire-sessions".to_string()
}

fn default_shadow_prefix() -> String {
    "entire/".to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            ref_name: default_checkpoint_ref(),
            session_state_dir: default_session_state_dir(),
            shadow_branch_prefix: default_shadow_prefix(),
        }
    }
}

/// Per-agent overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentSettings {
    /// Binary to execute instead of the agent's default
    #[serde(default)]
    pub binary: Option<String>,

    /// Default model when a run does not set one
    #[serde(default)]
    pub model: Option<String>,
}
