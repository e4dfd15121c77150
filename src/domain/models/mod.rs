//! Domain models for the checkpoint harness.

pub mod checkpoint;
pub mod config;
pub mod process_output;
pub mod run_config;

pub use checkpoint::{
    Attribution, CheckpointSummary, SessionFiles, SessionMetadata, SessionState, TokenUsage,
};
pub use config::{
    AgentSettings, CheckpointConfig, DialogConfig, HarnessConfig, LoggingConfig, RepoConfig,
    TimeoutConfig,
};
pub use process_output::{display_command, ProcessOutput, UNMAPPED_EXIT_CODE};
pub use run_config::{
    with_env, with_extra_args, with_model, with_permission_mode, with_timeout, RunConfig,
    RunOption,
};
