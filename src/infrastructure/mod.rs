//! Infrastructure layer module
//!
//! Adapters to the outside world used by the agent drivers:
//! - Configuration loading (figment)
//! - Logging (tracing)
//! - Child process supervision
//! - tmux sessions

pub mod config;
pub mod logging;
pub mod process;
pub mod tmux;
