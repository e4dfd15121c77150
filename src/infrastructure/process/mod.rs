//! Process-mode agent execution
//!
//! - Environment hardening (`EnvPolicy`)
//! - Scoped configuration directories with guaranteed cleanup
//! - Child process driver with process-group cancellation

pub mod driver;
pub mod env;
pub mod scratch;

pub use driver::{exit_code, ProcessDriver, ProcessSpec};
pub use env::EnvPolicy;
pub use scratch::ScopedConfigDir;
